// In-process fakes for the container runtime, registry, health endpoint and prompts.
// Shared by the integration tests; not every test file uses every helper.
#![allow(dead_code)]

use async_trait::async_trait;
use chrono::{NaiveDate, NaiveDateTime};
use solar_ops::clock::Clock;
use solar_ops::console::Prompt;
use solar_ops::environment::Environment;
use solar_ops::health::{HealthError, HealthProbe};
use solar_ops::registry::{Registry, RegistryCredentials};
use solar_ops::runtime::{ComposeProject, ContainerRuntime, ExecOutput, RuntimeError};
use std::collections::VecDeque;
use std::fs;
use std::io::{self, Read, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Mutex;
use tempfile::TempDir;

pub const DUMP: &[u8] =
    b"--\n-- PostgreSQL database dump\n--\nCREATE TABLE inverter (id integer);\n";

/// 2025-10-22 14:30:05, a Wednesday
pub fn wednesday() -> NaiveDateTime {
    at(2025, 10, 22, 14, 30, 5)
}

pub fn at(y: i32, m: u32, d: u32, h: u32, min: u32, s: u32) -> NaiveDateTime {
    NaiveDate::from_ymd_opt(y, m, d)
        .unwrap()
        .and_hms_opt(h, min, s)
        .unwrap()
}

/// Moves one second forward every time it is read
pub struct SteppingClock {
    start: NaiveDateTime,
    ticks: AtomicI64,
}

impl SteppingClock {
    pub fn new(start: NaiveDateTime) -> Self {
        Self {
            start,
            ticks: AtomicI64::new(0),
        }
    }
}

impl Clock for SteppingClock {
    fn now(&self) -> NaiveDateTime {
        self.start + chrono::Duration::seconds(self.ticks.fetch_add(1, Ordering::SeqCst))
    }
}

/// Temp root with `<env>/.env` and `<env>/docker-compose.yml`
pub fn workspace(environment: Environment, env_file: &str) -> TempDir {
    let dir = tempfile::tempdir().unwrap();
    let env_dir = environment.directory(dir.path());
    fs::create_dir_all(&env_dir).unwrap();
    fs::write(env_dir.join(".env"), env_file).unwrap();
    fs::write(env_dir.join("docker-compose.yml"), "services: {}\n").unwrap();
    dir
}

pub fn files_under(dir: &Path) -> Vec<PathBuf> {
    let mut found = Vec::new();
    if let Ok(entries) = fs::read_dir(dir) {
        for entry in entries.flatten() {
            let path = entry.path();
            if path.is_dir() {
                found.extend(files_under(&path));
            } else {
                found.push(path);
            }
        }
    }
    found.sort();
    found
}

#[derive(Default)]
struct RuntimeState {
    running: Vec<String>,
    starts_on_up: Vec<String>,
    dump: Vec<u8>,
    dump_error: Option<String>,
    pull_error: Option<String>,
    migration_error: Option<String>,
    restored: Vec<u8>,
    calls: Vec<String>,
}

pub struct FakeRuntime {
    state: Mutex<RuntimeState>,
}

impl FakeRuntime {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(RuntimeState {
                dump: DUMP.to_vec(),
                ..RuntimeState::default()
            }),
        }
    }

    pub fn running(self, services: &[&str]) -> Self {
        self.state.lock().unwrap().running = services.iter().map(|s| s.to_string()).collect();
        self
    }

    pub fn starts_on_up(self, services: &[&str]) -> Self {
        let services = services.iter().map(|s| s.to_string()).collect();
        self.state.lock().unwrap().starts_on_up = services;
        self
    }

    pub fn failing_dump(self, message: &str) -> Self {
        self.state.lock().unwrap().dump_error = Some(message.to_string());
        self
    }

    pub fn failing_pull(self, message: &str) -> Self {
        self.state.lock().unwrap().pull_error = Some(message.to_string());
        self
    }

    pub fn failing_migrations(self, message: &str) -> Self {
        self.state.lock().unwrap().migration_error = Some(message.to_string());
        self
    }

    pub fn calls(&self) -> Vec<String> {
        self.state.lock().unwrap().calls.clone()
    }

    pub fn restored(&self) -> Vec<u8> {
        self.state.lock().unwrap().restored.clone()
    }

    fn record(&self, call: String) {
        self.state.lock().unwrap().calls.push(call);
    }
}

fn failed(command: &str, stderr: &str) -> RuntimeError {
    RuntimeError::CommandFailed {
        command: command.to_string(),
        code: Some(1),
        stderr: stderr.to_string(),
    }
}

#[async_trait]
impl ContainerRuntime for FakeRuntime {
    async fn up(&self, project: &ComposeProject) -> Result<(), RuntimeError> {
        let tag = project.variable("IMAGE_TAG").unwrap_or("");
        self.record(format!("up IMAGE_TAG={}", tag));
        let mut state = self.state.lock().unwrap();
        let starting = state.starts_on_up.clone();
        for service in starting {
            if !state.running.contains(&service) {
                state.running.push(service);
            }
        }
        Ok(())
    }

    async fn pull(&self, _project: &ComposeProject) -> Result<(), RuntimeError> {
        self.record("pull".to_string());
        match self.state.lock().unwrap().pull_error.clone() {
            Some(message) => Err(failed("docker compose pull", &message)),
            None => Ok(()),
        }
    }

    async fn running_services(
        &self,
        _project: &ComposeProject,
    ) -> Result<Vec<String>, RuntimeError> {
        Ok(self.state.lock().unwrap().running.clone())
    }

    async fn exec(
        &self,
        _project: &ComposeProject,
        service: &str,
        command: &[String],
    ) -> Result<ExecOutput, RuntimeError> {
        self.record(format!("exec {} {}", service, command.join(" ")));
        match self.state.lock().unwrap().migration_error.clone() {
            Some(message) => Err(failed("alembic upgrade head", &message)),
            None => Ok(ExecOutput::default()),
        }
    }

    async fn exec_to_writer(
        &self,
        _project: &ComposeProject,
        service: &str,
        command: &[String],
        sink: &mut (dyn Write + Send),
    ) -> Result<u64, RuntimeError> {
        self.record(format!("dump {} {}", service, command.join(" ")));
        let (dump, error) = {
            let state = self.state.lock().unwrap();
            (state.dump.clone(), state.dump_error.clone())
        };

        if let Some(message) = error {
            sink.write_all(&dump[..dump.len() / 2])?;
            return Err(failed("pg_dump", &message));
        }
        sink.write_all(&dump)?;
        Ok(dump.len() as u64)
    }

    async fn exec_from_reader(
        &self,
        _project: &ComposeProject,
        service: &str,
        command: &[String],
        source: &mut (dyn Read + Send),
    ) -> Result<(), RuntimeError> {
        self.record(format!("restore {} {}", service, command.join(" ")));
        let mut buf = Vec::new();
        source.read_to_end(&mut buf)?;
        self.state.lock().unwrap().restored = buf;
        Ok(())
    }
}

#[derive(Default)]
pub struct FakeRegistry {
    reject_login: bool,
    calls: Mutex<Vec<String>>,
}

impl FakeRegistry {
    pub fn rejecting_login() -> Self {
        Self {
            reject_login: true,
            ..Self::default()
        }
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl Registry for FakeRegistry {
    async fn login(&self, credentials: &RegistryCredentials) -> Result<(), RuntimeError> {
        self.calls.lock().unwrap().push(format!("login {}", credentials.username));
        if self.reject_login {
            Err(failed("docker login", "unauthorized: incorrect username or password"))
        } else {
            Ok(())
        }
    }

    async fn build(&self, image: &str, _context: &Path) -> Result<(), RuntimeError> {
        self.calls.lock().unwrap().push(format!("build {}", image));
        Ok(())
    }

    async fn tag(&self, source: &str, target: &str) -> Result<(), RuntimeError> {
        self.calls.lock().unwrap().push(format!("tag {} {}", source, target));
        Ok(())
    }

    async fn push(&self, image: &str) -> Result<(), RuntimeError> {
        self.calls.lock().unwrap().push(format!("push {}", image));
        Ok(())
    }
}

pub struct FakeProbe {
    pub healthy: bool,
}

#[async_trait]
impl HealthProbe for FakeProbe {
    async fn probe(&self, url: &str) -> Result<(), HealthError> {
        if self.healthy {
            Ok(())
        } else {
            Err(HealthError::Status {
                url: url.to_string(),
                status: 502,
            })
        }
    }
}

/// Answers from a script; once exhausted every answer is "no"
pub struct ScriptedPrompt {
    answers: Mutex<VecDeque<bool>>,
    questions: Mutex<Vec<String>>,
}

impl ScriptedPrompt {
    pub fn new(answers: &[bool]) -> Self {
        Self {
            answers: Mutex::new(answers.iter().copied().collect()),
            questions: Mutex::new(Vec::new()),
        }
    }

    pub fn questions(&self) -> Vec<String> {
        self.questions.lock().unwrap().clone()
    }
}

impl Prompt for ScriptedPrompt {
    fn confirm(&self, question: &str) -> io::Result<bool> {
        self.questions.lock().unwrap().push(question.to_string());
        Ok(self.answers.lock().unwrap().pop_front().unwrap_or(false))
    }
}
