// `docker compose` implementation of the container runtime boundary

use super::{ComposeProject, ContainerRuntime, ExecOutput, RuntimeError};
use async_trait::async_trait;
use std::ffi::OsStr;
use std::io::{Read, Write};
use std::process::{ExitStatus, Stdio};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWriteExt};
use tokio::process::Command;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

const STREAM_CHUNK: usize = 64 * 1024;

pub struct DockerCompose {
    binary: String,
}

impl DockerCompose {
    pub fn new() -> Self {
        Self {
            binary: "docker".to_string(),
        }
    }

    /// Use a different CLI binary (e.g. `podman`)
    pub fn with_binary(binary: impl Into<String>) -> Self {
        Self { binary: binary.into() }
    }

    fn command<I, S>(&self, project: &ComposeProject, args: I) -> (Command, String)
    where
        I: IntoIterator<Item = S>,
        S: AsRef<OsStr>,
    {
        let mut cmd = Command::new(&self.binary);
        cmd.arg("compose").arg("-f").arg(&project.compose_file);
        if let Some(env_file) = &project.env_file {
            cmd.arg("--env-file").arg(env_file);
        }
        cmd.args(args);
        cmd.envs(project.variables.iter().map(|(k, v)| (k.as_str(), v.as_str())));
        cmd.kill_on_drop(true);

        let description = describe(&cmd);
        (cmd, description)
    }

    fn exec_args(service: &str, command: &[String]) -> Vec<String> {
        let mut args = vec!["exec".to_string(), "-T".to_string(), service.to_string()];
        args.extend(command.iter().cloned());
        args
    }
}

impl Default for DockerCompose {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ContainerRuntime for DockerCompose {
    async fn up(&self, project: &ComposeProject) -> Result<(), RuntimeError> {
        let (mut cmd, description) = self.command(project, ["up", "-d"]);
        run_command(&mut cmd, &description).await.map(|_| ())
    }

    async fn pull(&self, project: &ComposeProject) -> Result<(), RuntimeError> {
        let (mut cmd, description) = self.command(project, ["pull"]);
        run_command(&mut cmd, &description).await.map(|_| ())
    }

    async fn running_services(
        &self,
        project: &ComposeProject,
    ) -> Result<Vec<String>, RuntimeError> {
        let (mut cmd, description) =
            self.command(project, ["ps", "--services", "--filter", "status=running"]);
        let output = run_command(&mut cmd, &description).await?;
        Ok(output
            .stdout
            .lines()
            .map(str::trim)
            .filter(|line| !line.is_empty())
            .map(str::to_string)
            .collect())
    }

    async fn exec(
        &self,
        project: &ComposeProject,
        service: &str,
        command: &[String],
    ) -> Result<ExecOutput, RuntimeError> {
        let (mut cmd, description) = self.command(project, Self::exec_args(service, command));
        run_command(&mut cmd, &description).await
    }

    async fn exec_to_writer(
        &self,
        project: &ComposeProject,
        service: &str,
        command: &[String],
        sink: &mut (dyn Write + Send),
    ) -> Result<u64, RuntimeError> {
        let (mut cmd, description) = self.command(project, Self::exec_args(service, command));
        debug!(command = %description, "Streaming command output");

        let mut child = cmd
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|source| RuntimeError::Spawn {
                command: description.clone(),
                source,
            })?;

        let mut stdout = child
            .stdout
            .take()
            .ok_or_else(|| RuntimeError::Stream(std::io::Error::other("stdout was not captured")))?;
        let stderr_task = child.stderr.take().map(collect_stderr);

        let mut buf = vec![0u8; STREAM_CHUNK];
        let mut total = 0u64;
        loop {
            let n = stdout.read(&mut buf).await?;
            if n == 0 {
                break;
            }
            sink.write_all(&buf[..n])?;
            total += n as u64;
        }
        sink.flush()?;

        let status = child.wait().await?;
        check_status(status, &description, stderr_task).await?;
        Ok(total)
    }

    async fn exec_from_reader(
        &self,
        project: &ComposeProject,
        service: &str,
        command: &[String],
        source: &mut (dyn Read + Send),
    ) -> Result<(), RuntimeError> {
        let (mut cmd, description) = self.command(project, Self::exec_args(service, command));
        debug!(command = %description, "Streaming input into command");

        let mut child = cmd
            .stdin(Stdio::piped())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|source| RuntimeError::Spawn {
                command: description.clone(),
                source,
            })?;

        let mut stdin = child
            .stdin
            .take()
            .ok_or_else(|| RuntimeError::Stream(std::io::Error::other("stdin was not captured")))?;
        let stderr_task = child.stderr.take().map(collect_stderr);

        let mut buf = vec![0u8; STREAM_CHUNK];
        let mut write_error = None;
        loop {
            let n = source.read(&mut buf)?;
            if n == 0 {
                break;
            }
            if let Err(e) = stdin.write_all(&buf[..n]).await {
                // The child closed its stdin early; its exit status says why.
                warn!(command = %description, error = %e, "Input stream closed by command");
                write_error = Some(e);
                break;
            }
        }
        drop(stdin);

        let status = child.wait().await?;
        check_status(status, &description, stderr_task).await?;
        match write_error {
            Some(e) => Err(RuntimeError::Stream(e)),
            None => Ok(()),
        }
    }
}

/// Run to completion, capturing output; non-zero exit becomes `CommandFailed`
pub(crate) async fn run_command(
    cmd: &mut Command,
    description: &str,
) -> Result<ExecOutput, RuntimeError> {
    debug!(command = %description, "Running command");

    let output = cmd
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .output()
        .await
        .map_err(|source| RuntimeError::Spawn {
            command: description.to_string(),
            source,
        })?;

    let stdout = String::from_utf8_lossy(&output.stdout).into_owned();
    let stderr = String::from_utf8_lossy(&output.stderr).into_owned();

    if !output.status.success() {
        return Err(RuntimeError::CommandFailed {
            command: description.to_string(),
            code: output.status.code(),
            stderr: stderr.trim().to_string(),
        });
    }

    Ok(ExecOutput { stdout, stderr })
}

/// Like [`run_command`], but writes `input` to the child's stdin first
pub(crate) async fn run_command_with_input(
    cmd: &mut Command,
    description: &str,
    input: &[u8],
) -> Result<ExecOutput, RuntimeError> {
    debug!(command = %description, "Running command with stdin");

    let mut child = cmd
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
        .map_err(|source| RuntimeError::Spawn {
            command: description.to_string(),
            source,
        })?;

    if let Some(mut stdin) = child.stdin.take() {
        stdin.write_all(input).await?;
    }

    let output = child.wait_with_output().await?;
    let stdout = String::from_utf8_lossy(&output.stdout).into_owned();
    let stderr = String::from_utf8_lossy(&output.stderr).into_owned();

    if !output.status.success() {
        return Err(RuntimeError::CommandFailed {
            command: description.to_string(),
            code: output.status.code(),
            stderr: stderr.trim().to_string(),
        });
    }

    Ok(ExecOutput { stdout, stderr })
}

pub(crate) fn describe(cmd: &Command) -> String {
    let std_cmd = cmd.as_std();
    std::iter::once(std_cmd.get_program())
        .chain(std_cmd.get_args())
        .map(|part| part.to_string_lossy().into_owned())
        .collect::<Vec<_>>()
        .join(" ")
}

fn collect_stderr<R>(mut stderr: R) -> JoinHandle<String>
where
    R: AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let mut buf = String::new();
        let _ = stderr.read_to_string(&mut buf).await;
        buf
    })
}

async fn check_status(
    status: ExitStatus,
    description: &str,
    stderr_task: Option<JoinHandle<String>>,
) -> Result<(), RuntimeError> {
    let stderr = match stderr_task {
        Some(task) => task.await.unwrap_or_default(),
        None => String::new(),
    };

    if status.success() {
        Ok(())
    } else {
        Err(RuntimeError::CommandFailed {
            command: description.to_string(),
            code: status.code(),
            stderr: stderr.trim().to_string(),
        })
    }
}
