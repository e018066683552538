// Container orchestration boundary
// Anything with compose-style primitives (up, pull, ps, exec) can sit behind this trait

use async_trait::async_trait;
use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use thiserror::Error;

pub mod compose;

pub use compose::DockerCompose;

#[derive(Debug, Error)]
pub enum RuntimeError {
    #[error("Failed to launch `{command}`: {source}")]
    Spawn {
        command: String,
        #[source]
        source: std::io::Error,
    },
    #[error("`{command}` exited with {code:?}: {stderr}")]
    CommandFailed {
        command: String,
        code: Option<i32>,
        stderr: String,
    },
    #[error("Service '{0}' is not running")]
    ServiceNotRunning(String),
    #[error("Stream error: {0}")]
    Stream(#[from] std::io::Error),
}

/// A compose file plus the variables its interpolation needs
#[derive(Debug, Clone, PartialEq)]
pub struct ComposeProject {
    pub compose_file: PathBuf,
    pub env_file: Option<PathBuf>,
    pub variables: Vec<(String, String)>,
}

impl ComposeProject {
    pub fn new(compose_file: impl Into<PathBuf>) -> Self {
        Self {
            compose_file: compose_file.into(),
            env_file: None,
            variables: Vec::new(),
        }
    }

    /// Attach an env file only when it exists on disk
    pub fn with_env_file(mut self, env_file: impl AsRef<Path>) -> Self {
        let env_file = env_file.as_ref();
        if env_file.is_file() {
            self.env_file = Some(env_file.to_path_buf());
        }
        self
    }

    pub fn with_variable(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        let key = key.into();
        self.variables.retain(|(k, _)| k != &key);
        self.variables.push((key, value.into()));
        self
    }

    pub fn variable(&self, key: &str) -> Option<&str> {
        self.variables
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }
}

/// Captured result of a non-streaming exec
#[derive(Debug, Clone, Default)]
pub struct ExecOutput {
    pub stdout: String,
    pub stderr: String,
}

#[async_trait]
pub trait ContainerRuntime: Send + Sync {
    /// Create or recreate the project's services in the background
    async fn up(&self, project: &ComposeProject) -> Result<(), RuntimeError>;

    /// Pull every image the project references
    async fn pull(&self, project: &ComposeProject) -> Result<(), RuntimeError>;

    /// Names of services currently in the running state
    async fn running_services(&self, project: &ComposeProject) -> Result<Vec<String>, RuntimeError>;

    /// Run a command inside a service container and capture its output
    async fn exec(
        &self,
        project: &ComposeProject,
        service: &str,
        command: &[String],
    ) -> Result<ExecOutput, RuntimeError>;

    /// Run a command inside a service container, streaming stdout into `sink`.
    /// Returns the number of bytes written.
    async fn exec_to_writer(
        &self,
        project: &ComposeProject,
        service: &str,
        command: &[String],
        sink: &mut (dyn Write + Send),
    ) -> Result<u64, RuntimeError>;

    /// Run a command inside a service container, feeding `source` to its stdin
    async fn exec_from_reader(
        &self,
        project: &ComposeProject,
        service: &str,
        command: &[String],
        source: &mut (dyn Read + Send),
    ) -> Result<(), RuntimeError>;

    async fn is_running(
        &self,
        project: &ComposeProject,
        service: &str,
    ) -> Result<bool, RuntimeError> {
        Ok(self
            .running_services(project)
            .await?
            .iter()
            .any(|s| s == service))
    }
}
