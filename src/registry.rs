//! Image registry boundary and the build/push flow

use crate::config::OpsConfig;
use crate::console::{Console, Prompt};
use crate::runtime::compose::{describe, run_command, run_command_with_input};
use crate::runtime::RuntimeError;
use crate::OpsError;
use async_trait::async_trait;
use serde::Serialize;
use std::ffi::OsStr;
use std::fmt;
use std::path::{Path, PathBuf};
use tokio::process::Command;
use tracing::info;

#[derive(Clone, PartialEq, Eq)]
pub struct RegistryCredentials {
    pub registry: String,
    pub username: String,
    pub password: String,
}

impl fmt::Debug for RegistryCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RegistryCredentials")
            .field("registry", &self.registry)
            .field("username", &self.username)
            .field("password", &"***")
            .finish()
    }
}

#[async_trait]
pub trait Registry: Send + Sync {
    async fn login(&self, credentials: &RegistryCredentials) -> Result<(), RuntimeError>;
    async fn build(&self, image: &str, context: &Path) -> Result<(), RuntimeError>;
    async fn tag(&self, source: &str, target: &str) -> Result<(), RuntimeError>;
    async fn push(&self, image: &str) -> Result<(), RuntimeError>;
}

/// Registry operations through the `docker` CLI
pub struct DockerRegistry {
    binary: String,
}

impl DockerRegistry {
    pub fn new() -> Self {
        Self {
            binary: "docker".to_string(),
        }
    }

    fn command<I, S>(&self, args: I) -> (Command, String)
    where
        I: IntoIterator<Item = S>,
        S: AsRef<OsStr>,
    {
        let mut cmd = Command::new(&self.binary);
        cmd.args(args);
        cmd.kill_on_drop(true);
        let description = describe(&cmd);
        (cmd, description)
    }
}

impl Default for DockerRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Registry for DockerRegistry {
    async fn login(&self, credentials: &RegistryCredentials) -> Result<(), RuntimeError> {
        let (mut cmd, description) = self.command([
            "login",
            credentials.registry.as_str(),
            "--username",
            credentials.username.as_str(),
            "--password-stdin",
        ]);
        run_command_with_input(&mut cmd, &description, credentials.password.as_bytes())
            .await
            .map(|_| ())
    }

    async fn build(&self, image: &str, context: &Path) -> Result<(), RuntimeError> {
        let (mut cmd, description) = self.command([
            OsStr::new("build"),
            OsStr::new("-t"),
            OsStr::new(image),
            context.as_os_str(),
        ]);
        run_command(&mut cmd, &description).await.map(|_| ())
    }

    async fn tag(&self, source: &str, target: &str) -> Result<(), RuntimeError> {
        let (mut cmd, description) = self.command(["tag", source, target]);
        run_command(&mut cmd, &description).await.map(|_| ())
    }

    async fn push(&self, image: &str) -> Result<(), RuntimeError> {
        let (mut cmd, description) = self.command(["push", image]);
        run_command(&mut cmd, &description).await.map(|_| ())
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct PublishReport {
    pub image: String,
    pub pushed: Vec<String>,
}

/// Build, confirm and push `<registry>/<image>:<tag>` plus `:latest`
pub struct ImagePublisher<'a> {
    registry: &'a dyn Registry,
    prompt: &'a dyn Prompt,
    console: Console,
}

impl<'a> ImagePublisher<'a> {
    pub fn new(registry: &'a dyn Registry, prompt: &'a dyn Prompt, console: Console) -> Self {
        Self {
            registry,
            prompt,
            console,
        }
    }

    pub async fn publish(
        &self,
        config: &OpsConfig,
        tag: &str,
        context: &Path,
    ) -> Result<PublishReport, OpsError> {
        let credentials = config.credentials.as_ref().ok_or_else(|| {
            OpsError::AuthRequired(
                "REGISTRY_USERNAME and REGISTRY_PASSWORD must be set to push images".to_string(),
            )
        })?;

        self.console.step(&format!("Logging in to {}", credentials.registry));
        self.registry
            .login(credentials)
            .await
            .map_err(|e| OpsError::AuthFailed(e.to_string()))?;

        let image = config.image_reference(tag);
        let latest = config.image_reference("latest");

        self.console.step(&format!("Building {}", image));
        self.registry
            .build(&image, context)
            .await
            .map_err(|e| OpsError::PublishFailed(e.to_string()))?;

        if !self.prompt.confirm(&format!("Push {} to {}?", image, credentials.registry))? {
            return Err(OpsError::Aborted(format!("push of {}", image)));
        }

        let mut references = vec![image.clone()];
        if latest != image {
            references.push(latest);
        }

        let mut pushed = Vec::new();
        for reference in &references {
            if reference != &image {
                self.registry
                    .tag(&image, reference)
                    .await
                    .map_err(|e| OpsError::PublishFailed(e.to_string()))?;
            }
            self.console.step(&format!("Pushing {}", reference));
            self.registry
                .push(reference)
                .await
                .map_err(|e| OpsError::PublishFailed(e.to_string()))?;
            pushed.push(reference.clone());
        }

        info!(image = %image, "Image published");
        self.console.success(&format!("Published {}", image));

        Ok(PublishReport { image, pushed })
    }
}

/// Build context used when none is given: the workspace root
pub fn default_build_context(config: &OpsConfig) -> PathBuf {
    config.root().to_path_buf()
}
