//! Deployment orchestration
//!
//! The sequence is fail-fast: any failed prerequisite aborts the remaining
//! steps and nothing is rolled back. The only step that may fail without
//! failing the deployment is the health check under [`HealthCheckPolicy::Warn`].
//!
//! 1. env file and compose file must exist
//! 2. one deployment per environment at a time (lock file)
//! 3. registry login, mandatory for production
//! 4. production guards (secure cookies, https base URL), operator override
//! 5. pre-deployment backup when the database is already running
//! 6. pull, recreate, wait for readiness, migrate
//! 7. health check
//! 8. production: post-deployment backup

use crate::backup::{BackupArtifact, BackupManager};
use crate::config::{HealthCheckPolicy, OpsConfig};
use crate::console::{Console, Prompt};
use crate::database::Database;
use crate::environment::Environment;
use crate::health::{wait_until_healthy, HealthProbe};
use crate::registry::Registry;
use crate::resilience::RetryExecutor;
use crate::runtime::{ContainerRuntime, RuntimeError};
use crate::OpsError;
use serde::Serialize;
use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{info, instrument, warn};
use uuid::Uuid;

/// Exclusive marker file held for the duration of a deployment
#[derive(Debug)]
pub struct DeployLock {
    path: PathBuf,
}

impl DeployLock {
    pub fn acquire(path: &Path, deployment_id: &str) -> Result<Self, OpsError> {
        Self::acquire_with(path, deployment_id, write_holder)
    }

    fn acquire_with<F>(path: &Path, deployment_id: &str, fill: F) -> Result<Self, OpsError>
    where
        F: FnOnce(&mut File, &str) -> std::io::Result<()>,
    {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }

        match OpenOptions::new().write(true).create_new(true).open(path) {
            Ok(mut file) => {
                // Dropped if the write fails, which removes the file again
                let lock = Self {
                    path: path.to_path_buf(),
                };
                fill(&mut file, deployment_id)?;
                Ok(lock)
            }
            Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => {
                let holder = fs::read_to_string(path).unwrap_or_default();
                Err(OpsError::DeploymentInProgress(format!(
                    "{} is held by {} (remove it if no deployment is running)",
                    path.display(),
                    holder.trim()
                )))
            }
            Err(e) => Err(e.into()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

fn write_holder(file: &mut File, deployment_id: &str) -> std::io::Result<()> {
    writeln!(file, "{} pid={}", deployment_id, std::process::id())?;
    file.flush()
}

impl Drop for DeployLock {
    fn drop(&mut self) {
        if let Err(e) = fs::remove_file(&self.path) {
            warn!(path = %self.path.display(), error = %e, "Failed to release deployment lock");
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct DeployReport {
    pub deployment_id: String,
    pub environment: Environment,
    pub image_tag: String,
    pub pre_backup: Option<BackupArtifact>,
    pub post_backup: Option<BackupArtifact>,
    /// `false` only when the health check failed under the `warn` policy
    pub healthy: bool,
    pub warnings: Vec<String>,
}

pub struct Deployer {
    runtime: Arc<dyn ContainerRuntime>,
    registry: Arc<dyn Registry>,
    probe: Arc<dyn HealthProbe>,
    prompt: Arc<dyn Prompt>,
    backups: BackupManager,
    console: Console,
}

impl Deployer {
    pub fn new(
        runtime: Arc<dyn ContainerRuntime>,
        registry: Arc<dyn Registry>,
        probe: Arc<dyn HealthProbe>,
        prompt: Arc<dyn Prompt>,
        backups: BackupManager,
    ) -> Self {
        Self {
            runtime,
            registry,
            probe,
            prompt,
            backups,
            console: Console::default(),
        }
    }

    pub fn with_console(mut self, console: Console) -> Self {
        self.console = console;
        self
    }

    #[instrument(skip(self, config), fields(environment = %config.environment))]
    pub async fn deploy(
        &self,
        config: &OpsConfig,
        image_tag: &str,
    ) -> Result<DeployReport, OpsError> {
        let environment = config.environment;
        let deployment_id = Uuid::new_v4().to_string();
        let mut warnings = Vec::new();

        let env_file = environment.env_file(config.root());
        if !env_file.is_file() {
            return Err(OpsError::ConfigMissing(format!("{} not found", env_file.display())));
        }
        let compose_file = config.compose_file();
        if !compose_file.is_file() {
            return Err(OpsError::ConfigMissing(format!("{} not found", compose_file.display())));
        }

        let _lock = DeployLock::acquire(&config.lock_file(), &deployment_id)?;
        info!(deployment_id = %deployment_id, image_tag = %image_tag, "Starting deployment");
        self.console
            .step(&format!("Deploying {} to {} ({})", image_tag, environment, deployment_id));

        // Registry authentication
        match &config.credentials {
            Some(credentials) => {
                self.console.step(&format!("Logging in to {}", credentials.registry));
                self.registry
                    .login(credentials)
                    .await
                    .map_err(|e| OpsError::AuthFailed(e.to_string()))?;
            }
            None if environment.is_production() => {
                return Err(OpsError::AuthRequired(
                    "REGISTRY_USERNAME and REGISTRY_PASSWORD must be set for production"
                        .to_string(),
                ));
            }
            None => {
                let message = "No registry credentials configured, pulling anonymously".to_string();
                warn!("{}", message);
                self.console.warn(&message);
                warnings.push(message);
            }
        }

        if environment.is_production() {
            let violations = [config.cookie_guard_violation(), config.base_url_guard_violation()];
            for violation in violations.into_iter().flatten() {
                warn!(violation = %violation, "Production guard failed");
                self.console.warn(&violation);
                if !self.prompt.confirm(&format!("{}. Continue anyway?", violation))? {
                    return Err(OpsError::Aborted(violation));
                }
                warnings.push(violation);
            }

            if !self
                .prompt
                .confirm(&format!("Deploy {} to PRODUCTION?", image_tag))?
            {
                return Err(OpsError::Aborted("production deployment not confirmed".to_string()));
            }
        }

        let project = config.compose_project().with_variable("IMAGE_TAG", image_tag);
        let mut target = config.database_target();
        target.project = project.clone();

        let pre_backup = if Database::new(self.runtime.as_ref(), &target).is_running().await {
            self.console.step("Taking pre-deployment backup");
            Some(self.backups.run_backup(&target).await?)
        } else {
            self.console.info("Database is not running, skipping pre-deployment backup");
            None
        };

        self.console.step("Pulling images");
        self.runtime
            .pull(&project)
            .await
            .map_err(|e| OpsError::PullFailed(e.to_string()))?;

        self.console.step("Recreating services");
        self.runtime.up(&project).await?;

        let runtime = self.runtime.as_ref();
        let backend = target.backend_service.as_str();
        let project_ref = &project;
        RetryExecutor::new(config.readiness_retry.clone())
            .execute(move || async move {
                match runtime.is_running(project_ref, backend).await {
                    Ok(true) => Ok(()),
                    Ok(false) => Err(RuntimeError::ServiceNotRunning(backend.to_string())),
                    Err(e) => Err(e),
                }
            })
            .await
            .map_err(|e| {
                OpsError::ServiceUnavailable(format!("'{}' did not come up: {}", backend, e))
            })?;

        self.console.step("Running migrations");
        Database::new(self.runtime.as_ref(), &target).migrate().await?;

        self.console.step(&format!("Checking {}", config.health_url));
        let health_check =
            wait_until_healthy(self.probe.as_ref(), &config.health_url, &config.health_retry);
        let healthy = match health_check.await {
            Ok(()) => true,
            Err(e) => match config.health_check_policy {
                HealthCheckPolicy::Strict => return Err(OpsError::HealthCheckFailed(e.to_string())),
                HealthCheckPolicy::Warn => {
                    let message = format!("Health check failed ({}); no rollback was attempted", e);
                    warn!("{}", message);
                    self.console.warn(&message);
                    warnings.push(message);
                    false
                }
            },
        };

        let post_backup = if environment.is_production() {
            self.console.step("Taking post-deployment backup");
            Some(self.backups.run_backup(&target).await?)
        } else {
            None
        };

        info!(deployment_id = %deployment_id, healthy = healthy, "Deployment finished");
        self.console
            .success(&format!("Deployment of {} to {} complete", image_tag, environment));

        Ok(DeployReport {
            deployment_id,
            environment,
            image_tag: image_tag.to_string(),
            pre_backup,
            post_backup,
            healthy,
            warnings,
        })
    }
}
