//! Database engine boundary: dump, restore and schema migration, all executed
//! inside the compose project's containers.

use crate::environment::Environment;
use crate::runtime::{ComposeProject, ContainerRuntime, RuntimeError};
use crate::OpsError;
use serde::Serialize;
use std::io::{Read, Write};
use tracing::{debug, info};

/// Where a database lives and how to reach it
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DatabaseTarget {
    /// `None` for the local development stack
    pub environment: Option<Environment>,
    #[serde(skip)]
    pub project: ComposeProject,
    pub db_service: String,
    pub backend_service: String,
    pub user: String,
    pub database: String,
}

impl DatabaseTarget {
    pub fn label(&self) -> &'static str {
        self.environment.map(|env| env.as_str()).unwrap_or("dev")
    }

    pub fn dump_command(&self) -> Vec<String> {
        vec![
            "pg_dump".to_string(),
            "-U".to_string(),
            self.user.clone(),
            self.database.clone(),
        ]
    }

    pub fn restore_command(&self) -> Vec<String> {
        vec![
            "psql".to_string(),
            "-v".to_string(),
            "ON_ERROR_STOP=1".to_string(),
            "-U".to_string(),
            self.user.clone(),
            self.database.clone(),
        ]
    }

    pub fn migration_command(&self) -> Vec<String> {
        vec!["alembic".to_string(), "upgrade".to_string(), "head".to_string()]
    }
}

/// Database operations against one target
pub struct Database<'a> {
    runtime: &'a dyn ContainerRuntime,
    target: &'a DatabaseTarget,
}

impl<'a> Database<'a> {
    pub fn new(runtime: &'a dyn ContainerRuntime, target: &'a DatabaseTarget) -> Self {
        Self { runtime, target }
    }

    /// Fails with `ServiceUnavailable` unless the database service is running
    pub async fn ensure_available(&self) -> Result<(), OpsError> {
        let unavailable = |detail: String| {
            OpsError::ServiceUnavailable(format!(
                "database service '{}' for {}: {}",
                self.target.db_service,
                self.target.label(),
                detail
            ))
        };

        match self
            .runtime
            .is_running(&self.target.project, &self.target.db_service)
            .await
        {
            Ok(true) => Ok(()),
            Ok(false) => Err(unavailable("not running".to_string())),
            Err(e) => Err(unavailable(e.to_string())),
        }
    }

    pub async fn is_running(&self) -> bool {
        self.ensure_available().await.is_ok()
    }

    /// Stream a plain SQL dump into `sink`, returning the uncompressed byte count
    pub async fn dump_to(&self, sink: &mut (dyn Write + Send)) -> Result<u64, OpsError> {
        debug!(target_db = %self.target.database, "Dumping database");
        self.runtime
            .exec_to_writer(
                &self.target.project,
                &self.target.db_service,
                &self.target.dump_command(),
                sink,
            )
            .await
            .map_err(|e| OpsError::DumpFailed(e.to_string()))
    }

    /// Feed a plain SQL dump into the database
    pub async fn restore_from(&self, source: &mut (dyn Read + Send)) -> Result<(), OpsError> {
        info!(target_db = %self.target.database, "Restoring database");
        self.runtime
            .exec_from_reader(
                &self.target.project,
                &self.target.db_service,
                &self.target.restore_command(),
                source,
            )
            .await
            .map_err(|e| OpsError::RestoreFailed(e.to_string()))
    }

    /// Apply pending schema migrations from the backend image
    pub async fn migrate(&self) -> Result<(), OpsError> {
        info!(service = %self.target.backend_service, "Running schema migrations");
        match self
            .runtime
            .exec(
                &self.target.project,
                &self.target.backend_service,
                &self.target.migration_command(),
            )
            .await
        {
            Ok(output) => {
                debug!(stdout = %output.stdout.trim(), "Migrations applied");
                Ok(())
            }
            Err(RuntimeError::CommandFailed { stderr, code, .. }) => Err(OpsError::MigrationFailed(
                format!("exit code {:?}: {}", code, stderr),
            )),
            Err(e) => Err(OpsError::MigrationFailed(e.to_string())),
        }
    }
}
