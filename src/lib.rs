//! # solar-ops
//!
//! Operator tooling for the solar backend stack: tiered database backups with
//! retention, ad hoc snapshot exports, restores, image publishing and
//! environment deployments on top of `docker compose`.
//!
//! ## Quick Start
//!
//! ```no_run
//! use std::sync::Arc;
//! use solar_ops::backup::{BackupManager, FileBackupStorage};
//! use solar_ops::clock::SystemClock;
//! use solar_ops::config::OpsConfig;
//! use solar_ops::environment::Environment;
//! use solar_ops::runtime::DockerCompose;
//!
//! # async fn example() -> solar_ops::Result<()> {
//! let config = OpsConfig::load_or_default(".", Environment::Staging)?;
//! let manager = BackupManager::new(
//!     Arc::new(DockerCompose::new()),
//!     Box::new(FileBackupStorage::new(config.root())),
//!     Arc::new(SystemClock),
//! );
//!
//! let artifact = manager.run_backup(&config.database_target()).await?;
//! println!("{}", artifact.path.display());
//! # Ok(())
//! # }
//! ```
//!
//! ## Modules
//!
//! - [`backup`]: Tier assignment, artifact storage, verification and retention
//! - [`deploy`]: Deployment sequencing with the pre/post backup gates
//! - [`runtime`]: Container orchestration boundary
//! - [`database`]: Dump, restore and migration commands
//! - [`registry`]: Image registry login, build and push
//! - [`health`]: Health endpoint probing

#![warn(rustdoc::missing_crate_level_docs)]

use thiserror::Error;

/// Result type for operator commands
pub type Result<T> = std::result::Result<T, OpsError>;

/// Main error type for operator commands
#[derive(Error, Debug)]
pub enum OpsError {
    /// Environment name outside the fixed set
    #[error("Invalid environment '{0}' (expected one of: test, staging, prod)")]
    InvalidEnvironment(String),

    /// A required configuration or compose file is absent
    #[error("Configuration missing: {0}")]
    ConfigMissing(String),

    /// A configuration value could not be interpreted
    #[error("Configuration error: {0}")]
    Config(String),

    /// Registry credentials are mandatory for this operation
    #[error("Registry credentials required: {0}")]
    AuthRequired(String),

    /// Registry login was rejected
    #[error("Registry authentication failed: {0}")]
    AuthFailed(String),

    /// Image pull did not complete; services were left untouched
    #[error("Image pull failed: {0}")]
    PullFailed(String),

    /// The database-bearing (or backend) service is not reachable
    #[error("Service unavailable: {0}")]
    ServiceUnavailable(String),

    /// The dump tool exited with an error
    #[error("Database dump failed: {0}")]
    DumpFailed(String),

    /// The restore tool exited with an error
    #[error("Database restore failed: {0}")]
    RestoreFailed(String),

    /// A produced or supplied artifact is not a valid gzip stream
    #[error("Integrity check failed for {path}: {reason}")]
    IntegrityCheckFailed {
        /// Artifact under inspection
        path: std::path::PathBuf,
        /// Decoder diagnostic
        reason: String,
    },

    /// An artifact with the same name already exists; it is left untouched
    #[error("Backup artifact already exists: {0}")]
    ArtifactExists(std::path::PathBuf),

    /// Schema migration failed inside the backend service
    #[error("Migration failed: {0}")]
    MigrationFailed(String),

    /// Health endpoint never reported success
    #[error("Health check failed: {0}")]
    HealthCheckFailed(String),

    /// Image build or push failed
    #[error("Image publish failed: {0}")]
    PublishFailed(String),

    /// Another deployment holds the lock for this environment
    #[error("Deployment already in progress: {0}")]
    DeploymentInProgress(String),

    /// Operator declined a confirmation prompt
    #[error("Aborted by operator: {0}")]
    Aborted(String),

    /// Container runtime failure
    #[error("Container runtime error: {0}")]
    Runtime(#[from] runtime::RuntimeError),

    /// Serialization error for reports
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Filesystem error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Deployment environments
pub mod environment;

/// Configuration loaded from per-environment env files
pub mod config;

/// Time source
pub mod clock;

/// Backup lifecycle: tiers, artifacts, verification, retention
pub mod backup;

/// Container orchestration boundary
pub mod runtime;

/// Database engine boundary
pub mod database;

/// Image registry boundary
pub mod registry;

/// HTTP health boundary
pub mod health;

/// Retry and backoff for readiness polling
pub mod resilience;

/// Deployment orchestration
pub mod deploy;

/// Operator-facing output and confirmation prompts
pub mod console;
