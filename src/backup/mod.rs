// Backup lifecycle: one verified artifact per run, tiered by calendar date,
// deleted only by the retention sweep

pub mod manager;
pub mod storage;
pub mod types;

pub use manager::{default_export_name, ensure_intact, verify_artifact, BackupManager};
pub use storage::{BackupStorage, FileBackupStorage};
pub use types::{
    BackupArtifact, ExportReport, RestoreReport, RetentionPolicy, SweepReport, Tier,
    VerificationResult,
};
