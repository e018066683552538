// Backup Storage - tiered directory layout on the local filesystem
// <root>/<environment>/backups/{daily,weekly,monthly}/backup_<env>_<tier>_<ts>.sql.gz

use super::types::{BackupArtifact, Tier};
use crate::environment::Environment;
use crate::OpsError;
use async_trait::async_trait;
use chrono::NaiveDateTime;
use std::path::{Path, PathBuf};
use tokio::fs;
use tracing::debug;

#[async_trait]
pub trait BackupStorage: Send + Sync {
    /// Create the tier directory if needed and return the artifact's destination path
    async fn prepare_artifact(
        &self,
        environment: Environment,
        tier: Tier,
        created_at: NaiveDateTime,
    ) -> Result<PathBuf, OpsError>;

    /// Artifacts of one environment, optionally limited to one tier, newest first.
    /// Files that do not match the environment/tier naming pattern are ignored.
    async fn list_artifacts(
        &self,
        environment: Environment,
        tier: Option<Tier>,
    ) -> Result<Vec<BackupArtifact>, OpsError>;

    async fn delete_artifact(&self, artifact: &BackupArtifact) -> Result<(), OpsError>;
}

pub struct FileBackupStorage {
    root: PathBuf,
}

impl FileBackupStorage {
    pub fn new(root: impl AsRef<Path>) -> Self {
        Self {
            root: root.as_ref().to_path_buf(),
        }
    }

    pub fn tier_directory(&self, environment: Environment, tier: Tier) -> PathBuf {
        environment
            .directory(&self.root)
            .join("backups")
            .join(tier.as_str())
    }

    async fn list_tier(
        &self,
        environment: Environment,
        tier: Tier,
    ) -> Result<Vec<BackupArtifact>, OpsError> {
        let directory = self.tier_directory(environment, tier);
        if !directory.is_dir() {
            return Ok(Vec::new());
        }

        let mut entries = fs::read_dir(&directory).await?;
        let mut artifacts = Vec::new();

        while let Some(entry) = entries.next_entry().await? {
            let metadata = entry.metadata().await?;
            if !metadata.is_file() {
                continue;
            }

            let path = entry.path();
            match BackupArtifact::from_path(&path, metadata.len()) {
                // A file of another environment or tier copied into this directory is left alone.
                Some(artifact) if artifact.environment == environment && artifact.tier == tier => {
                    artifacts.push(artifact)
                }
                _ => debug!(path = %path.display(), "Skipping foreign file"),
            }
        }

        Ok(artifacts)
    }
}

#[async_trait]
impl BackupStorage for FileBackupStorage {
    async fn prepare_artifact(
        &self,
        environment: Environment,
        tier: Tier,
        created_at: NaiveDateTime,
    ) -> Result<PathBuf, OpsError> {
        let directory = self.tier_directory(environment, tier);
        fs::create_dir_all(&directory).await?;
        Ok(directory.join(BackupArtifact::file_name(environment, tier, created_at)))
    }

    async fn list_artifacts(
        &self,
        environment: Environment,
        tier: Option<Tier>,
    ) -> Result<Vec<BackupArtifact>, OpsError> {
        let tiers: Vec<Tier> = match tier {
            Some(tier) => vec![tier],
            None => Tier::ALL.to_vec(),
        };

        let mut artifacts = Vec::new();
        for tier in tiers {
            artifacts.extend(self.list_tier(environment, tier).await?);
        }

        // Sort by creation time (newest first)
        artifacts.sort_by(|a, b| b.created_at.cmp(&a.created_at).then_with(|| a.path.cmp(&b.path)));
        Ok(artifacts)
    }

    async fn delete_artifact(&self, artifact: &BackupArtifact) -> Result<(), OpsError> {
        match fs::remove_file(&artifact.path).await {
            Ok(()) => Ok(()),
            // Already gone
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}
