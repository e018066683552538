// Backup Manager - tiered backup runs, verification, retention sweeps, exports and restores

use super::storage::BackupStorage;
use super::types::{
    BackupArtifact, ExportReport, RestoreReport, RetentionPolicy, SweepReport, Tier,
    VerificationResult,
};
use crate::clock::Clock;
use crate::console::{human_size, Console, Prompt};
use crate::database::{Database, DatabaseTarget};
use crate::environment::Environment;
use crate::runtime::ContainerRuntime;
use crate::OpsError;
use chrono::NaiveDateTime;
use flate2::bufread;
use flate2::write::GzEncoder;
use flate2::Compression;
use sha2::{Digest, Sha256};
use std::fs::{File, OpenOptions};
use std::io::{self, BufRead, BufReader, BufWriter, Read, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{error, info, warn};

pub struct BackupManager {
    runtime: Arc<dyn ContainerRuntime>,
    storage: Box<dyn BackupStorage + Send + Sync>,
    clock: Arc<dyn Clock>,
    policy: RetentionPolicy,
    compression_level: u32,
    export_dir: PathBuf,
    console: Console,
}

impl BackupManager {
    pub fn new(
        runtime: Arc<dyn ContainerRuntime>,
        storage: Box<dyn BackupStorage + Send + Sync>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            runtime,
            storage,
            clock,
            policy: RetentionPolicy::standard(),
            compression_level: 6,
            export_dir: PathBuf::from("."),
            console: Console::default(),
        }
    }

    pub fn with_compression_level(mut self, level: u32) -> Self {
        self.compression_level = level.min(9); // Max level is 9
        self
    }

    /// Directory for exports when no output path is given
    pub fn with_export_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.export_dir = dir.into();
        self
    }

    pub fn with_console(mut self, console: Console) -> Self {
        self.console = console;
        self
    }

    pub fn policy(&self) -> &RetentionPolicy {
        &self.policy
    }

    /// Dump the environment's database into a freshly created, tiered artifact
    /// and verify it. A failed verification leaves the file in place.
    pub async fn run_backup(&self, target: &DatabaseTarget) -> Result<BackupArtifact, OpsError> {
        let environment = target.environment.ok_or_else(|| {
            OpsError::InvalidEnvironment("tiered backups need a deployment environment".to_string())
        })?;

        let db = Database::new(self.runtime.as_ref(), target);
        db.ensure_available().await?;

        let created_at = self.clock.now();
        let tier = Tier::for_date(created_at.date());
        let path = self
            .storage
            .prepare_artifact(environment, tier, created_at)
            .await?;

        // Never rewrite an existing artifact
        let file = match OpenOptions::new().write(true).create_new(true).open(&path) {
            Ok(file) => file,
            Err(e) if e.kind() == io::ErrorKind::AlreadyExists => {
                return Err(OpsError::ArtifactExists(path))
            }
            Err(e) => return Err(e.into()),
        };

        info!(
            environment = %environment,
            tier = %tier,
            path = %path.display(),
            "Starting backup"
        );

        let uncompressed = match self.dump_compressed(&db, file).await {
            Ok(bytes) => bytes,
            Err(e) => {
                error!(
                    path = %path.display(),
                    error = %e,
                    "Backup failed, removing partial artifact"
                );
                if let Err(remove_err) = std::fs::remove_file(&path) {
                    if remove_err.kind() != io::ErrorKind::NotFound {
                        warn!(
                            path = %path.display(),
                            error = %remove_err,
                            "Could not remove partial artifact"
                        );
                    }
                }
                return Err(e);
            }
        };

        let verification = ensure_intact(&path)?;

        let artifact = BackupArtifact {
            environment,
            tier,
            created_at,
            path,
            size_bytes: verification.compressed_bytes,
        };

        info!(
            environment = %environment,
            tier = %tier,
            uncompressed_bytes = uncompressed,
            compressed_bytes = artifact.size_bytes,
            checksum = %verification.checksum,
            "Backup created successfully"
        );

        self.console.success(&format!(
            "{} backup created: {} ({}, {})",
            tier,
            artifact.path.display(),
            human_size(artifact.size_bytes),
            created_at.format("%Y-%m-%d %H:%M:%S")
        ));

        Ok(artifact)
    }

    async fn dump_compressed(&self, db: &Database<'_>, file: File) -> Result<u64, OpsError> {
        let level = Compression::new(self.compression_level);
        let mut encoder = GzEncoder::new(BufWriter::new(file), level);
        let bytes = db.dump_to(&mut encoder).await?;
        let mut writer = encoder.finish()?;
        writer.flush()?;
        writer
            .into_inner()
            .map_err(|e| OpsError::Io(e.into_error()))?
            .sync_all()?;
        Ok(bytes)
    }

    /// Delete every artifact whose age in whole days exceeds its tier's window
    pub async fn sweep_retention(&self, environment: Environment) -> Result<SweepReport, OpsError> {
        let now = self.clock.now();
        let mut report = SweepReport::default();

        for tier in Tier::ALL {
            let window = self.policy.window_days(tier);
            for artifact in self.storage.list_artifacts(environment, Some(tier)).await? {
                let age = artifact.age(now);
                if self.policy.is_expired(tier, age) {
                    info!(
                        path = %artifact.path.display(),
                        age_days = age.num_days(),
                        window_days = window,
                        "Deleting expired backup"
                    );
                    self.storage.delete_artifact(&artifact).await?;
                    report.deleted.push(artifact.path);
                } else {
                    report.retained += 1;
                }
            }
        }

        info!(
            environment = %environment,
            deleted = report.deleted.len(),
            retained = report.retained,
            "Retention sweep finished"
        );
        self.console.success(&format!(
            "Retention sweep for {}: {} deleted, {} retained",
            environment,
            report.deleted.len(),
            report.retained
        ));

        Ok(report)
    }

    pub async fn list_artifacts(
        &self,
        environment: Environment,
    ) -> Result<Vec<BackupArtifact>, OpsError> {
        self.storage.list_artifacts(environment, None).await
    }

    /// Uncompressed dump of the development database plus a gzip sibling.
    /// Not tiered and never swept.
    pub async fn export_snapshot(
        &self,
        target: &DatabaseTarget,
        output: Option<PathBuf>,
    ) -> Result<ExportReport, OpsError> {
        let db = Database::new(self.runtime.as_ref(), target);
        db.ensure_available().await?;

        let sql_path =
            output.unwrap_or_else(|| self.export_dir.join(default_export_name(self.clock.now())));
        if let Some(parent) = sql_path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }

        info!(path = %sql_path.display(), "Exporting database snapshot");

        let dumped = async {
            let mut writer = BufWriter::new(File::create(&sql_path)?);
            let bytes = db.dump_to(&mut writer).await?;
            writer.flush()?;
            Ok::<u64, OpsError>(bytes)
        }
        .await;

        let sql_bytes = match dumped {
            Ok(bytes) => bytes,
            Err(e) => {
                let _ = std::fs::remove_file(&sql_path);
                return Err(e);
            }
        };

        let gz_path = gz_sibling(&sql_path);
        let gz_bytes = compress_file(&sql_path, &gz_path, self.compression_level)?;

        self.console.success(&format!(
            "Export written: {} ({})",
            sql_path.display(),
            human_size(sql_bytes)
        ));
        self.console.success(&format!(
            "Compressed copy: {} ({})",
            gz_path.display(),
            human_size(gz_bytes)
        ));

        Ok(ExportReport {
            sql_path,
            sql_bytes,
            gz_path,
            gz_bytes,
        })
    }

    /// Verify `source`, then stream its decompressed contents into the database.
    /// Production restores need the operator's confirmation through `prompt`.
    pub async fn restore_backup(
        &self,
        target: &DatabaseTarget,
        source: &Path,
        prompt: &dyn Prompt,
    ) -> Result<RestoreReport, OpsError> {
        let environment = target.environment.ok_or_else(|| {
            OpsError::InvalidEnvironment("restores need a deployment environment".to_string())
        })?;

        let verification = ensure_intact(source)?;

        let db = Database::new(self.runtime.as_ref(), target);
        db.ensure_available().await?;

        if environment.is_production()
            && !prompt.confirm(&format!(
                "Overwrite the PRODUCTION database with {}?",
                source.display()
            ))?
        {
            return Err(OpsError::Aborted("production restore not confirmed".to_string()));
        }

        info!(environment = %environment, source = %source.display(), "Restoring backup");
        let mut decoder = bufread::GzDecoder::new(BufReader::new(File::open(source)?));
        db.restore_from(&mut decoder).await?;

        self.console.success(&format!("Restored {} into {}", source.display(), environment));

        Ok(RestoreReport {
            environment,
            source: source.to_path_buf(),
            restored_bytes: verification.uncompressed_bytes,
        })
    }
}

/// Verify `path` and turn a failed check into `IntegrityCheckFailed`.
/// The file is left where it is either way.
pub fn ensure_intact(path: &Path) -> Result<VerificationResult, OpsError> {
    let verification = verify_artifact(path)?;
    if verification.is_valid {
        return Ok(verification);
    }

    error!(path = %path.display(), "Artifact failed integrity check; file kept for inspection");
    Err(OpsError::IntegrityCheckFailed {
        path: path.to_path_buf(),
        reason: verification
            .error
            .unwrap_or_else(|| "unknown decoder error".to_string()),
    })
}

/// Decompress-test a gzip artifact end to end. Bytes after the gzip stream
/// make the artifact invalid.
pub fn verify_artifact(path: &Path) -> Result<VerificationResult, OpsError> {
    let file = File::open(path)?;
    let compressed_bytes = file.metadata()?.len();

    let mut decoder = bufread::GzDecoder::new(BufReader::new(HashingReader::new(file)));
    let outcome = io::copy(&mut decoder, &mut io::sink());
    let mut rest = decoder.into_inner();
    let trailing = outcome.is_ok() && !rest.fill_buf()?.is_empty();
    // Hash whatever the decoder left unread so the checksum covers the whole file
    io::copy(&mut rest, &mut io::sink())?;
    let checksum = format!("{:x}", rest.into_inner().hasher.finalize());

    let (is_valid, uncompressed_bytes, error) = match outcome {
        Ok(_) if compressed_bytes == 0 => (false, 0, Some("artifact is empty".to_string())),
        Ok(_) if trailing => (false, 0, Some("trailing data after gzip stream".to_string())),
        Ok(bytes) => (true, bytes, None),
        Err(e) => (false, 0, Some(e.to_string())),
    };

    Ok(VerificationResult {
        path: path.to_path_buf(),
        is_valid,
        compressed_bytes,
        uncompressed_bytes,
        checksum,
        error,
    })
}

/// `dev_export_<YYYYMMDD_HHMMSS>.sql`
pub fn default_export_name(now: NaiveDateTime) -> String {
    format!("dev_export_{}.sql", now.format(super::types::TIMESTAMP_FORMAT))
}

fn gz_sibling(path: &Path) -> PathBuf {
    let mut name = path.as_os_str().to_os_string();
    name.push(".gz");
    PathBuf::from(name)
}

fn compress_file(source: &Path, destination: &Path, level: u32) -> Result<u64, OpsError> {
    let mut reader = BufReader::new(File::open(source)?);
    let writer = BufWriter::new(File::create(destination)?);
    let mut encoder = GzEncoder::new(writer, Compression::new(level));
    io::copy(&mut reader, &mut encoder)?;
    encoder.finish()?.flush()?;
    Ok(std::fs::metadata(destination)?.len())
}

struct HashingReader<R> {
    inner: R,
    hasher: Sha256,
}

impl<R: Read> HashingReader<R> {
    fn new(inner: R) -> Self {
        Self {
            inner,
            hasher: Sha256::new(),
        }
    }
}

impl<R: Read> Read for HashingReader<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let n = self.inner.read(buf)?;
        self.hasher.update(&buf[..n]);
        Ok(n)
    }
}
