mod common;

use common::{at, files_under, wednesday, FakeRuntime, ScriptedPrompt, DUMP};
use flate2::read::GzDecoder;
use pretty_assertions::assert_eq;
use solar_ops::backup::{verify_artifact, BackupArtifact, BackupManager, FileBackupStorage, Tier};
use solar_ops::clock::FixedClock;
use solar_ops::config::{dev_database_target, OpsConfig};
use solar_ops::console::Console;
use solar_ops::environment::Environment;
use solar_ops::OpsError;
use std::fs;
use std::io::Read;
use std::path::{Path, PathBuf};
use std::sync::Arc;

fn manager(runtime: Arc<FakeRuntime>, root: &Path, now: chrono::NaiveDateTime) -> BackupManager {
    BackupManager::new(
        runtime,
        Box::new(FileBackupStorage::new(root)),
        Arc::new(FixedClock(now)),
    )
    .with_console(Console::plain().quiet(true))
}

fn decompress(path: &Path) -> Vec<u8> {
    let mut out = Vec::new();
    GzDecoder::new(fs::File::open(path).unwrap())
        .read_to_end(&mut out)
        .unwrap();
    out
}

/// Place an artifact as if a backup had run at `created_at`
fn seed(
    root: &Path,
    environment: Environment,
    tier: Tier,
    created_at: chrono::NaiveDateTime,
) -> PathBuf {
    let dir = FileBackupStorage::new(root).tier_directory(environment, tier);
    fs::create_dir_all(&dir).unwrap();
    let path = dir.join(BackupArtifact::file_name(environment, tier, created_at));
    fs::write(&path, b"seeded").unwrap();
    path
}

#[tokio::test]
async fn test_backup_creates_verified_daily_artifact() {
    let dir = tempfile::tempdir().unwrap();
    let runtime = Arc::new(FakeRuntime::new().running(&["db"]));
    let config = OpsConfig::new(dir.path(), Environment::Staging);

    let artifact = manager(runtime.clone(), dir.path(), wednesday())
        .run_backup(&config.database_target())
        .await
        .unwrap();

    assert_eq!(artifact.tier, Tier::Daily);
    assert_eq!(
        artifact.path,
        dir.path()
            .join("staging/backups/daily/backup_staging_daily_20251022_143005.sql.gz")
    );
    assert_eq!(artifact.size_bytes, fs::metadata(&artifact.path).unwrap().len());
    assert!(verify_artifact(&artifact.path).unwrap().is_valid);
    assert_eq!(decompress(&artifact.path), DUMP.to_vec());
    assert_eq!(
        runtime.calls(),
        vec!["dump db pg_dump -U postgres solar_backend".to_string()]
    );
}

#[tokio::test]
async fn test_backup_tier_follows_the_calendar() {
    let dir = tempfile::tempdir().unwrap();
    let runtime = Arc::new(FakeRuntime::new().running(&["db"]));
    let target = OpsConfig::new(dir.path(), Environment::Prod).database_target();

    // 2025-10-19 is a Sunday; 2025-06-01 is both a Sunday and the 1st
    let sunday = manager(runtime.clone(), dir.path(), at(2025, 10, 19, 3, 0, 0))
        .run_backup(&target)
        .await
        .unwrap();
    let first = manager(runtime.clone(), dir.path(), at(2025, 6, 1, 3, 0, 0))
        .run_backup(&target)
        .await
        .unwrap();

    assert_eq!(sunday.tier, Tier::Weekly);
    assert_eq!(first.tier, Tier::Monthly);
    assert!(first.path.starts_with(dir.path().join("prod/backups/monthly")));
}

#[tokio::test]
async fn test_backup_without_running_database_creates_nothing() {
    let dir = tempfile::tempdir().unwrap();
    let runtime = Arc::new(FakeRuntime::new());
    let target = OpsConfig::new(dir.path(), Environment::Test).database_target();

    let err = manager(runtime.clone(), dir.path(), wednesday())
        .run_backup(&target)
        .await
        .unwrap_err();

    assert!(matches!(err, OpsError::ServiceUnavailable(_)), "got {:?}", err);
    assert!(files_under(dir.path()).is_empty());
    assert!(runtime.calls().is_empty());
}

#[tokio::test]
async fn test_failed_dump_removes_partial_artifact() {
    let dir = tempfile::tempdir().unwrap();
    let runtime = Arc::new(
        FakeRuntime::new()
            .running(&["db"])
            .failing_dump("pg_dump: error: connection to server lost"),
    );
    let target = OpsConfig::new(dir.path(), Environment::Test).database_target();

    let err = manager(runtime, dir.path(), wednesday())
        .run_backup(&target)
        .await
        .unwrap_err();

    match err {
        OpsError::DumpFailed(message) => assert!(message.contains("connection to server lost")),
        other => panic!("expected DumpFailed, got {:?}", other),
    }
    assert!(files_under(dir.path()).is_empty());
}

#[tokio::test]
async fn test_sweep_deletes_only_expired_dailies() {
    let dir = tempfile::tempdir().unwrap();
    let now = wednesday();
    let days = chrono::Duration::days;
    let eight = seed(dir.path(), Environment::Staging, Tier::Daily, now - days(8));
    let ten = seed(dir.path(), Environment::Staging, Tier::Daily, now - days(10));
    let six = seed(dir.path(), Environment::Staging, Tier::Daily, now - days(6));

    let report = manager(Arc::new(FakeRuntime::new()), dir.path(), now)
        .sweep_retention(Environment::Staging)
        .await
        .unwrap();

    let mut deleted = report.deleted.clone();
    deleted.sort();
    let mut expected = vec![eight, ten];
    expected.sort();
    assert_eq!(deleted, expected);
    assert_eq!(report.retained, 1);
    assert!(six.exists());
}

#[tokio::test]
async fn test_sweep_applies_each_tier_window() {
    let dir = tempfile::tempdir().unwrap();
    let now = wednesday();
    let days = chrono::Duration::days;

    let boundary_daily = seed(dir.path(), Environment::Prod, Tier::Daily, now - days(7));
    let weekly_kept = seed(dir.path(), Environment::Prod, Tier::Weekly, now - days(20));
    let weekly_gone = seed(dir.path(), Environment::Prod, Tier::Weekly, now - days(29));
    let monthly_kept = seed(dir.path(), Environment::Prod, Tier::Monthly, now - days(300));
    let monthly_gone = seed(dir.path(), Environment::Prod, Tier::Monthly, now - days(400));

    let report = manager(Arc::new(FakeRuntime::new()), dir.path(), now)
        .sweep_retention(Environment::Prod)
        .await
        .unwrap();

    assert_eq!(report.retained, 3);
    assert!(boundary_daily.exists());
    assert!(weekly_kept.exists());
    assert!(monthly_kept.exists());
    assert!(!weekly_gone.exists());
    assert!(!monthly_gone.exists());
}

#[tokio::test]
async fn test_sweep_is_idempotent_and_leaves_foreign_files() {
    let dir = tempfile::tempdir().unwrap();
    let now = wednesday();
    let old = now - chrono::Duration::days(30);

    seed(dir.path(), Environment::Test, Tier::Daily, old);
    let other_env = seed(dir.path(), Environment::Prod, Tier::Daily, old);
    let daily_dir =
        FileBackupStorage::new(dir.path()).tier_directory(Environment::Test, Tier::Daily);
    let notes = daily_dir.join("notes.txt");
    fs::write(&notes, b"restore drill 2025-09").unwrap();
    let misplaced = daily_dir.join("backup_test_weekly_20250101_000000.sql.gz");
    fs::write(&misplaced, b"x").unwrap();

    let backups = manager(Arc::new(FakeRuntime::new()), dir.path(), now);
    let first = backups.sweep_retention(Environment::Test).await.unwrap();
    let second = backups.sweep_retention(Environment::Test).await.unwrap();

    assert_eq!(first.deleted.len(), 1);
    assert!(second.deleted.is_empty());
    assert_eq!(second.retained, 0);
    assert!(notes.exists());
    assert!(misplaced.exists());
    assert!(other_env.exists());
}

#[tokio::test]
async fn test_list_after_backups_is_newest_first() {
    let dir = tempfile::tempdir().unwrap();
    let runtime = Arc::new(FakeRuntime::new().running(&["db"]));
    let target = OpsConfig::new(dir.path(), Environment::Staging).database_target();

    let runs = [
        at(2025, 10, 20, 2, 0, 0),
        at(2025, 10, 26, 2, 0, 0),
        at(2025, 10, 22, 2, 0, 0),
    ];
    for now in runs {
        manager(runtime.clone(), dir.path(), now).run_backup(&target).await.unwrap();
    }

    let listed = manager(runtime, dir.path(), wednesday())
        .list_artifacts(Environment::Staging)
        .await
        .unwrap();
    let summary: Vec<(Tier, u32)> = listed
        .iter()
        .map(|a| (a.tier, chrono::Datelike::day(&a.created_at.date())))
        .collect();
    assert_eq!(summary, vec![(Tier::Weekly, 26), (Tier::Daily, 22), (Tier::Daily, 20)]);
}

#[tokio::test]
async fn test_export_uses_timestamped_default_name() {
    let root = tempfile::tempdir().unwrap();
    let out = tempfile::tempdir().unwrap();
    fs::write(root.path().join(".env"), "POSTGRES_DB=solar_dev\n").unwrap();
    let runtime = Arc::new(FakeRuntime::new().running(&["db"]));
    let target = dev_database_target(root.path()).unwrap();

    let report = manager(runtime.clone(), root.path(), wednesday())
        .with_export_dir(out.path())
        .export_snapshot(&target, None)
        .await
        .unwrap();

    assert_eq!(report.sql_path, out.path().join("dev_export_20251022_143005.sql"));
    assert_eq!(report.gz_path, out.path().join("dev_export_20251022_143005.sql.gz"));
    assert_eq!(fs::read(&report.sql_path).unwrap(), DUMP.to_vec());
    assert_eq!(decompress(&report.gz_path), DUMP.to_vec());
    assert_eq!(report.sql_bytes, DUMP.len() as u64);
    assert_eq!(
        runtime.calls(),
        vec!["dump db pg_dump -U postgres solar_dev".to_string()]
    );
    // Exports are never tiered
    assert!(!root.path().join("test").exists());
}

#[tokio::test]
async fn test_export_to_explicit_path() {
    let root = tempfile::tempdir().unwrap();
    let runtime = Arc::new(FakeRuntime::new().running(&["db"]));
    let target = dev_database_target(root.path()).unwrap();
    let output = root.path().join("snapshots/before-upgrade.sql");

    let report = manager(runtime, root.path(), wednesday())
        .export_snapshot(&target, Some(output.clone()))
        .await
        .unwrap();

    assert_eq!(report.sql_path, output);
    assert!(root.path().join("snapshots/before-upgrade.sql.gz").is_file());
}

#[tokio::test]
async fn test_restore_streams_decompressed_dump() {
    let dir = tempfile::tempdir().unwrap();
    let runtime = Arc::new(FakeRuntime::new().running(&["db"]));
    let target = OpsConfig::new(dir.path(), Environment::Staging).database_target();
    let backups = manager(runtime.clone(), dir.path(), wednesday());

    let artifact = backups.run_backup(&target).await.unwrap();
    let report = backups
        .restore_backup(&target, &artifact.path, &ScriptedPrompt::new(&[]))
        .await
        .unwrap();

    assert_eq!(report.environment, Environment::Staging);
    assert_eq!(report.restored_bytes, DUMP.len() as u64);
    assert_eq!(runtime.restored(), DUMP.to_vec());
    assert!(runtime
        .calls()
        .contains(&"restore db psql -v ON_ERROR_STOP=1 -U postgres solar_backend".to_string()));
}

#[tokio::test]
async fn test_restore_refuses_corrupt_artifact() {
    let dir = tempfile::tempdir().unwrap();
    let runtime = Arc::new(FakeRuntime::new().running(&["db"]));
    let target = OpsConfig::new(dir.path(), Environment::Staging).database_target();
    let bogus = seed(dir.path(), Environment::Staging, Tier::Daily, wednesday());

    let err = manager(runtime.clone(), dir.path(), wednesday())
        .restore_backup(&target, &bogus, &ScriptedPrompt::new(&[true]))
        .await
        .unwrap_err();

    match err {
        OpsError::IntegrityCheckFailed { path, .. } => assert_eq!(path, bogus),
        other => panic!("expected IntegrityCheckFailed, got {:?}", other),
    }
    assert!(runtime.calls().is_empty());
}

#[tokio::test]
async fn test_second_backup_in_same_second_leaves_first_untouched() {
    let dir = tempfile::tempdir().unwrap();
    let runtime = Arc::new(FakeRuntime::new().running(&["db"]));
    let target = OpsConfig::new(dir.path(), Environment::Prod).database_target();
    let backups = manager(runtime, dir.path(), wednesday());

    let first = backups.run_backup(&target).await.unwrap();
    let written = fs::read(&first.path).unwrap();

    let err = backups.run_backup(&target).await.unwrap_err();

    match err {
        OpsError::ArtifactExists(path) => assert_eq!(path, first.path),
        other => panic!("expected ArtifactExists, got {:?}", other),
    }
    assert_eq!(fs::read(&first.path).unwrap(), written);
    assert_eq!(files_under(dir.path()), vec![first.path.clone()]);
}

#[tokio::test]
async fn test_declined_production_restore_touches_nothing() {
    let dir = tempfile::tempdir().unwrap();
    let runtime = Arc::new(FakeRuntime::new().running(&["db"]));
    let target = OpsConfig::new(dir.path(), Environment::Prod).database_target();
    let backups = manager(runtime.clone(), dir.path(), wednesday());
    let artifact = backups.run_backup(&target).await.unwrap();
    let prompt = ScriptedPrompt::new(&[false]);

    let err = backups
        .restore_backup(&target, &artifact.path, &prompt)
        .await
        .unwrap_err();

    assert!(matches!(err, OpsError::Aborted(_)), "got {:?}", err);
    assert_eq!(prompt.questions().len(), 1);
    assert!(prompt.questions()[0].contains("PRODUCTION"));
    assert!(!runtime.calls().iter().any(|call| call.starts_with("restore ")));
    assert!(runtime.restored().is_empty());
}

#[tokio::test]
async fn test_confirmed_production_restore_streams_dump() {
    let dir = tempfile::tempdir().unwrap();
    let runtime = Arc::new(FakeRuntime::new().running(&["db"]));
    let target = OpsConfig::new(dir.path(), Environment::Prod).database_target();
    let backups = manager(runtime.clone(), dir.path(), wednesday());
    let artifact = backups.run_backup(&target).await.unwrap();

    backups
        .restore_backup(&target, &artifact.path, &ScriptedPrompt::new(&[true]))
        .await
        .unwrap();

    assert_eq!(runtime.restored(), DUMP.to_vec());
}

#[test]
fn test_unknown_environment_is_rejected() {
    let err = "qa".parse::<Environment>().unwrap_err();
    assert!(matches!(err, OpsError::InvalidEnvironment(_)));
}
