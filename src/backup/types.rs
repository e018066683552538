// Backup System Types - tiers, retention windows, artifacts and reports

use crate::environment::Environment;
use chrono::{Datelike, Duration, NaiveDate, NaiveDateTime, Weekday};
use lazy_static::lazy_static;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

/// Timestamp layout embedded in artifact file names
pub const TIMESTAMP_FORMAT: &str = "%Y%m%d_%H%M%S";

pub const ARTIFACT_EXTENSION: &str = ".sql.gz";

lazy_static! {
    static ref ARTIFACT_NAME: Regex =
        Regex::new(r"^backup_(test|staging|prod)_(daily|weekly|monthly)_(\d{8}_\d{6})\.sql\.gz$")
            .expect("artifact name pattern is valid");
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Tier {
    Daily,
    Weekly,
    Monthly,
}

impl Tier {
    pub const ALL: [Tier; 3] = [Tier::Daily, Tier::Weekly, Tier::Monthly];

    pub fn as_str(&self) -> &'static str {
        match self {
            Tier::Daily => "daily",
            Tier::Weekly => "weekly",
            Tier::Monthly => "monthly",
        }
    }

    /// First of the month is monthly, otherwise Sunday is weekly, otherwise daily
    pub fn for_date(date: NaiveDate) -> Tier {
        if date.day() == 1 {
            Tier::Monthly
        } else if date.weekday() == Weekday::Sun {
            Tier::Weekly
        } else {
            Tier::Daily
        }
    }
}

impl fmt::Display for Tier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Tier {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "daily" => Ok(Tier::Daily),
            "weekly" => Ok(Tier::Weekly),
            "monthly" => Ok(Tier::Monthly),
            other => Err(format!("unknown tier '{}'", other)),
        }
    }
}

/// Retention window per tier, in days. Fixed for the life of the process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct RetentionPolicy {
    daily_days: i64,
    weekly_days: i64,
    monthly_days: i64,
}

impl RetentionPolicy {
    pub const fn standard() -> Self {
        Self {
            daily_days: 7,
            weekly_days: 28,
            monthly_days: 365,
        }
    }

    pub fn window_days(&self, tier: Tier) -> i64 {
        match tier {
            Tier::Daily => self.daily_days,
            Tier::Weekly => self.weekly_days,
            Tier::Monthly => self.monthly_days,
        }
    }

    /// Whole days elapsed strictly exceed the tier's window
    pub fn is_expired(&self, tier: Tier, age: Duration) -> bool {
        age.num_days() > self.window_days(tier)
    }
}

impl Default for RetentionPolicy {
    fn default() -> Self {
        Self::standard()
    }
}

/// One compressed database dump on disk. Identity is the path.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BackupArtifact {
    pub environment: Environment,
    pub tier: Tier,
    pub created_at: NaiveDateTime,
    pub path: PathBuf,
    pub size_bytes: u64,
}

impl BackupArtifact {
    /// `backup_<env>_<tier>_<YYYYMMDD_HHMMSS>.sql.gz`
    pub fn file_name(environment: Environment, tier: Tier, created_at: NaiveDateTime) -> String {
        format!(
            "backup_{}_{}_{}{}",
            environment,
            tier,
            created_at.format(TIMESTAMP_FORMAT),
            ARTIFACT_EXTENSION
        )
    }

    /// Recover environment, tier and timestamp from a file name.
    /// Returns `None` for anything not produced by a backup run.
    pub fn parse_file_name(name: &str) -> Option<(Environment, Tier, NaiveDateTime)> {
        let captures = ARTIFACT_NAME.captures(name)?;
        let environment = captures[1].parse().ok()?;
        let tier = captures[2].parse().ok()?;
        let created_at = NaiveDateTime::parse_from_str(&captures[3], TIMESTAMP_FORMAT).ok()?;
        Some((environment, tier, created_at))
    }

    pub fn from_path(path: &Path, size_bytes: u64) -> Option<Self> {
        let name = path.file_name()?.to_str()?;
        let (environment, tier, created_at) = Self::parse_file_name(name)?;
        Some(Self {
            environment,
            tier,
            created_at,
            path: path.to_path_buf(),
            size_bytes,
        })
    }

    pub fn age(&self, now: NaiveDateTime) -> Duration {
        now - self.created_at
    }
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct SweepReport {
    pub deleted: Vec<PathBuf>,
    pub retained: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct VerificationResult {
    pub path: PathBuf,
    pub is_valid: bool,
    pub compressed_bytes: u64,
    pub uncompressed_bytes: u64,
    /// SHA-256 of the compressed file
    pub checksum: String,
    pub error: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ExportReport {
    pub sql_path: PathBuf,
    pub sql_bytes: u64,
    pub gz_path: PathBuf,
    pub gz_bytes: u64,
}

#[derive(Debug, Clone, Serialize)]
pub struct RestoreReport {
    pub environment: Environment,
    pub source: PathBuf,
    pub restored_bytes: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    #[test]
    fn test_first_of_month_is_monthly_even_on_sunday() {
        // 2025-06-01 is a Sunday
        assert_eq!(date(2025, 6, 1).weekday(), Weekday::Sun);
        assert_eq!(Tier::for_date(date(2025, 6, 1)), Tier::Monthly);
        assert_eq!(Tier::for_date(date(2025, 10, 1)), Tier::Monthly);
    }

    #[test]
    fn test_sunday_is_weekly() {
        assert_eq!(Tier::for_date(date(2025, 10, 19)), Tier::Weekly);
    }

    #[test]
    fn test_other_days_are_daily() {
        assert_eq!(Tier::for_date(date(2025, 10, 22)), Tier::Daily);
        assert_eq!(Tier::for_date(date(2025, 10, 18)), Tier::Daily);
    }

    #[test]
    fn test_standard_windows() {
        let policy = RetentionPolicy::standard();
        assert_eq!(policy.window_days(Tier::Daily), 7);
        assert_eq!(policy.window_days(Tier::Weekly), 28);
        assert_eq!(policy.window_days(Tier::Monthly), 365);
    }

    #[test]
    fn test_expiry_uses_whole_days() {
        let policy = RetentionPolicy::standard();
        assert!(!policy.is_expired(Tier::Daily, Duration::days(7)));
        assert!(!policy.is_expired(Tier::Daily, Duration::days(7) + Duration::hours(23)));
        assert!(policy.is_expired(Tier::Daily, Duration::days(8)));
        assert!(!policy.is_expired(Tier::Weekly, Duration::days(8)));
    }

    #[test]
    fn test_file_name_round_trip() {
        let ts = date(2025, 10, 22).and_hms_opt(14, 30, 5).unwrap();
        let name = BackupArtifact::file_name(Environment::Prod, Tier::Daily, ts);
        assert_eq!(name, "backup_prod_daily_20251022_143005.sql.gz");
        assert_eq!(
            BackupArtifact::parse_file_name(&name),
            Some((Environment::Prod, Tier::Daily, ts))
        );
    }

    #[test]
    fn test_foreign_names_are_rejected() {
        for name in [
            "backup_prod_daily_20251022_143005.sql",
            "backup_qa_daily_20251022_143005.sql.gz",
            "backup_prod_hourly_20251022_143005.sql.gz",
            "notes.txt",
            "backup_prod_daily_20251399_143005.sql.gz",
        ] {
            assert_eq!(BackupArtifact::parse_file_name(name), None, "{}", name);
        }
    }
}
