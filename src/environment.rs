//! The fixed set of deployment environments

use crate::OpsError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

/// Deployment environment
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Environment {
    /// Throwaway test stack
    Test,
    /// Pre-production stack
    Staging,
    /// Production stack
    Prod,
}

impl Environment {
    /// All environments in promotion order
    pub const ALL: [Environment; 3] = [Environment::Test, Environment::Staging, Environment::Prod];

    /// Canonical short name, as used in directory and artifact names
    pub fn as_str(&self) -> &'static str {
        match self {
            Environment::Test => "test",
            Environment::Staging => "staging",
            Environment::Prod => "prod",
        }
    }

    pub fn is_production(&self) -> bool {
        matches!(self, Environment::Prod)
    }

    /// Directory holding this environment's compose file, env file and backups
    pub fn directory(&self, root: &Path) -> PathBuf {
        root.join(self.as_str())
    }

    pub fn compose_file(&self, root: &Path) -> PathBuf {
        self.directory(root).join("docker-compose.yml")
    }

    pub fn env_file(&self, root: &Path) -> PathBuf {
        self.directory(root).join(".env")
    }
}

impl fmt::Display for Environment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Environment {
    type Err = OpsError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "test" => Ok(Environment::Test),
            "staging" => Ok(Environment::Staging),
            "prod" | "production" => Ok(Environment::Prod),
            _ => Err(OpsError::InvalidEnvironment(s.to_string())),
        }
    }
}
