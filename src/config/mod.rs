//! Explicit per-environment configuration
//!
//! Values come from `<root>/<env>/.env`, overlaid by process environment
//! variables of the same name. Nothing reads the process environment after
//! [`OpsConfig`] is built; every operation receives the values it needs.

use crate::database::DatabaseTarget;
use crate::environment::Environment;
use crate::registry::RegistryCredentials;
use crate::resilience::RetryConfig;
use crate::runtime::ComposeProject;
use crate::OpsError;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use tracing::debug;

/// Keys read from env files and the process environment
pub const KNOWN_KEYS: &[&str] = &[
    "POSTGRES_USER",
    "POSTGRES_DB",
    "DB_SERVICE",
    "BACKEND_SERVICE",
    "REGISTRY",
    "REGISTRY_USERNAME",
    "REGISTRY_PASSWORD",
    "IMAGE_NAME",
    "IMAGE_TAG",
    "COOKIE_SECURE",
    "BASE_URL",
    "HEALTHCHECK_URL",
    "HEALTH_CHECK_POLICY",
    "READINESS_ATTEMPTS",
    "HEALTH_ATTEMPTS",
];

/// What a failed post-deployment health check means for the deployment
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthCheckPolicy {
    /// Log a warning and report the deployment complete
    #[default]
    Warn,
    /// Fail the deployment with `HealthCheckFailed`
    Strict,
}

impl FromStr for HealthCheckPolicy {
    type Err = OpsError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "warn" => Ok(HealthCheckPolicy::Warn),
            "strict" => Ok(HealthCheckPolicy::Strict),
            other => Err(OpsError::Config(format!(
                "HEALTH_CHECK_POLICY must be 'warn' or 'strict', got '{}'",
                other
            ))),
        }
    }
}

impl fmt::Display for HealthCheckPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HealthCheckPolicy::Warn => f.write_str("warn"),
            HealthCheckPolicy::Strict => f.write_str("strict"),
        }
    }
}

#[derive(Debug, Clone)]
pub struct OpsConfig {
    root: PathBuf,
    pub environment: Environment,
    pub postgres_user: String,
    pub postgres_db: String,
    pub db_service: String,
    pub backend_service: String,
    pub registry: String,
    pub credentials: Option<RegistryCredentials>,
    pub image_name: String,
    pub default_image_tag: String,
    pub cookie_secure: bool,
    pub base_url: Option<String>,
    pub health_url: String,
    pub health_check_policy: HealthCheckPolicy,
    pub readiness_retry: RetryConfig,
    pub health_retry: RetryConfig,
}

impl OpsConfig {
    /// Defaults for `environment` rooted at `root`, no env file consulted
    pub fn new(root: impl Into<PathBuf>, environment: Environment) -> Self {
        Self {
            root: root.into(),
            environment,
            postgres_user: "postgres".to_string(),
            postgres_db: "solar_backend".to_string(),
            db_service: "db".to_string(),
            backend_service: "backend".to_string(),
            registry: "docker.io".to_string(),
            credentials: None,
            image_name: "solar-backend".to_string(),
            default_image_tag: "latest".to_string(),
            cookie_secure: false,
            base_url: None,
            health_url: "http://localhost:8000/healthcheck".to_string(),
            health_check_policy: HealthCheckPolicy::Warn,
            readiness_retry: RetryConfig::readiness(),
            health_retry: RetryConfig::health(),
        }
    }

    /// Load the environment's env file; fails with `ConfigMissing` if absent
    pub fn load(root: impl Into<PathBuf>, environment: Environment) -> Result<Self, OpsError> {
        let root = root.into();
        let env_file = environment.env_file(&root);
        if !env_file.is_file() {
            return Err(OpsError::ConfigMissing(format!(
                "{} not found for environment '{}'",
                env_file.display(),
                environment
            )));
        }

        let mut vars = read_env_file(&env_file)?;
        overlay_process_env(&mut vars);
        Self::from_vars(root, environment, &vars)
    }

    /// Like [`OpsConfig::load`], but falls back to defaults without an env file
    pub fn load_or_default(
        root: impl Into<PathBuf>,
        environment: Environment,
    ) -> Result<Self, OpsError> {
        let root = root.into();
        let env_file = environment.env_file(&root);
        let mut vars = if env_file.is_file() {
            read_env_file(&env_file)?
        } else {
            debug!(path = %env_file.display(), "No env file, using defaults");
            HashMap::new()
        };
        overlay_process_env(&mut vars);
        Self::from_vars(root, environment, &vars)
    }

    pub fn from_vars(
        root: impl Into<PathBuf>,
        environment: Environment,
        vars: &HashMap<String, String>,
    ) -> Result<Self, OpsError> {
        let mut config = Self::new(root, environment);
        let get = |key: &str| vars.get(key).map(|v| v.trim()).filter(|v| !v.is_empty());

        if let Some(v) = get("POSTGRES_USER") {
            config.postgres_user = v.to_string();
        }
        if let Some(v) = get("POSTGRES_DB") {
            config.postgres_db = v.to_string();
        }
        if let Some(v) = get("DB_SERVICE") {
            config.db_service = v.to_string();
        }
        if let Some(v) = get("BACKEND_SERVICE") {
            config.backend_service = v.to_string();
        }
        if let Some(v) = get("REGISTRY") {
            config.registry = v.to_string();
        }
        if let Some(v) = get("IMAGE_NAME") {
            config.image_name = v.to_string();
        }
        if let Some(v) = get("IMAGE_TAG") {
            config.default_image_tag = v.to_string();
        }
        if let Some(v) = get("COOKIE_SECURE") {
            config.cookie_secure = parse_bool("COOKIE_SECURE", v)?;
        }
        config.base_url = get("BASE_URL").map(str::to_string);
        if let Some(v) = get("HEALTHCHECK_URL") {
            config.health_url = v.to_string();
        }
        if let Some(v) = get("HEALTH_CHECK_POLICY") {
            config.health_check_policy = v.parse()?;
        }
        if let Some(v) = get("READINESS_ATTEMPTS") {
            let attempts = parse_count("READINESS_ATTEMPTS", v)?;
            config.readiness_retry = config.readiness_retry.max_attempts(attempts);
        }
        if let Some(v) = get("HEALTH_ATTEMPTS") {
            let attempts = parse_count("HEALTH_ATTEMPTS", v)?;
            config.health_retry = config.health_retry.max_attempts(attempts);
        }

        config.credentials = match (get("REGISTRY_USERNAME"), get("REGISTRY_PASSWORD")) {
            (Some(username), Some(password)) => Some(RegistryCredentials {
                registry: config.registry.clone(),
                username: username.to_string(),
                password: password.to_string(),
            }),
            _ => None,
        };

        Ok(config)
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn environment_dir(&self) -> PathBuf {
        self.environment.directory(&self.root)
    }

    pub fn compose_file(&self) -> PathBuf {
        self.environment.compose_file(&self.root)
    }

    pub fn lock_file(&self) -> PathBuf {
        self.environment_dir().join(".deploy.lock")
    }

    /// `<registry>/<image>:<tag>`
    pub fn image_reference(&self, tag: &str) -> String {
        format!("{}/{}:{}", self.registry, self.image_name, tag)
    }

    pub fn compose_project(&self) -> ComposeProject {
        ComposeProject::new(self.compose_file())
            .with_env_file(self.environment.env_file(&self.root))
    }

    pub fn database_target(&self) -> DatabaseTarget {
        DatabaseTarget {
            environment: Some(self.environment),
            project: self.compose_project(),
            db_service: self.db_service.clone(),
            backend_service: self.backend_service.clone(),
            user: self.postgres_user.clone(),
            database: self.postgres_db.clone(),
        }
    }

    /// Production guard: secure cookies must be on
    pub fn cookie_guard_violation(&self) -> Option<String> {
        (!self.cookie_secure).then(|| "COOKIE_SECURE is not set to true".to_string())
    }

    /// Production guard: the public base URL must use TLS
    pub fn base_url_guard_violation(&self) -> Option<String> {
        match &self.base_url {
            Some(url) if url.starts_with("https://") => None,
            Some(url) => Some(format!("BASE_URL '{}' does not use https", url)),
            None => Some("BASE_URL is not set".to_string()),
        }
    }
}

/// Target for the local development stack (`<root>/docker-compose.yml`)
pub fn dev_database_target(root: &Path) -> Result<DatabaseTarget, OpsError> {
    let env_file = root.join(".env");
    let mut vars = if env_file.is_file() {
        read_env_file(&env_file)?
    } else {
        HashMap::new()
    };
    overlay_process_env(&mut vars);

    let get = |key: &str, default: &str| {
        vars.get(key)
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty())
            .unwrap_or_else(|| default.to_string())
    };

    Ok(DatabaseTarget {
        environment: None,
        project: ComposeProject::new(root.join("docker-compose.yml")).with_env_file(&env_file),
        db_service: get("DB_SERVICE", "db"),
        backend_service: get("BACKEND_SERVICE", "backend"),
        user: get("POSTGRES_USER", "postgres"),
        database: get("POSTGRES_DB", "solar_backend"),
    })
}

fn read_env_file(path: &Path) -> Result<HashMap<String, String>, OpsError> {
    let iter = dotenvy::from_path_iter(path)
        .map_err(|e| OpsError::Config(format!("{}: {}", path.display(), e)))?;

    let mut vars = HashMap::new();
    for item in iter {
        let (key, value) =
            item.map_err(|e| OpsError::Config(format!("{}: {}", path.display(), e)))?;
        vars.insert(key, value);
    }
    debug!(path = %path.display(), keys = vars.len(), "Loaded env file");
    Ok(vars)
}

fn overlay_process_env(vars: &mut HashMap<String, String>) {
    for key in KNOWN_KEYS {
        if let Ok(value) = std::env::var(key) {
            vars.insert(key.to_string(), value);
        }
    }
}

fn parse_bool(key: &str, value: &str) -> Result<bool, OpsError> {
    match value.to_ascii_lowercase().as_str() {
        "true" | "1" | "yes" | "on" => Ok(true),
        "false" | "0" | "no" | "off" => Ok(false),
        _ => Err(OpsError::Config(format!("{} must be a boolean, got '{}'", key, value))),
    }
}

fn parse_count(key: &str, value: &str) -> Result<usize, OpsError> {
    value
        .parse::<usize>()
        .ok()
        .filter(|n| *n > 0)
        .ok_or_else(|| {
            OpsError::Config(format!("{} must be a positive integer, got '{}'", key, value))
        })
}
