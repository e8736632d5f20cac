use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Clone, Debug)]
pub struct AppConfig {
    pub database: DatabaseConfig,
    pub workflow: WorkflowConfig,
    pub logging: LoggingConfig,
}

#[derive(Clone, Debug)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
    pub timeout_secs: u64,
}

#[derive(Clone, Debug)]
pub struct WorkflowConfig {
    /// Upper bound on the supervisor hierarchy walk.
    pub max_supervisor_depth: u32,
    /// Longest deadline extension a single request may ask for.
    pub max_extension_days: i64,
    /// Retain full form snapshots on signature records, not just digests.
    pub store_snapshots: bool,
}

#[derive(Clone, Debug)]
pub struct LoggingConfig {
    pub level: String,
    pub format: LogFormat,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogFormat {
    Compact,
    Pretty,
    Json,
}

#[derive(Clone, Debug, Default)]
pub struct ConfigOverrides {
    pub database_url: Option<String>,
    pub log_level: Option<String>,
    pub max_supervisor_depth: Option<u32>,
    pub max_extension_days: Option<i64>,
    pub store_snapshots: Option<bool>,
}

#[derive(Clone, Debug, Default)]
pub struct LoadOptions {
    pub config_path: Option<PathBuf>,
    pub require_file: bool,
    pub overrides: ConfigOverrides,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("could not read config file `{path}`: {source}")]
    ReadFile { path: PathBuf, source: std::io::Error },
    #[error("could not parse config file `{path}`: {source}")]
    ParseFile { path: PathBuf, source: toml::de::Error },
    #[error("required config file was not found: `{0}`")]
    MissingConfigFile(PathBuf),
    #[error("environment variable interpolation failed for `{var}`")]
    MissingEnvInterpolation { var: String },
    #[error("unterminated environment interpolation expression")]
    UnterminatedInterpolation,
    #[error("invalid environment override for `{key}`: `{value}`")]
    InvalidEnvOverride { key: String, value: String },
    #[error("configuration validation failed: {0}")]
    Validation(String),
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            database: DatabaseConfig {
                url: "sqlite://permitflow.db".to_string(),
                max_connections: 5,
                timeout_secs: 30,
            },
            workflow: WorkflowConfig {
                max_supervisor_depth: 16,
                max_extension_days: 90,
                store_snapshots: false,
            },
            logging: LoggingConfig { level: "info".to_string(), format: LogFormat::Compact },
        }
    }
}

impl std::str::FromStr for LogFormat {
    type Err = ConfigError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "compact" => Ok(Self::Compact),
            "pretty" => Ok(Self::Pretty),
            "json" => Ok(Self::Json),
            other => Err(ConfigError::Validation(format!(
                "unknown log format `{other}`, expected compact, pretty, or json"
            ))),
        }
    }
}

impl AppConfig {
    pub fn load(options: LoadOptions) -> Result<Self, ConfigError> {
        let mut config = Self::default();
        let maybe_path = resolve_config_path(options.config_path.as_deref());

        if let Some(path) = maybe_path {
            read_patch(&path)?.apply_to(&mut config);
        } else if options.require_file {
            let expected = options.config_path.unwrap_or_else(|| PathBuf::from("permitflow.toml"));
            return Err(ConfigError::MissingConfigFile(expected));
        }

        config.apply_env_overrides()?;
        config.apply_overrides(options.overrides);
        config.validate()?;

        Ok(config)
    }

    fn apply_env_overrides(&mut self) -> Result<(), ConfigError> {
        if let Some(value) = read_env("PERMITFLOW_DATABASE_URL") {
            self.database.url = value;
        }
        if let Some(value) = read_env("PERMITFLOW_DATABASE_MAX_CONNECTIONS") {
            self.database.max_connections =
                parse_env("PERMITFLOW_DATABASE_MAX_CONNECTIONS", &value)?;
        }
        if let Some(value) = read_env("PERMITFLOW_DATABASE_TIMEOUT_SECS") {
            self.database.timeout_secs = parse_env("PERMITFLOW_DATABASE_TIMEOUT_SECS", &value)?;
        }

        if let Some(value) = read_env("PERMITFLOW_WORKFLOW_MAX_SUPERVISOR_DEPTH") {
            self.workflow.max_supervisor_depth =
                parse_env("PERMITFLOW_WORKFLOW_MAX_SUPERVISOR_DEPTH", &value)?;
        }
        if let Some(value) = read_env("PERMITFLOW_WORKFLOW_MAX_EXTENSION_DAYS") {
            self.workflow.max_extension_days =
                parse_env("PERMITFLOW_WORKFLOW_MAX_EXTENSION_DAYS", &value)?;
        }
        if let Some(value) = read_env("PERMITFLOW_WORKFLOW_STORE_SNAPSHOTS") {
            self.workflow.store_snapshots =
                parse_env("PERMITFLOW_WORKFLOW_STORE_SNAPSHOTS", &value)?;
        }

        let log_level =
            read_env("PERMITFLOW_LOGGING_LEVEL").or_else(|| read_env("PERMITFLOW_LOG_LEVEL"));
        if let Some(value) = log_level {
            self.logging.level = value;
        }
        let log_format =
            read_env("PERMITFLOW_LOGGING_FORMAT").or_else(|| read_env("PERMITFLOW_LOG_FORMAT"));
        if let Some(value) = log_format {
            self.logging.format = value.parse()?;
        }

        Ok(())
    }

    fn apply_overrides(&mut self, overrides: ConfigOverrides) {
        if let Some(database_url) = overrides.database_url {
            self.database.url = database_url;
        }
        if let Some(log_level) = overrides.log_level {
            self.logging.level = log_level;
        }
        if let Some(max_supervisor_depth) = overrides.max_supervisor_depth {
            self.workflow.max_supervisor_depth = max_supervisor_depth;
        }
        if let Some(max_extension_days) = overrides.max_extension_days {
            self.workflow.max_extension_days = max_extension_days;
        }
        if let Some(store_snapshots) = overrides.store_snapshots {
            self.workflow.store_snapshots = store_snapshots;
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        self.database.validate()?;
        self.workflow.validate()?;
        self.logging.validate()?;
        Ok(())
    }
}

impl DatabaseConfig {
    fn validate(&self) -> Result<(), ConfigError> {
        let url = self.url.trim();
        let sqlite_url =
            url.starts_with("sqlite://") || url.starts_with("sqlite::") || url == ":memory:";
        if !sqlite_url {
            return Err(ConfigError::Validation(
                "database.url must point at sqlite (`sqlite://...`, `sqlite::...`, or `:memory:`)"
                    .to_string(),
            ));
        }

        if self.max_connections == 0 {
            return Err(ConfigError::Validation(
                "database.max_connections must be at least 1".to_string(),
            ));
        }

        if self.timeout_secs == 0 || self.timeout_secs > 300 {
            return Err(ConfigError::Validation(
                "database.timeout_secs must be between 1 and 300".to_string(),
            ));
        }

        Ok(())
    }
}

impl WorkflowConfig {
    fn validate(&self) -> Result<(), ConfigError> {
        if self.max_supervisor_depth == 0 || self.max_supervisor_depth > 128 {
            return Err(ConfigError::Validation(
                "workflow.max_supervisor_depth must be between 1 and 128".to_string(),
            ));
        }

        if self.max_extension_days <= 0 || self.max_extension_days > 365 {
            return Err(ConfigError::Validation(
                "workflow.max_extension_days must be between 1 and 365".to_string(),
            ));
        }

        Ok(())
    }
}

impl LoggingConfig {
    fn validate(&self) -> Result<(), ConfigError> {
        match self.level.trim().to_ascii_lowercase().as_str() {
            "trace" | "debug" | "info" | "warn" | "error" => Ok(()),
            _ => Err(ConfigError::Validation(
                "logging.level must be trace, debug, info, warn, or error".to_string(),
            )),
        }
    }
}

fn resolve_config_path(explicit_path: Option<&Path>) -> Option<PathBuf> {
    if let Some(path) = explicit_path {
        return path.exists().then_some(path.to_path_buf());
    }

    [PathBuf::from("permitflow.toml"), PathBuf::from("config/permitflow.toml")]
        .into_iter()
        .find(|path| path.exists())
}

fn read_patch(path: &Path) -> Result<ConfigPatch, ConfigError> {
    let raw = fs::read_to_string(path)
        .map_err(|source| ConfigError::ReadFile { path: path.to_path_buf(), source })?;

    let interpolated = interpolate_env_vars(&raw)?;
    toml::from_str::<ConfigPatch>(&interpolated)
        .map_err(|source| ConfigError::ParseFile { path: path.to_path_buf(), source })
}

/// Substitute `${VAR}` references with environment values before parsing.
fn interpolate_env_vars(input: &str) -> Result<String, ConfigError> {
    let mut output = String::with_capacity(input.len());
    let mut rest = input;

    while let Some(start) = rest.find("${") {
        output.push_str(&rest[..start]);
        let after = &rest[start + 2..];
        let end = after.find('}').ok_or(ConfigError::UnterminatedInterpolation)?;
        let key = &after[..end];
        let value = env::var(key)
            .map_err(|_| ConfigError::MissingEnvInterpolation { var: key.to_string() })?;
        output.push_str(&value);
        rest = &after[end + 1..];
    }

    output.push_str(rest);
    Ok(output)
}

fn read_env(key: &str) -> Option<String> {
    env::var(key).ok().filter(|value| !value.trim().is_empty())
}

fn parse_env<T: std::str::FromStr>(key: &str, value: &str) -> Result<T, ConfigError> {
    value.parse().map_err(|_| ConfigError::InvalidEnvOverride {
        key: key.to_string(),
        value: value.to_string(),
    })
}

#[derive(Debug, Default, Deserialize)]
struct ConfigPatch {
    database: Option<DatabasePatch>,
    workflow: Option<WorkflowPatch>,
    logging: Option<LoggingPatch>,
}

impl ConfigPatch {
    fn apply_to(self, config: &mut AppConfig) {
        if let Some(database) = self.database {
            if let Some(url) = database.url {
                config.database.url = url;
            }
            if let Some(max_connections) = database.max_connections {
                config.database.max_connections = max_connections;
            }
            if let Some(timeout_secs) = database.timeout_secs {
                config.database.timeout_secs = timeout_secs;
            }
        }

        if let Some(workflow) = self.workflow {
            if let Some(max_supervisor_depth) = workflow.max_supervisor_depth {
                config.workflow.max_supervisor_depth = max_supervisor_depth;
            }
            if let Some(max_extension_days) = workflow.max_extension_days {
                config.workflow.max_extension_days = max_extension_days;
            }
            if let Some(store_snapshots) = workflow.store_snapshots {
                config.workflow.store_snapshots = store_snapshots;
            }
        }

        if let Some(logging) = self.logging {
            if let Some(level) = logging.level {
                config.logging.level = level;
            }
            if let Some(format) = logging.format {
                config.logging.format = format;
            }
        }
    }
}

#[derive(Debug, Default, Deserialize)]
struct DatabasePatch {
    url: Option<String>,
    max_connections: Option<u32>,
    timeout_secs: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
struct WorkflowPatch {
    max_supervisor_depth: Option<u32>,
    max_extension_days: Option<i64>,
    store_snapshots: Option<bool>,
}

#[derive(Debug, Default, Deserialize)]
struct LoggingPatch {
    level: Option<String>,
    format: Option<LogFormat>,
}
