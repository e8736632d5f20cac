use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use permitflow_core::config::{AppConfig, LoadOptions};
use toml::Value;

pub fn run() -> String {
    let config = match AppConfig::load(LoadOptions::default()) {
        Ok(config) => config,
        Err(error) => return format!("config validation failed: {error}"),
    };

    let config_file_path = detect_config_path();
    let config_file_doc = load_config_file_doc(config_file_path.as_deref());
    let source = |key_path: &str, env_key: &str| {
        field_source(key_path, env_key, config_file_doc.as_ref(), config_file_path.as_deref())
    };

    let mut lines = vec!["effective configuration (env beats file beats default):".to_string()];

    lines.push(render_line(
        "database.url",
        &config.database.url,
        source("database.url", "PERMITFLOW_DATABASE_URL"),
    ));
    lines.push(render_line(
        "database.max_connections",
        &config.database.max_connections.to_string(),
        source("database.max_connections", "PERMITFLOW_DATABASE_MAX_CONNECTIONS"),
    ));
    lines.push(render_line(
        "database.timeout_secs",
        &config.database.timeout_secs.to_string(),
        source("database.timeout_secs", "PERMITFLOW_DATABASE_TIMEOUT_SECS"),
    ));

    lines.push(render_line(
        "workflow.max_supervisor_depth",
        &config.workflow.max_supervisor_depth.to_string(),
        source("workflow.max_supervisor_depth", "PERMITFLOW_WORKFLOW_MAX_SUPERVISOR_DEPTH"),
    ));
    lines.push(render_line(
        "workflow.max_extension_days",
        &config.workflow.max_extension_days.to_string(),
        source("workflow.max_extension_days", "PERMITFLOW_WORKFLOW_MAX_EXTENSION_DAYS"),
    ));
    lines.push(render_line(
        "workflow.store_snapshots",
        &config.workflow.store_snapshots.to_string(),
        source("workflow.store_snapshots", "PERMITFLOW_WORKFLOW_STORE_SNAPSHOTS"),
    ));

    lines.push(render_line(
        "logging.level",
        &config.logging.level,
        source("logging.level", "PERMITFLOW_LOGGING_LEVEL"),
    ));
    lines.push(render_line(
        "logging.format",
        &format!("{:?}", config.logging.format),
        source("logging.format", "PERMITFLOW_LOGGING_FORMAT"),
    ));

    lines.join("\n")
}

fn detect_config_path() -> Option<PathBuf> {
    [PathBuf::from("permitflow.toml"), PathBuf::from("config/permitflow.toml")]
        .into_iter()
        .find(|path| path.exists())
}

fn load_config_file_doc(path: Option<&Path>) -> Option<Value> {
    let path = path?;
    let raw = fs::read_to_string(path).ok()?;
    raw.parse::<Value>().ok()
}

fn field_source(
    key_path: &str,
    env_key: &str,
    config_file_doc: Option<&Value>,
    config_file_path: Option<&Path>,
) -> String {
    if env::var_os(env_key).is_some() {
        return format!("env ({env_key})");
    }

    if let Some(doc) = config_file_doc {
        if contains_path(doc, key_path) {
            let file_path = config_file_path
                .map(|path| path.display().to_string())
                .unwrap_or_else(|| "config file".to_string());
            return format!("file ({file_path})");
        }
    }

    "default".to_string()
}

fn contains_path(root: &Value, key_path: &str) -> bool {
    let mut current = root;
    for key in key_path.split('.') {
        let Some(next) = current.get(key) else {
            return false;
        };
        current = next;
    }
    true
}

fn render_line(key: &str, value: &str, source: String) -> String {
    format!("- {key} = {value} (source: {source})")
}
