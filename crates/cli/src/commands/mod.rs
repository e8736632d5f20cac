pub mod config;
pub mod doctor;
pub mod migrate;
pub mod seed;
pub mod verify;

use std::future::Future;

use permitflow_core::config::{AppConfig, LoadOptions};
use permitflow_db::{connect_with_settings, DbPool};
use serde::Serialize;

#[derive(Debug, Clone)]
pub struct CommandResult {
    pub exit_code: u8,
    pub output: String,
}

#[derive(Debug, Serialize)]
struct CommandOutcome {
    command: String,
    status: String,
    error_class: Option<String>,
    message: String,
}

impl CommandResult {
    pub fn success(command: &str, message: impl Into<String>) -> Self {
        let payload = CommandOutcome {
            command: command.to_string(),
            status: "ok".to_string(),
            error_class: None,
            message: message.into(),
        };
        Self { exit_code: 0, output: serialize_payload(payload) }
    }

    pub fn failure(
        command: &str,
        error_class: &str,
        message: impl Into<String>,
        exit_code: u8,
    ) -> Self {
        let payload = CommandOutcome {
            command: command.to_string(),
            status: "error".to_string(),
            error_class: Some(error_class.to_string()),
            message: message.into(),
        };
        Self { exit_code, output: serialize_payload(payload) }
    }
}

/// A command step that failed, carried back to the shared scaffold so every
/// command reports errors through the same JSON payload and exit-code table.
#[derive(Debug)]
pub(crate) struct CommandError {
    class: &'static str,
    message: String,
    exit_code: u8,
}

impl CommandError {
    pub(crate) fn new(class: &'static str, message: impl Into<String>, exit_code: u8) -> Self {
        Self { class, message: message.into(), exit_code }
    }
}

/// Shared scaffold for pool-backed commands: load config, stand up a
/// current-thread runtime, connect, run the body, close the pool.
///
/// Exit codes 2 (config), 3 (runtime) and 4 (connectivity) are claimed here;
/// bodies pick their own codes from 5 upward (1 is reserved for domain-level
/// failures such as a tampered signature).
pub(crate) fn block_on_pool<T, Fut>(
    command: &str,
    body: impl FnOnce(DbPool) -> Fut,
) -> Result<T, CommandResult>
where
    Fut: Future<Output = Result<T, CommandError>>,
{
    let config = AppConfig::load(LoadOptions::default()).map_err(|error| {
        CommandResult::failure(
            command,
            "config_validation",
            format!("configuration issue: {error}"),
            2,
        )
    })?;

    let runtime =
        tokio::runtime::Builder::new_current_thread().enable_all().build().map_err(|error| {
            CommandResult::failure(
                command,
                "runtime_init",
                format!("failed to initialize async runtime: {error}"),
                3,
            )
        })?;

    runtime.block_on(async {
        let pool = connect_with_settings(
            &config.database.url,
            config.database.max_connections,
            config.database.timeout_secs,
        )
        .await
        .map_err(|error| {
            CommandResult::failure(command, "db_connectivity", error.to_string(), 4)
        })?;

        let outcome = body(pool.clone()).await;
        pool.close().await;
        outcome.map_err(|error| {
            CommandResult::failure(command, error.class, error.message, error.exit_code)
        })
    })
}

fn serialize_payload(payload: CommandOutcome) -> String {
    serde_json::to_string(&payload).unwrap_or_else(|error| {
        format!(
            "{{\"command\":\"unknown\",\"status\":\"error\",\"error_class\":\"serialization\",\"message\":\"{}\"}}",
            error.to_string().replace('\\', "\\\\").replace('"', "\\\"")
        )
    })
}
