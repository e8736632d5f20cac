use anyhow::Context;
use permitflow_core::config::{AppConfig, LoadOptions};
use permitflow_db::{connect_with_settings, migrations};
use serde::Serialize;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
enum CheckStatus {
    Pass,
    Fail,
    Skipped,
}

#[derive(Debug, Serialize)]
struct DoctorCheck {
    name: &'static str,
    status: CheckStatus,
    details: String,
}

#[derive(Debug, Serialize)]
struct DoctorReport {
    overall_status: CheckStatus,
    summary: String,
    checks: Vec<DoctorCheck>,
}

pub fn run(json_output: bool) -> (u8, String) {
    let report = build_report();
    let exit_code = if report.overall_status == CheckStatus::Pass { 0 } else { 1 };

    let output = if json_output {
        serde_json::to_string_pretty(&report).unwrap_or_else(|error| {
            format!(
                "{{\"overall_status\":\"fail\",\"summary\":\"doctor serialization failed\",\"error\":\"{}\"}}",
                error.to_string().replace('\\', "\\\\").replace('"', "\\\"")
            )
        })
    } else {
        render_human(&report)
    };

    (exit_code, output)
}

fn build_report() -> DoctorReport {
    let mut checks = Vec::new();

    match AppConfig::load(LoadOptions::default()) {
        Ok(config) => {
            checks.push(DoctorCheck {
                name: "config_validation",
                status: CheckStatus::Pass,
                details: "configuration loads and validates".to_string(),
            });
            let (connectivity, schema) = check_database(&config);
            checks.push(connectivity);
            checks.push(schema);
        }
        Err(error) => {
            checks.push(DoctorCheck {
                name: "config_validation",
                status: CheckStatus::Fail,
                details: error.to_string(),
            });
            for name in ["database_connectivity", "schema_migrations"] {
                checks.push(DoctorCheck {
                    name,
                    status: CheckStatus::Skipped,
                    details: "skipped because configuration did not load".to_string(),
                });
            }
        }
    }

    let all_pass = checks.iter().all(|check| check.status == CheckStatus::Pass);
    let overall_status = if all_pass { CheckStatus::Pass } else { CheckStatus::Fail };
    let summary = if all_pass {
        "doctor: everything looks healthy".to_string()
    } else {
        "doctor: at least one check failed".to_string()
    };

    DoctorReport { overall_status, summary, checks }
}

/// Connectivity and schema state share one connection; the schema check is
/// skipped when the database is unreachable.
fn check_database(config: &AppConfig) -> (DoctorCheck, DoctorCheck) {
    let skipped = |name| DoctorCheck {
        name,
        status: CheckStatus::Skipped,
        details: "skipped because the database was unreachable".to_string(),
    };

    let runtime = match tokio::runtime::Builder::new_current_thread().enable_all().build() {
        Ok(runtime) => runtime,
        Err(error) => {
            return (
                DoctorCheck {
                    name: "database_connectivity",
                    status: CheckStatus::Fail,
                    details: format!("failed to initialize async runtime: {error}"),
                },
                skipped("schema_migrations"),
            );
        }
    };

    let result = runtime.block_on(async {
        let pool = connect_with_settings(
            &config.database.url,
            config.database.max_connections,
            config.database.timeout_secs,
        )
        .await
        .context("failed to connect to database")?;

        let applied = migrations::applied_count(&pool)
            .await
            .context("failed to read applied migrations");
        pool.close().await;
        applied
    });

    match result {
        Ok(applied) => {
            let expected = migrations::MIGRATOR.iter().filter(|m| !m.migration_type.is_down_migration()).count();
            let schema = if applied == expected {
                DoctorCheck {
                    name: "schema_migrations",
                    status: CheckStatus::Pass,
                    details: format!("{applied} of {expected} migrations applied"),
                }
            } else {
                DoctorCheck {
                    name: "schema_migrations",
                    status: CheckStatus::Fail,
                    details: format!(
                        "{applied} of {expected} migrations applied, run `permitflow migrate`"
                    ),
                }
            };
            (
                DoctorCheck {
                    name: "database_connectivity",
                    status: CheckStatus::Pass,
                    details: format!("connected using `{}`", config.database.url),
                },
                schema,
            )
        }
        Err(error) => (
            DoctorCheck {
                name: "database_connectivity",
                status: CheckStatus::Fail,
                details: format!("{error:#}"),
            },
            skipped("schema_migrations"),
        ),
    }
}

fn render_human(report: &DoctorReport) -> String {
    let mut lines = Vec::new();
    lines.push(report.summary.clone());

    for check in &report.checks {
        let marker = match check.status {
            CheckStatus::Pass => "ok",
            CheckStatus::Fail => "fail",
            CheckStatus::Skipped => "skip",
        };
        lines.push(format!("- [{marker}] {}: {}", check.name, check.details));
    }

    lines.join("\n")
}
