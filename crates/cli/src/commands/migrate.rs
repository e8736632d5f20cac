use crate::commands::{block_on_pool, CommandError, CommandResult};
use permitflow_db::migrations;

pub fn run() -> CommandResult {
    let applied = block_on_pool("migrate", |pool| async move {
        migrations::run_pending(&pool)
            .await
            .map_err(|error| CommandError::new("migration", error.to_string(), 5))?;
        migrations::applied_count(&pool)
            .await
            .map_err(|error| CommandError::new("migration", error.to_string(), 5))
    });

    match applied {
        Ok(count) => CommandResult::success(
            "migrate",
            format!("schema is current, {count} migration(s) applied"),
        ),
        Err(failure) => failure,
    }
}
