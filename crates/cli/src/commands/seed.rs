use crate::commands::{block_on_pool, CommandError, CommandResult};
use permitflow_db::{migrations, SeedDataset};

pub fn run() -> CommandResult {
    let seeded = block_on_pool("seed", |pool| async move {
        migrations::run_pending(&pool)
            .await
            .map_err(|error| CommandError::new("migration", error.to_string(), 5))?;
        SeedDataset::apply(&pool)
            .await
            .map_err(|error| CommandError::new("seed_execution", error.to_string(), 6))
    });

    match seeded {
        Ok(seeded) => CommandResult::success(
            "seed",
            format!(
                "seeded template {} v{} and draft instance {}",
                seeded.template_id, seeded.template_version, seeded.instance_id
            ),
        ),
        Err(failure) => failure,
    }
}
