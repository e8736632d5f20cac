use chrono::Utc;
use sqlx::Row;
use tracing::warn;

use permitflow_core::domain::workflow::{StepDefinition, TemplateId, WorkflowTemplate};

use super::{RepositoryError, TemplateRepository};
use crate::DbPool;

pub struct SqlTemplateRepository {
    pool: DbPool,
}

impl SqlTemplateRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

fn row_to_template(row: &sqlx::sqlite::SqliteRow) -> Result<WorkflowTemplate, RepositoryError> {
    let id: String = row.try_get("id").map_err(|e| RepositoryError::Decode(e.to_string()))?;
    let version: i64 =
        row.try_get("version").map_err(|e| RepositoryError::Decode(e.to_string()))?;
    let name: String = row.try_get("name").map_err(|e| RepositoryError::Decode(e.to_string()))?;
    let steps_raw: String =
        row.try_get("steps").map_err(|e| RepositoryError::Decode(e.to_string()))?;

    // Legacy step configs may omit the approval mode. They still parse (the
    // engine then treats the step as ANY), but that is a configuration bug
    // worth surfacing every time the template is loaded.
    if let Ok(raw_steps) = serde_json::from_str::<Vec<serde_json::Value>>(&steps_raw) {
        for step in &raw_steps {
            if step.get("mode").is_none() {
                warn!(
                    event_name = "template_step_mode_defaulted",
                    template_id = %id,
                    step = %step.get("index").cloned().unwrap_or_default(),
                    "step config omits the approval mode, defaulting to ANY"
                );
            }
        }
    }

    let steps: Vec<StepDefinition> = serde_json::from_str(&steps_raw)
        .map_err(|e| RepositoryError::Decode(format!("template `{id}` steps: {e}")))?;

    Ok(WorkflowTemplate { id: TemplateId(id), version: version as u32, name, steps })
}

#[async_trait::async_trait]
impl TemplateRepository for SqlTemplateRepository {
    async fn find(
        &self,
        id: &TemplateId,
        version: u32,
    ) -> Result<Option<WorkflowTemplate>, RepositoryError> {
        let row = sqlx::query(
            "SELECT id, version, name, steps FROM workflow_template WHERE id = ? AND version = ?",
        )
        .bind(&id.0)
        .bind(version as i64)
        .fetch_optional(&self.pool)
        .await?;

        match row {
            Some(ref r) => Ok(Some(row_to_template(r)?)),
            None => Ok(None),
        }
    }

    async fn latest(&self, id: &TemplateId) -> Result<Option<WorkflowTemplate>, RepositoryError> {
        let row = sqlx::query(
            "SELECT id, version, name, steps FROM workflow_template
             WHERE id = ? ORDER BY version DESC LIMIT 1",
        )
        .bind(&id.0)
        .fetch_optional(&self.pool)
        .await?;

        match row {
            Some(ref r) => Ok(Some(row_to_template(r)?)),
            None => Ok(None),
        }
    }

    async fn save(&self, template: WorkflowTemplate) -> Result<(), RepositoryError> {
        let steps = serde_json::to_string(&template.steps)
            .map_err(|e| RepositoryError::Decode(e.to_string()))?;
        let now = Utc::now().to_rfc3339();

        sqlx::query(
            "INSERT INTO workflow_template (id, version, name, steps, created_at, updated_at)
             VALUES (?, ?, ?, ?, ?, ?)
             ON CONFLICT(id, version) DO UPDATE SET
                 name = excluded.name,
                 steps = excluded.steps,
                 updated_at = excluded.updated_at",
        )
        .bind(&template.id.0)
        .bind(template.version as i64)
        .bind(&template.name)
        .bind(&steps)
        .bind(&now)
        .bind(&now)
        .execute(&self.pool)
        .await?;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use permitflow_core::domain::workflow::{
        ApprovalMode, StepDefinition, TemplateId, WorkflowTemplate,
    };
    use permitflow_core::resolve::ResolutionSpec;

    use super::SqlTemplateRepository;
    use crate::repositories::TemplateRepository;
    use crate::{connect_with_settings, migrations};

    async fn setup() -> sqlx::SqlitePool {
        let pool = connect_with_settings("sqlite::memory:", 1, 30).await.expect("connect");
        migrations::run_pending(&pool).await.expect("migrations");
        pool
    }

    fn sample_template(version: u32) -> WorkflowTemplate {
        WorkflowTemplate {
            id: TemplateId("tpl-hot-work".to_string()),
            version,
            name: "hot work permit".to_string(),
            steps: vec![StepDefinition {
                index: 0,
                name: "issue".to_string(),
                mode: ApprovalMode::Any,
                resolver: ResolutionSpec::SpecificUsers { user_ids: vec!["u-1".to_string()] },
                require_field_confirmation: false,
            }],
        }
    }

    #[tokio::test]
    async fn save_and_find_round_trip() {
        let pool = setup().await;
        let repo = SqlTemplateRepository::new(pool);
        let template = sample_template(1);

        repo.save(template.clone()).await.expect("save");
        let found = repo
            .find(&TemplateId("tpl-hot-work".to_string()), 1)
            .await
            .expect("find")
            .expect("should exist");

        assert_eq!(found, template);
    }

    #[tokio::test]
    async fn latest_prefers_the_highest_version() {
        let pool = setup().await;
        let repo = SqlTemplateRepository::new(pool);

        repo.save(sample_template(1)).await.expect("save v1");
        repo.save(sample_template(3)).await.expect("save v3");
        repo.save(sample_template(2)).await.expect("save v2");

        let latest = repo
            .latest(&TemplateId("tpl-hot-work".to_string()))
            .await
            .expect("latest")
            .expect("should exist");
        assert_eq!(latest.version, 3);
    }

    #[tokio::test]
    async fn missing_template_is_none() {
        let pool = setup().await;
        let repo = SqlTemplateRepository::new(pool);
        assert!(repo
            .find(&TemplateId("tpl-ghost".to_string()), 1)
            .await
            .expect("find")
            .is_none());
    }
}
