use sqlx::Row;

use permitflow_core::domain::extension::ExtensionRequest;
use permitflow_core::domain::workflow::InstanceId;

use super::{
    extension_status_as_str, parse_datetime, parse_extension_status, parse_optional_datetime,
    ExtensionRepository, RepositoryError,
};
use crate::DbPool;

pub struct SqlExtensionRepository {
    pool: DbPool,
}

impl SqlExtensionRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

const EXTENSION_COLUMNS: &str = "id, instance_id, old_deadline, new_deadline, reason, \
     requested_by, decided_by, decision_comment, status, created_at, decided_at";

fn row_to_extension(row: &sqlx::sqlite::SqliteRow) -> Result<ExtensionRequest, RepositoryError> {
    let id: String = row.try_get("id").map_err(|e| RepositoryError::Decode(e.to_string()))?;
    let instance_id: String =
        row.try_get("instance_id").map_err(|e| RepositoryError::Decode(e.to_string()))?;
    let old_deadline: String =
        row.try_get("old_deadline").map_err(|e| RepositoryError::Decode(e.to_string()))?;
    let new_deadline: String =
        row.try_get("new_deadline").map_err(|e| RepositoryError::Decode(e.to_string()))?;
    let reason: String =
        row.try_get("reason").map_err(|e| RepositoryError::Decode(e.to_string()))?;
    let requested_by: String =
        row.try_get("requested_by").map_err(|e| RepositoryError::Decode(e.to_string()))?;
    let decided_by: Option<String> =
        row.try_get("decided_by").map_err(|e| RepositoryError::Decode(e.to_string()))?;
    let decision_comment: Option<String> =
        row.try_get("decision_comment").map_err(|e| RepositoryError::Decode(e.to_string()))?;
    let status: String =
        row.try_get("status").map_err(|e| RepositoryError::Decode(e.to_string()))?;
    let created_at: String =
        row.try_get("created_at").map_err(|e| RepositoryError::Decode(e.to_string()))?;
    let decided_at: Option<String> =
        row.try_get("decided_at").map_err(|e| RepositoryError::Decode(e.to_string()))?;

    Ok(ExtensionRequest {
        id,
        instance_id: InstanceId(instance_id),
        old_deadline: parse_datetime(&old_deadline),
        new_deadline: parse_datetime(&new_deadline),
        reason,
        requested_by,
        decided_by,
        decision_comment,
        status: parse_extension_status(&status),
        created_at: parse_datetime(&created_at),
        decided_at: parse_optional_datetime(decided_at),
    })
}

#[async_trait::async_trait]
impl ExtensionRepository for SqlExtensionRepository {
    async fn save(&self, request: ExtensionRequest) -> Result<(), RepositoryError> {
        sqlx::query(
            "INSERT INTO extension_request
                 (id, instance_id, old_deadline, new_deadline, reason, requested_by,
                  decided_by, decision_comment, status, created_at, decided_at)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
             ON CONFLICT(id) DO UPDATE SET
                 decided_by = excluded.decided_by,
                 decision_comment = excluded.decision_comment,
                 status = excluded.status,
                 decided_at = excluded.decided_at",
        )
        .bind(&request.id)
        .bind(&request.instance_id.0)
        .bind(request.old_deadline.to_rfc3339())
        .bind(request.new_deadline.to_rfc3339())
        .bind(&request.reason)
        .bind(&request.requested_by)
        .bind(&request.decided_by)
        .bind(&request.decision_comment)
        .bind(extension_status_as_str(request.status))
        .bind(request.created_at.to_rfc3339())
        .bind(request.decided_at.map(|dt| dt.to_rfc3339()))
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn find_by_id(&self, id: &str) -> Result<Option<ExtensionRequest>, RepositoryError> {
        let row =
            sqlx::query(&format!("SELECT {EXTENSION_COLUMNS} FROM extension_request WHERE id = ?"))
                .bind(id)
                .fetch_optional(&self.pool)
                .await?;

        match row {
            Some(ref r) => Ok(Some(row_to_extension(r)?)),
            None => Ok(None),
        }
    }

    async fn find_pending(
        &self,
        instance_id: &InstanceId,
    ) -> Result<Option<ExtensionRequest>, RepositoryError> {
        let row = sqlx::query(&format!(
            "SELECT {EXTENSION_COLUMNS} FROM extension_request
             WHERE instance_id = ? AND status = 'pending'"
        ))
        .bind(&instance_id.0)
        .fetch_optional(&self.pool)
        .await?;

        match row {
            Some(ref r) => Ok(Some(row_to_extension(r)?)),
            None => Ok(None),
        }
    }

    async fn list_for_instance(
        &self,
        instance_id: &InstanceId,
    ) -> Result<Vec<ExtensionRequest>, RepositoryError> {
        let rows: Vec<sqlx::sqlite::SqliteRow> = sqlx::query(&format!(
            "SELECT {EXTENSION_COLUMNS} FROM extension_request
             WHERE instance_id = ? ORDER BY created_at DESC"
        ))
        .bind(&instance_id.0)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(row_to_extension).collect::<Result<Vec<_>, _>>()
    }
}

#[cfg(test)]
mod tests {
    use chrono::{Duration, Utc};

    use permitflow_core::domain::extension::{ExtensionRequest, ExtensionStatus};
    use permitflow_core::domain::workflow::InstanceId;

    use super::SqlExtensionRepository;
    use crate::fixtures::{insert_template, sample_instance};
    use crate::repositories::{ExtensionRepository, InstanceRepository, SqlInstanceRepository};
    use crate::{connect_with_settings, migrations};

    async fn setup() -> sqlx::SqlitePool {
        let pool = connect_with_settings("sqlite::memory:", 1, 30).await.expect("connect");
        migrations::run_pending(&pool).await.expect("migrations");
        insert_template(&pool).await;
        SqlInstanceRepository::new(pool.clone())
            .save(sample_instance("WP-1"))
            .await
            .expect("insert parent instance");
        pool
    }

    fn sample_request() -> ExtensionRequest {
        let old = Utc::now() + Duration::days(7);
        ExtensionRequest::pending(
            InstanceId("WP-1".to_string()),
            old,
            old + Duration::days(10),
            "vendor parts delayed",
            "u-worker",
        )
    }

    #[tokio::test]
    async fn save_find_and_pending_lookup() {
        let pool = setup().await;
        let repo = SqlExtensionRepository::new(pool);
        let request = sample_request();

        repo.save(request.clone()).await.expect("save");
        let found = repo.find_by_id(&request.id).await.expect("find").expect("exists");
        assert_eq!(found.status, ExtensionStatus::Pending);
        assert_eq!(found.reason, "vendor parts delayed");

        let pending = repo
            .find_pending(&InstanceId("WP-1".to_string()))
            .await
            .expect("pending")
            .expect("one pending");
        assert_eq!(pending.id, request.id);
    }

    #[tokio::test]
    async fn second_pending_request_violates_the_unique_index() {
        let pool = setup().await;
        let repo = SqlExtensionRepository::new(pool);

        repo.save(sample_request()).await.expect("first pending");
        let err = repo.save(sample_request()).await.expect_err("second pending must fail");
        assert!(matches!(err, crate::repositories::RepositoryError::Database(_)));
    }

    #[tokio::test]
    async fn decided_requests_leave_the_pending_slot_free() {
        let pool = setup().await;
        let repo = SqlExtensionRepository::new(pool);

        let mut decided = sample_request();
        decided.status = ExtensionStatus::Rejected;
        decided.decided_by = Some("u-safety".to_string());
        decided.decided_at = Some(Utc::now());
        repo.save(decided).await.expect("save decided");

        assert!(repo
            .find_pending(&InstanceId("WP-1".to_string()))
            .await
            .expect("pending")
            .is_none());
        repo.save(sample_request()).await.expect("new pending fits");

        let all = repo.list_for_instance(&InstanceId("WP-1".to_string())).await.expect("list");
        assert_eq!(all.len(), 2);
    }
}
