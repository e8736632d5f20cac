use sqlx::Row;

use permitflow_core::domain::signature::{ClientContext, SignatureRecord};
use permitflow_core::domain::workflow::{InstanceId, UserRef};

use super::{
    parse_datetime, parse_workflow_action, workflow_action_as_str, RepositoryError,
    SignatureRepository,
};
use crate::DbPool;

pub struct SqlSignatureRepository {
    pool: DbPool,
}

impl SqlSignatureRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

const SIGNATURE_COLUMNS: &str = "id, instance_id, step_index, signer_id, signer_name, action, \
     comment, snapshot_hash, snapshot, ip, user_agent, device, browser, os, signed_at";

fn row_to_signature(row: &sqlx::sqlite::SqliteRow) -> Result<SignatureRecord, RepositoryError> {
    let id: String = row.try_get("id").map_err(|e| RepositoryError::Decode(e.to_string()))?;
    let instance_id: String =
        row.try_get("instance_id").map_err(|e| RepositoryError::Decode(e.to_string()))?;
    let step_index: i64 =
        row.try_get("step_index").map_err(|e| RepositoryError::Decode(e.to_string()))?;
    let signer_id: String =
        row.try_get("signer_id").map_err(|e| RepositoryError::Decode(e.to_string()))?;
    let signer_name: String =
        row.try_get("signer_name").map_err(|e| RepositoryError::Decode(e.to_string()))?;
    let action: String =
        row.try_get("action").map_err(|e| RepositoryError::Decode(e.to_string()))?;
    let comment: Option<String> =
        row.try_get("comment").map_err(|e| RepositoryError::Decode(e.to_string()))?;
    let snapshot_hash: String =
        row.try_get("snapshot_hash").map_err(|e| RepositoryError::Decode(e.to_string()))?;
    let snapshot: Option<String> =
        row.try_get("snapshot").map_err(|e| RepositoryError::Decode(e.to_string()))?;
    let ip: Option<String> = row.try_get("ip").map_err(|e| RepositoryError::Decode(e.to_string()))?;
    let user_agent: Option<String> =
        row.try_get("user_agent").map_err(|e| RepositoryError::Decode(e.to_string()))?;
    let device: Option<String> =
        row.try_get("device").map_err(|e| RepositoryError::Decode(e.to_string()))?;
    let browser: Option<String> =
        row.try_get("browser").map_err(|e| RepositoryError::Decode(e.to_string()))?;
    let os: Option<String> = row.try_get("os").map_err(|e| RepositoryError::Decode(e.to_string()))?;
    let signed_at: String =
        row.try_get("signed_at").map_err(|e| RepositoryError::Decode(e.to_string()))?;

    Ok(SignatureRecord {
        id,
        instance_id: InstanceId(instance_id),
        step_index: step_index as i32,
        signer: UserRef { id: signer_id, name: signer_name },
        action: parse_workflow_action(&action),
        comment,
        snapshot_hash,
        snapshot,
        client: ClientContext { ip, user_agent, device, browser, os },
        signed_at: parse_datetime(&signed_at),
    })
}

#[async_trait::async_trait]
impl SignatureRepository for SqlSignatureRepository {
    async fn save(&self, record: SignatureRecord) -> Result<(), RepositoryError> {
        sqlx::query(
            "INSERT INTO signature_record
                 (id, instance_id, step_index, signer_id, signer_name, action, comment,
                  snapshot_hash, snapshot, ip, user_agent, device, browser, os, signed_at)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&record.id)
        .bind(&record.instance_id.0)
        .bind(record.step_index)
        .bind(&record.signer.id)
        .bind(&record.signer.name)
        .bind(workflow_action_as_str(record.action))
        .bind(&record.comment)
        .bind(&record.snapshot_hash)
        .bind(&record.snapshot)
        .bind(&record.client.ip)
        .bind(&record.client.user_agent)
        .bind(&record.client.device)
        .bind(&record.client.browser)
        .bind(&record.client.os)
        .bind(record.signed_at.to_rfc3339())
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn find_by_id(&self, id: &str) -> Result<Option<SignatureRecord>, RepositoryError> {
        let row =
            sqlx::query(&format!("SELECT {SIGNATURE_COLUMNS} FROM signature_record WHERE id = ?"))
                .bind(id)
                .fetch_optional(&self.pool)
                .await?;

        match row {
            Some(ref r) => Ok(Some(row_to_signature(r)?)),
            None => Ok(None),
        }
    }

    async fn list_for_instance(
        &self,
        instance_id: &InstanceId,
    ) -> Result<Vec<SignatureRecord>, RepositoryError> {
        let rows: Vec<sqlx::sqlite::SqliteRow> = sqlx::query(&format!(
            "SELECT {SIGNATURE_COLUMNS} FROM signature_record
             WHERE instance_id = ? ORDER BY signed_at ASC, id ASC"
        ))
        .bind(&instance_id.0)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(row_to_signature).collect::<Result<Vec<_>, _>>()
    }

    async fn list_for_step(
        &self,
        instance_id: &InstanceId,
        step_index: i32,
    ) -> Result<Vec<SignatureRecord>, RepositoryError> {
        let rows: Vec<sqlx::sqlite::SqliteRow> = sqlx::query(&format!(
            "SELECT {SIGNATURE_COLUMNS} FROM signature_record
             WHERE instance_id = ? AND step_index = ? ORDER BY signed_at ASC, id ASC"
        ))
        .bind(&instance_id.0)
        .bind(step_index)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(row_to_signature).collect::<Result<Vec<_>, _>>()
    }

    async fn has_signature(
        &self,
        instance_id: &InstanceId,
        step_index: i32,
        signer_id: Option<&str>,
    ) -> Result<bool, RepositoryError> {
        let row = match signer_id {
            Some(signer_id) => {
                sqlx::query(
                    "SELECT COUNT(*) AS count FROM signature_record
                     WHERE instance_id = ? AND step_index = ? AND signer_id = ?",
                )
                .bind(&instance_id.0)
                .bind(step_index)
                .bind(signer_id)
                .fetch_one(&self.pool)
                .await?
            }
            None => {
                sqlx::query(
                    "SELECT COUNT(*) AS count FROM signature_record
                     WHERE instance_id = ? AND step_index = ?",
                )
                .bind(&instance_id.0)
                .bind(step_index)
                .fetch_one(&self.pool)
                .await?
            }
        };
        Ok(row.get::<i64, _>("count") > 0)
    }
}

#[cfg(test)]
mod tests {
    use permitflow_core::domain::signature::ClientContext;
    use permitflow_core::domain::workflow::{InstanceId, UserRef, WorkflowAction};
    use permitflow_core::signature::{SignatureService, SigningRequest};

    use super::SqlSignatureRepository;
    use crate::fixtures::{insert_template, sample_instance};
    use crate::repositories::{InstanceRepository, SignatureRepository, SqlInstanceRepository};
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

    fn sign(step_index: i32, signer: &str, snapshot: &str) -> permitflow_core::domain::signature::SignatureRecord {
        let service = SignatureService::default();
        let mut record = service.sign(
            SigningRequest {
                instance_id: InstanceId("WP-1".to_string()),
                step_index,
                signer: UserRef::new(signer, format!("user {signer}")),
                action: WorkflowAction::Approve,
                comment: Some("checked".to_string()),
                client: ClientContext {
                    ip: Some("10.0.0.9".to_string()),
                    user_agent: Some("test-agent".to_string()),
                    device: Some("desktop".to_string()),
                    browser: None,
                    os: Some("linux".to_string()),
                },
            },
            snapshot,
        );
        record.step_index = step_index;
        record
    }

    #[tokio::test]
    async fn save_and_find_round_trip() {
        let pool = setup().await;
        let repo = SqlSignatureRepository::new(pool);
        let record = sign(0, "u-1", "{}");

        repo.save(record.clone()).await.expect("save");
        let found = repo.find_by_id(&record.id).await.expect("find").expect("should exist");

        assert_eq!(found.signer.id, "u-1");
        assert_eq!(found.snapshot_hash, record.snapshot_hash);
        assert_eq!(found.client.ip.as_deref(), Some("10.0.0.9"));
        assert_eq!(found.action, WorkflowAction::Approve);
    }

    #[tokio::test]
    async fn step_listing_filters_by_step() {
        let pool = setup().await;
        let repo = SqlSignatureRepository::new(pool);

        repo.save(sign(0, "u-1", "{}")).await.expect("save 1");
        repo.save(sign(0, "u-2", "{}")).await.expect("save 2");
        repo.save(sign(1, "u-3", "{}")).await.expect("save 3");

        let instance_id = InstanceId("WP-1".to_string());
        assert_eq!(repo.list_for_instance(&instance_id).await.expect("all").len(), 3);
        assert_eq!(repo.list_for_step(&instance_id, 0).await.expect("step 0").len(), 2);
        assert!(repo.has_signature(&instance_id, 0, None).await.expect("step has"));
        assert!(repo.has_signature(&instance_id, 0, Some("u-1")).await.expect("signer has"));
        assert!(!repo.has_signature(&instance_id, 1, Some("u-1")).await.expect("other step"));
        assert!(!repo
            .has_signature(&InstanceId("WP-none".to_string()), 0, None)
            .await
            .expect("has none"));
    }

    #[tokio::test]
    async fn one_signature_per_signer_per_step_is_schema_enforced() {
        let pool = setup().await;
        let repo = SqlSignatureRepository::new(pool);

        repo.save(sign(0, "u-1", "{}")).await.expect("first");
        let err = repo.save(sign(0, "u-1", "{}")).await.expect_err("duplicate");
        assert!(err.to_string().contains("UNIQUE"), "{err}");
    }
}
