use chrono::{DateTime, Utc};
use sqlx::Row;

use permitflow_core::domain::candidate::CandidateHandler;
use permitflow_core::domain::workflow::{InstanceId, UserRef};

use super::{parse_optional_datetime, CandidateRepository, RepositoryError};
use crate::DbPool;

pub struct SqlCandidateRepository {
    pool: DbPool,
}

impl SqlCandidateRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    /// Executor-generic so the service can read the roster inside its own
    /// transaction.
    pub(crate) async fn fetch_step(
        executor: impl sqlx::SqliteExecutor<'_>,
        instance_id: &InstanceId,
        step_index: i32,
    ) -> Result<Vec<CandidateHandler>, RepositoryError> {
        let rows: Vec<sqlx::sqlite::SqliteRow> = sqlx::query(
            "SELECT instance_id, step_index, user_id, user_name, has_acted, acted_at, opinion
             FROM candidate_handler
             WHERE instance_id = ? AND step_index = ?
             ORDER BY user_id ASC",
        )
        .bind(&instance_id.0)
        .bind(step_index)
        .fetch_all(executor)
        .await?;

        rows.iter().map(row_to_candidate).collect::<Result<Vec<_>, _>>()
    }

    /// First write wins: returns true when this call flipped the row.
    pub(crate) async fn mark_acted(
        executor: impl sqlx::SqliteExecutor<'_>,
        instance_id: &InstanceId,
        step_index: i32,
        user_id: &str,
        opinion: Option<&str>,
        acted_at: DateTime<Utc>,
    ) -> Result<bool, sqlx::Error> {
        // The `has_acted = 0` guard makes the first write win; a concurrent
        // or repeated call cannot overwrite the recorded opinion/timestamp.
        let result = sqlx::query(
            "UPDATE candidate_handler
             SET has_acted = 1, acted_at = ?, opinion = ?
             WHERE instance_id = ? AND step_index = ? AND user_id = ? AND has_acted = 0",
        )
        .bind(acted_at.to_rfc3339())
        .bind(opinion)
        .bind(&instance_id.0)
        .bind(step_index)
        .bind(user_id)
        .execute(executor)
        .await?;

        Ok(result.rows_affected() == 1)
    }

    /// Delete-then-insert on the caller's connection; wrap in a transaction
    /// so a step never holds a mix of old and new candidates.
    pub(crate) async fn replace_step(
        conn: &mut sqlx::SqliteConnection,
        instance_id: &InstanceId,
        step_index: i32,
        users: &[UserRef],
    ) -> Result<(), sqlx::Error> {
        sqlx::query("DELETE FROM candidate_handler WHERE instance_id = ? AND step_index = ?")
            .bind(&instance_id.0)
            .bind(step_index)
            .execute(&mut *conn)
            .await?;

        for user in users {
            sqlx::query(
                "INSERT INTO candidate_handler
                     (instance_id, step_index, user_id, user_name, has_acted)
                 VALUES (?, ?, ?, ?, 0)",
            )
            .bind(&instance_id.0)
            .bind(step_index)
            .bind(&user.id)
            .bind(&user.name)
            .execute(&mut *conn)
            .await?;
        }

        Ok(())
    }
}

fn row_to_candidate(row: &sqlx::sqlite::SqliteRow) -> Result<CandidateHandler, RepositoryError> {
    let instance_id: String =
        row.try_get("instance_id").map_err(|e| RepositoryError::Decode(e.to_string()))?;
    let step_index: i64 =
        row.try_get("step_index").map_err(|e| RepositoryError::Decode(e.to_string()))?;
    let user_id: String =
        row.try_get("user_id").map_err(|e| RepositoryError::Decode(e.to_string()))?;
    let user_name: String =
        row.try_get("user_name").map_err(|e| RepositoryError::Decode(e.to_string()))?;
    let has_acted: i64 =
        row.try_get("has_acted").map_err(|e| RepositoryError::Decode(e.to_string()))?;
    let acted_at: Option<String> =
        row.try_get("acted_at").map_err(|e| RepositoryError::Decode(e.to_string()))?;
    let opinion: Option<String> =
        row.try_get("opinion").map_err(|e| RepositoryError::Decode(e.to_string()))?;

    Ok(CandidateHandler {
        instance_id: InstanceId(instance_id),
        step_index: step_index as i32,
        user: UserRef { id: user_id, name: user_name },
        has_acted: has_acted != 0,
        acted_at: parse_optional_datetime(acted_at),
        opinion,
    })
}

#[async_trait::async_trait]
impl CandidateRepository for SqlCandidateRepository {
    async fn list_for_step(
        &self,
        instance_id: &InstanceId,
        step_index: i32,
    ) -> Result<Vec<CandidateHandler>, RepositoryError> {
        Self::fetch_step(&self.pool, instance_id, step_index).await
    }

    async fn set_candidates(
        &self,
        instance_id: &InstanceId,
        step_index: i32,
        users: &[UserRef],
    ) -> Result<(), RepositoryError> {
        let mut tx = self.pool.begin().await?;
        Self::replace_step(&mut tx, instance_id, step_index, users).await?;
        tx.commit().await?;
        Ok(())
    }

    async fn record_action(
        &self,
        instance_id: &InstanceId,
        step_index: i32,
        user_id: &str,
        opinion: Option<&str>,
        acted_at: DateTime<Utc>,
    ) -> Result<bool, RepositoryError> {
        Ok(Self::mark_acted(&self.pool, instance_id, step_index, user_id, opinion, acted_at)
            .await?)
    }
}
