use sqlx::Row;

use permitflow_core::domain::workflow::{
    InstanceId, LogEntry, TemplateId, UserRef, WorkflowInstance,
};

use super::{
    parse_datetime, parse_optional_datetime, parse_workflow_action, parse_workflow_status,
    workflow_action_as_str, workflow_status_as_str, InstanceRepository, RepositoryError,
};
use crate::DbPool;

pub struct SqlInstanceRepository {
    pool: DbPool,
}

impl SqlInstanceRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    /// Executor-generic so the service can read the row inside its own
    /// transaction.
    pub(crate) async fn fetch(
        executor: impl sqlx::SqliteExecutor<'_>,
        id: &InstanceId,
    ) -> Result<Option<WorkflowInstance>, RepositoryError> {
        let row = sqlx::query(&format!(
            "SELECT {INSTANCE_COLUMNS} FROM workflow_instance WHERE id = ?"
        ))
        .bind(&id.0)
        .fetch_optional(executor)
        .await?;

        match row {
            Some(ref r) => Ok(Some(row_to_instance(r)?)),
            None => Ok(None),
        }
    }

    pub(crate) async fn insert_log(
        executor: impl sqlx::SqliteExecutor<'_>,
        entry: &LogEntry,
    ) -> Result<(), sqlx::Error> {
        sqlx::query(
            "INSERT INTO log_entry
                 (id, instance_id, step_index, step_name, action, actor_id, actor_name,
                  comment, snapshot_hash, recorded_at)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&entry.id)
        .bind(&entry.instance_id.0)
        .bind(entry.step_index)
        .bind(&entry.step_name)
        .bind(workflow_action_as_str(entry.action))
        .bind(&entry.actor.id)
        .bind(&entry.actor.name)
        .bind(&entry.comment)
        .bind(&entry.snapshot_hash)
        .bind(entry.recorded_at.to_rfc3339())
        .execute(executor)
        .await?;

        Ok(())
    }
}

pub(crate) fn row_to_instance(
    row: &sqlx::sqlite::SqliteRow,
) -> Result<WorkflowInstance, RepositoryError> {
    let id: String = row.try_get("id").map_err(|e| RepositoryError::Decode(e.to_string()))?;
    let template_id: String =
        row.try_get("template_id").map_err(|e| RepositoryError::Decode(e.to_string()))?;
    let template_version: i64 =
        row.try_get("template_version").map_err(|e| RepositoryError::Decode(e.to_string()))?;
    let status: String =
        row.try_get("status").map_err(|e| RepositoryError::Decode(e.to_string()))?;
    let current_step: i64 =
        row.try_get("current_step").map_err(|e| RepositoryError::Decode(e.to_string()))?;
    let form_data: String =
        row.try_get("form_data").map_err(|e| RepositoryError::Decode(e.to_string()))?;
    let deadline: Option<String> =
        row.try_get("deadline").map_err(|e| RepositoryError::Decode(e.to_string()))?;
    let owning_department: Option<String> =
        row.try_get("owning_department").map_err(|e| RepositoryError::Decode(e.to_string()))?;
    let created_by_id: String =
        row.try_get("created_by_id").map_err(|e| RepositoryError::Decode(e.to_string()))?;
    let created_by_name: String =
        row.try_get("created_by_name").map_err(|e| RepositoryError::Decode(e.to_string()))?;
    let created_at: String =
        row.try_get("created_at").map_err(|e| RepositoryError::Decode(e.to_string()))?;
    let updated_at: String =
        row.try_get("updated_at").map_err(|e| RepositoryError::Decode(e.to_string()))?;

    Ok(WorkflowInstance {
        id: InstanceId(id),
        template_id: TemplateId(template_id),
        template_version: template_version as u32,
        status: parse_workflow_status(&status),
        current_step: current_step as i32,
        form_data,
        deadline: parse_optional_datetime(deadline),
        owning_department,
        created_by: UserRef { id: created_by_id, name: created_by_name },
        created_at: parse_datetime(&created_at),
        updated_at: parse_datetime(&updated_at),
    })
}

fn row_to_log_entry(row: &sqlx::sqlite::SqliteRow) -> Result<LogEntry, RepositoryError> {
    let id: String = row.try_get("id").map_err(|e| RepositoryError::Decode(e.to_string()))?;
    let instance_id: String =
        row.try_get("instance_id").map_err(|e| RepositoryError::Decode(e.to_string()))?;
    let step_index: i64 =
        row.try_get("step_index").map_err(|e| RepositoryError::Decode(e.to_string()))?;
    let step_name: String =
        row.try_get("step_name").map_err(|e| RepositoryError::Decode(e.to_string()))?;
    let action: String =
        row.try_get("action").map_err(|e| RepositoryError::Decode(e.to_string()))?;
    let actor_id: String =
        row.try_get("actor_id").map_err(|e| RepositoryError::Decode(e.to_string()))?;
    let actor_name: String =
        row.try_get("actor_name").map_err(|e| RepositoryError::Decode(e.to_string()))?;
    let comment: String =
        row.try_get("comment").map_err(|e| RepositoryError::Decode(e.to_string()))?;
    let snapshot_hash: String =
        row.try_get("snapshot_hash").map_err(|e| RepositoryError::Decode(e.to_string()))?;
    let recorded_at: String =
        row.try_get("recorded_at").map_err(|e| RepositoryError::Decode(e.to_string()))?;

    Ok(LogEntry {
        id,
        instance_id: InstanceId(instance_id),
        step_index: step_index as i32,
        step_name,
        action: parse_workflow_action(&action),
        actor: UserRef { id: actor_id, name: actor_name },
        comment,
        snapshot_hash,
        recorded_at: parse_datetime(&recorded_at),
    })
}

const INSTANCE_COLUMNS: &str = "id, template_id, template_version, status, current_step, \
     form_data, deadline, owning_department, created_by_id, created_by_name, \
     created_at, updated_at";

#[async_trait::async_trait]
impl InstanceRepository for SqlInstanceRepository {
    async fn find_by_id(
        &self,
        id: &InstanceId,
    ) -> Result<Option<WorkflowInstance>, RepositoryError> {
        Self::fetch(&self.pool, id).await
    }

    async fn save(&self, instance: WorkflowInstance) -> Result<(), RepositoryError> {
        sqlx::query(
            "INSERT INTO workflow_instance
                 (id, template_id, template_version, status, current_step, form_data,
                  deadline, owning_department, created_by_id, created_by_name,
                  created_at, updated_at)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
             ON CONFLICT(id) DO UPDATE SET
                 status = excluded.status,
                 current_step = excluded.current_step,
                 form_data = excluded.form_data,
                 deadline = excluded.deadline,
                 owning_department = excluded.owning_department,
                 updated_at = excluded.updated_at",
        )
        .bind(&instance.id.0)
        .bind(&instance.template_id.0)
        .bind(instance.template_version as i64)
        .bind(workflow_status_as_str(instance.status))
        .bind(instance.current_step)
        .bind(&instance.form_data)
        .bind(instance.deadline.map(|dt| dt.to_rfc3339()))
        .bind(&instance.owning_department)
        .bind(&instance.created_by.id)
        .bind(&instance.created_by.name)
        .bind(instance.created_at.to_rfc3339())
        .bind(instance.updated_at.to_rfc3339())
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn append_log(&self, entry: LogEntry) -> Result<(), RepositoryError> {
        Ok(Self::insert_log(&self.pool, &entry).await?)
    }

    async fn list_logs(&self, id: &InstanceId) -> Result<Vec<LogEntry>, RepositoryError> {
        let rows: Vec<sqlx::sqlite::SqliteRow> = sqlx::query(
            "SELECT id, instance_id, step_index, step_name, action, actor_id, actor_name,
                    comment, snapshot_hash, recorded_at
             FROM log_entry WHERE instance_id = ? ORDER BY recorded_at ASC, id ASC",
        )
        .bind(&id.0)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(row_to_log_entry).collect::<Result<Vec<_>, _>>()
    }
}
