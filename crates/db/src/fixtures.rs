//! Deterministic seed data for local development, CLI smoke checks, and
//! repository tests.

use chrono::{Duration, Utc};
use serde::Serialize;

use permitflow_core::domain::workflow::{
    ApprovalMode, InstanceId, StepDefinition, TemplateId, UserRef, WorkflowInstance,
    WorkflowStatus, WorkflowTemplate,
};
use permitflow_core::resolve::{
    Department, DepartmentSelector, DirectoryUser, InMemoryOrgDirectory, ResolutionSpec,
};

use crate::repositories::{
    InstanceRepository, RepositoryError, SqlInstanceRepository, SqlTemplateRepository,
    TemplateRepository,
};
use crate::DbPool;

pub const SEED_TEMPLATE_ID: &str = "tpl-hot-work";
pub const SEED_INSTANCE_ID: &str = "WP-SEED-0001";

/// A hot-work permit template: supervisor review, then the owning
/// department's manager, then sign-off by every area owner.
pub fn seed_template() -> WorkflowTemplate {
    WorkflowTemplate {
        id: TemplateId(SEED_TEMPLATE_ID.to_string()),
        version: 1,
        name: "hot work permit".to_string(),
        steps: vec![
            StepDefinition {
                index: 0,
                name: "supervisor review".to_string(),
                mode: ApprovalMode::Any,
                resolver: ResolutionSpec::Supervisor { user_id: None },
                require_field_confirmation: false,
            },
            StepDefinition {
                index: 1,
                name: "safety review".to_string(),
                mode: ApprovalMode::Any,
                resolver: ResolutionSpec::DepartmentManager {
                    department: DepartmentSelector::Owning,
                },
                require_field_confirmation: false,
            },
            StepDefinition {
                index: 2,
                name: "area acceptance".to_string(),
                mode: ApprovalMode::All,
                resolver: ResolutionSpec::SpecificUsers {
                    user_ids: vec!["u-area-1".to_string(), "u-area-2".to_string()],
                },
                require_field_confirmation: true,
            },
        ],
    }
}

/// Org chart matching the seed template's routing rules.
pub fn seed_directory() -> InMemoryOrgDirectory {
    let user = |id: &str, name: &str, title: &str, dept: &str, manager: Option<&str>, level| {
        DirectoryUser {
            id: id.to_string(),
            name: name.to_string(),
            job_title: Some(title.to_string()),
            department_id: Some(dept.to_string()),
            direct_manager_id: manager.map(str::to_string),
            level: Some(level),
        }
    };
    InMemoryOrgDirectory::new(
        vec![
            user("u-worker", "Shift Worker", "Welder", "d-line", Some("u-lead"), 1),
            user("u-lead", "Line Lead", "Line Lead", "d-line", None, 2),
            user("u-safety", "Safety Officer", "EHS Safety Officer", "d-ops", None, 3),
            user("u-area-1", "Area Owner One", "Area Owner", "d-ops", None, 2),
            user("u-area-2", "Area Owner Two", "Area Owner", "d-ops", None, 2),
        ],
        vec![
            Department {
                id: "d-line".to_string(),
                name: "Line 4".to_string(),
                manager_id: Some("u-lead".to_string()),
                parent_id: Some("d-ops".to_string()),
            },
            Department {
                id: "d-ops".to_string(),
                name: "Operations".to_string(),
                manager_id: Some("u-safety".to_string()),
                parent_id: None,
            },
        ],
    )
}

pub fn sample_instance(id: &str) -> WorkflowInstance {
    let now = Utc::now();
    WorkflowInstance {
        id: InstanceId(id.to_string()),
        template_id: TemplateId(SEED_TEMPLATE_ID.to_string()),
        template_version: 1,
        status: WorkflowStatus::Draft,
        current_step: 0,
        form_data: r#"{"work_type":"hot work","area":"tank 3","gas_test":"0.0%"}"#.to_string(),
        deadline: Some(now + Duration::days(14)),
        owning_department: Some("d-ops".to_string()),
        created_by: UserRef::new("u-worker", "Shift Worker"),
        created_at: now,
        updated_at: now,
    }
}

/// Test helper: insert the seed template so instance rows satisfy their
/// foreign key.
pub async fn insert_template(pool: &DbPool) {
    SqlTemplateRepository::new(pool.clone())
        .save(seed_template())
        .await
        .expect("insert seed template");
}

#[derive(Clone, Debug, Serialize)]
pub struct SeedResult {
    pub template_id: String,
    pub template_version: u32,
    pub instance_id: String,
}

pub struct SeedDataset;

impl SeedDataset {
    /// Idempotent: reseeding overwrites the same template version and
    /// instance row rather than accumulating copies.
    pub async fn apply(pool: &DbPool) -> Result<SeedResult, RepositoryError> {
        let template = seed_template();
        SqlTemplateRepository::new(pool.clone()).save(template.clone()).await?;
        SqlInstanceRepository::new(pool.clone()).save(sample_instance(SEED_INSTANCE_ID)).await?;
        Ok(SeedResult {
            template_id: template.id.0,
            template_version: template.version,
            instance_id: SEED_INSTANCE_ID.to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use permitflow_core::domain::workflow::{InstanceId, TemplateId};

    use super::{SeedDataset, SEED_INSTANCE_ID, SEED_TEMPLATE_ID};
    use crate::repositories::{
        InstanceRepository, SqlInstanceRepository, SqlTemplateRepository, TemplateRepository,
    };
    use crate::{connect_with_settings, migrations};

    #[tokio::test]
    async fn seed_is_idempotent() {
        let pool = connect_with_settings("sqlite::memory:", 1, 30).await.expect("connect");
        migrations::run_pending(&pool).await.expect("migrations");

        let first = SeedDataset::apply(&pool).await.expect("first seed");
        let second = SeedDataset::apply(&pool).await.expect("second seed");
        assert_eq!(first.instance_id, second.instance_id);

        let template = SqlTemplateRepository::new(pool.clone())
            .find(&TemplateId(SEED_TEMPLATE_ID.to_string()), 1)
            .await
            .expect("find template")
            .expect("template seeded");
        assert_eq!(template.steps.len(), 3);
        assert!(template.validate().is_ok());

        let instance = SqlInstanceRepository::new(pool)
            .find_by_id(&InstanceId(SEED_INSTANCE_ID.to_string()))
            .await
            .expect("find instance")
            .expect("instance seeded");
        assert!(instance.invariant_holds());
    }
}
