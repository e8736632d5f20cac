use async_trait::async_trait;
use chrono::{DateTime, Utc};
use thiserror::Error;

use permitflow_core::domain::candidate::CandidateHandler;
use permitflow_core::domain::extension::{ExtensionRequest, ExtensionStatus};
use permitflow_core::domain::signature::SignatureRecord;
use permitflow_core::domain::workflow::{
    InstanceId, LogEntry, TemplateId, UserRef, WorkflowAction, WorkflowInstance, WorkflowStatus,
    WorkflowTemplate,
};

pub mod candidate;
pub mod extension;
pub mod instance;
pub mod memory;
pub mod signature;
pub mod template;

pub use candidate::SqlCandidateRepository;
pub use extension::SqlExtensionRepository;
pub use instance::SqlInstanceRepository;
pub use memory::{InMemoryExtensionRepository, InMemoryInstanceRepository};
pub use signature::SqlSignatureRepository;
pub use template::SqlTemplateRepository;

#[derive(Debug, Error)]
pub enum RepositoryError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("decode error: {0}")]
    Decode(String),
}

#[async_trait]
pub trait TemplateRepository: Send + Sync {
    async fn find(
        &self,
        id: &TemplateId,
        version: u32,
    ) -> Result<Option<WorkflowTemplate>, RepositoryError>;
    async fn latest(&self, id: &TemplateId) -> Result<Option<WorkflowTemplate>, RepositoryError>;
    async fn save(&self, template: WorkflowTemplate) -> Result<(), RepositoryError>;
}

#[async_trait]
pub trait InstanceRepository: Send + Sync {
    async fn find_by_id(&self, id: &InstanceId)
        -> Result<Option<WorkflowInstance>, RepositoryError>;
    async fn save(&self, instance: WorkflowInstance) -> Result<(), RepositoryError>;
    async fn append_log(&self, entry: LogEntry) -> Result<(), RepositoryError>;
    async fn list_logs(&self, id: &InstanceId) -> Result<Vec<LogEntry>, RepositoryError>;
}

#[async_trait]
pub trait CandidateRepository: Send + Sync {
    async fn list_for_step(
        &self,
        instance_id: &InstanceId,
        step_index: i32,
    ) -> Result<Vec<CandidateHandler>, RepositoryError>;

    /// Delete-then-insert for the step, in a single transaction, so a step
    /// never holds a mix of old and new candidates.
    async fn set_candidates(
        &self,
        instance_id: &InstanceId,
        step_index: i32,
        users: &[UserRef],
    ) -> Result<(), RepositoryError>;

    /// First write wins: returns true when this call flipped the row, false
    /// when the candidate had already acted (or does not exist).
    async fn record_action(
        &self,
        instance_id: &InstanceId,
        step_index: i32,
        user_id: &str,
        opinion: Option<&str>,
        acted_at: DateTime<Utc>,
    ) -> Result<bool, RepositoryError>;
}

#[async_trait]
pub trait SignatureRepository: Send + Sync {
    async fn save(&self, record: SignatureRecord) -> Result<(), RepositoryError>;
    async fn find_by_id(&self, id: &str) -> Result<Option<SignatureRecord>, RepositoryError>;
    async fn list_for_instance(
        &self,
        instance_id: &InstanceId,
    ) -> Result<Vec<SignatureRecord>, RepositoryError>;
    async fn list_for_step(
        &self,
        instance_id: &InstanceId,
        step_index: i32,
    ) -> Result<Vec<SignatureRecord>, RepositoryError>;
    /// Whether a signature exists for the step, optionally narrowed to one
    /// signer.
    async fn has_signature(
        &self,
        instance_id: &InstanceId,
        step_index: i32,
        signer_id: Option<&str>,
    ) -> Result<bool, RepositoryError>;
}

#[async_trait]
pub trait ExtensionRepository: Send + Sync {
    async fn save(&self, request: ExtensionRequest) -> Result<(), RepositoryError>;
    async fn find_by_id(&self, id: &str) -> Result<Option<ExtensionRequest>, RepositoryError>;
    async fn find_pending(
        &self,
        instance_id: &InstanceId,
    ) -> Result<Option<ExtensionRequest>, RepositoryError>;
    async fn list_for_instance(
        &self,
        instance_id: &InstanceId,
    ) -> Result<Vec<ExtensionRequest>, RepositoryError>;
}

pub(crate) fn workflow_status_as_str(status: WorkflowStatus) -> &'static str {
    match status {
        WorkflowStatus::Draft => "draft",
        WorkflowStatus::Pending => "pending",
        WorkflowStatus::Approved => "approved",
        WorkflowStatus::Rejected => "rejected",
    }
}

pub(crate) fn parse_workflow_status(s: &str) -> WorkflowStatus {
    match s {
        "pending" => WorkflowStatus::Pending,
        "approved" => WorkflowStatus::Approved,
        "rejected" => WorkflowStatus::Rejected,
        _ => WorkflowStatus::Draft,
    }
}

pub(crate) fn workflow_action_as_str(action: WorkflowAction) -> &'static str {
    match action {
        WorkflowAction::Submit => "submit",
        WorkflowAction::Approve => "approve",
        WorkflowAction::Reject => "reject",
    }
}

pub(crate) fn parse_workflow_action(s: &str) -> WorkflowAction {
    match s {
        "approve" => WorkflowAction::Approve,
        "reject" => WorkflowAction::Reject,
        _ => WorkflowAction::Submit,
    }
}

pub(crate) fn extension_status_as_str(status: ExtensionStatus) -> &'static str {
    match status {
        ExtensionStatus::Pending => "pending",
        ExtensionStatus::Approved => "approved",
        ExtensionStatus::Rejected => "rejected",
    }
}

pub(crate) fn parse_extension_status(s: &str) -> ExtensionStatus {
    match s {
        "approved" => ExtensionStatus::Approved,
        "rejected" => ExtensionStatus::Rejected,
        _ => ExtensionStatus::Pending,
    }
}

pub(crate) fn parse_datetime(raw: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or_else(|_| Utc::now())
}

pub(crate) fn parse_optional_datetime(raw: Option<String>) -> Option<DateTime<Utc>> {
    raw.and_then(|s| DateTime::parse_from_rfc3339(&s).ok()).map(|dt| dt.with_timezone(&Utc))
}
