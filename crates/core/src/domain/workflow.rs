use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::resolve::ResolutionSpec;

/// Step index of a closed workflow. A live instance always points at a real
/// template step; only `Approved`/`Rejected` instances carry this sentinel.
pub const TERMINAL_STEP: i32 = -1;

#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct InstanceId(pub String);

#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TemplateId(pub String);

/// A user as the workflow sees one: id plus display name, nothing more.
/// Richer attributes live in the organization directory.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserRef {
    pub id: String,
    pub name: String,
}

impl UserRef {
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self { id: id.into(), name: name.into() }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum WorkflowStatus {
    Draft,
    Pending,
    Approved,
    Rejected,
}

impl WorkflowStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Approved | Self::Rejected)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum WorkflowAction {
    Submit,
    Approve,
    Reject,
}

/// How many resolved candidates must act before a step is satisfied.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ApprovalMode {
    /// First qualifying action completes the step.
    #[default]
    Any,
    /// Every resolved candidate must act.
    All,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct StepDefinition {
    pub index: i32,
    pub name: String,
    /// Legacy step configs omit the mode; deserializing those falls back to
    /// `Any`, and the engine warns so the configuration gets fixed.
    #[serde(default)]
    pub mode: ApprovalMode,
    pub resolver: ResolutionSpec,
    #[serde(default)]
    pub require_field_confirmation: bool,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct WorkflowTemplate {
    pub id: TemplateId,
    pub version: u32,
    pub name: String,
    pub steps: Vec<StepDefinition>,
}

impl WorkflowTemplate {
    pub fn step(&self, index: i32) -> Option<&StepDefinition> {
        if index < 0 {
            return None;
        }
        self.steps.iter().find(|step| step.index == index)
    }

    pub fn last_index(&self) -> i32 {
        self.steps.len() as i32 - 1
    }

    /// Step indexes must be 0-based and contiguous for the advance arithmetic
    /// in the engine to hold.
    pub fn validate(&self) -> Result<(), String> {
        if self.steps.is_empty() {
            return Err(format!("template `{}` has no steps", self.id.0));
        }
        for (position, step) in self.steps.iter().enumerate() {
            if step.index != position as i32 {
                return Err(format!(
                    "template `{}` step at position {position} carries index {}",
                    self.id.0, step.index
                ));
            }
        }
        Ok(())
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct WorkflowInstance {
    pub id: InstanceId,
    pub template_id: TemplateId,
    pub template_version: u32,
    pub status: WorkflowStatus,
    pub current_step: i32,
    /// Canonical serialized form data. Signatures hash exactly these bytes,
    /// so the serialization is frozen once any signature exists.
    pub form_data: String,
    /// Rectification deadline of the underlying business record; the
    /// extension sub-workflow is the only writer after creation.
    pub deadline: Option<DateTime<Utc>>,
    pub owning_department: Option<String>,
    pub created_by: UserRef,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl WorkflowInstance {
    /// Terminal status and the terminal step sentinel must agree, and a
    /// pending instance must point at a plausible step.
    pub fn invariant_holds(&self) -> bool {
        match self.status {
            WorkflowStatus::Approved | WorkflowStatus::Rejected => {
                self.current_step == TERMINAL_STEP
            }
            WorkflowStatus::Pending => self.current_step >= 0,
            WorkflowStatus::Draft => self.current_step == 0 || self.current_step == TERMINAL_STEP,
        }
    }
}

/// One immutable row of the audit trail. Appended on every transition call,
/// including "acted but quorum incomplete"; never edited or removed.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct LogEntry {
    pub id: String,
    pub instance_id: InstanceId,
    pub step_index: i32,
    pub step_name: String,
    pub action: WorkflowAction,
    pub actor: UserRef,
    pub comment: String,
    /// Digest of the form snapshot at the moment of the action.
    pub snapshot_hash: String,
    pub recorded_at: DateTime<Utc>,
}

impl LogEntry {
    #[allow(clippy::too_many_arguments)]
    pub fn record(
        instance_id: InstanceId,
        step_index: i32,
        step_name: impl Into<String>,
        action: WorkflowAction,
        actor: UserRef,
        comment: impl Into<String>,
        snapshot_hash: impl Into<String>,
    ) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            instance_id,
            step_index,
            step_name: step_name.into(),
            action,
            actor,
            comment: comment.into(),
            snapshot_hash: snapshot_hash.into(),
            recorded_at: Utc::now(),
        }
    }
}
