use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::workflow::InstanceId;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ExtensionStatus {
    Pending,
    Approved,
    Rejected,
}

/// A request to push out the parent instance's rectification deadline.
/// At most one `Pending` request may exist per instance at a time.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ExtensionRequest {
    pub id: String,
    pub instance_id: InstanceId,
    pub old_deadline: DateTime<Utc>,
    pub new_deadline: DateTime<Utc>,
    pub reason: String,
    pub requested_by: String,
    pub decided_by: Option<String>,
    pub decision_comment: Option<String>,
    pub status: ExtensionStatus,
    pub created_at: DateTime<Utc>,
    pub decided_at: Option<DateTime<Utc>>,
}

impl ExtensionRequest {
    pub fn pending(
        instance_id: InstanceId,
        old_deadline: DateTime<Utc>,
        new_deadline: DateTime<Utc>,
        reason: impl Into<String>,
        requested_by: impl Into<String>,
    ) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            instance_id,
            old_deadline,
            new_deadline,
            reason: reason.into(),
            requested_by: requested_by.into(),
            decided_by: None,
            decision_comment: None,
            status: ExtensionStatus::Pending,
            created_at: Utc::now(),
            decided_at: None,
        }
    }

    pub fn is_pending(&self) -> bool {
        self.status == ExtensionStatus::Pending
    }
}
