use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::workflow::{InstanceId, UserRef, WorkflowAction};

/// Where a signature came from, as far as the request headers can tell.
/// Every field degrades to `None` rather than failing the signing call.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClientContext {
    pub ip: Option<String>,
    pub user_agent: Option<String>,
    pub device: Option<String>,
    pub browser: Option<String>,
    pub os: Option<String>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SignatureRecord {
    pub id: String,
    pub instance_id: InstanceId,
    pub step_index: i32,
    pub signer: UserRef,
    pub action: WorkflowAction,
    pub comment: Option<String>,
    /// SHA-256 hex digest of the form snapshot at signing time.
    pub snapshot_hash: String,
    /// Full snapshot text, retained only when the policy asks for it.
    pub snapshot: Option<String>,
    pub client: ClientContext,
    pub signed_at: DateTime<Utc>,
}

impl SignatureRecord {
    pub fn matches(&self, current_hash: &str) -> bool {
        self.snapshot_hash == current_hash
    }
}
