//! Deadline extension rules.
//!
//! Validation and the approve/reject decision are pure; the service layer
//! applies an approved decision to the request row and the parent instance's
//! deadline in one transaction.

use chrono::{DateTime, Duration, Utc};
use thiserror::Error;

use crate::domain::extension::{ExtensionRequest, ExtensionStatus};

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ExtensionError {
    #[error("the workflow has no deadline to extend")]
    NoDeadline,
    #[error("requested deadline {requested} is not after the current deadline {current}")]
    NotAfterCurrentDeadline { current: DateTime<Utc>, requested: DateTime<Utc> },
    #[error("requested deadline {requested} is in the past")]
    NotInFuture { requested: DateTime<Utc> },
    #[error("requested extension spans {requested_days} days, the maximum is {max_days}")]
    ExceedsMaxSpan { requested_days: i64, max_days: i64 },
    #[error("extension request `{extension_id}` is already pending for this workflow")]
    PendingRequestExists { extension_id: String },
    #[error("an extension request must carry a reason")]
    MissingReason,
    #[error("extension request `{extension_id}` was already decided as {status:?}")]
    AlreadyDecided { extension_id: String, status: ExtensionStatus },
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ExtensionDecision {
    Approve,
    Reject,
}

/// Tunable limits, fed from configuration.
#[derive(Clone, Copy, Debug)]
pub struct ExtensionRules {
    /// Upper bound on `new_deadline - old_deadline`, in days.
    pub max_extension_days: i64,
}

impl Default for ExtensionRules {
    fn default() -> Self {
        Self { max_extension_days: 90 }
    }
}

impl ExtensionRules {
    /// Check a proposed extension before any row is written. `pending` is the
    /// instance's currently pending request, if one exists.
    pub fn validate_request(
        &self,
        current_deadline: Option<DateTime<Utc>>,
        requested: DateTime<Utc>,
        reason: &str,
        now: DateTime<Utc>,
        pending: Option<&ExtensionRequest>,
    ) -> Result<(), ExtensionError> {
        if let Some(open) = pending.filter(|r| r.is_pending()) {
            return Err(ExtensionError::PendingRequestExists { extension_id: open.id.clone() });
        }
        if reason.trim().is_empty() {
            return Err(ExtensionError::MissingReason);
        }
        let current = current_deadline.ok_or(ExtensionError::NoDeadline)?;
        if requested <= current {
            return Err(ExtensionError::NotAfterCurrentDeadline { current, requested });
        }
        if requested <= now {
            return Err(ExtensionError::NotInFuture { requested });
        }
        let span = requested - current;
        if span > Duration::days(self.max_extension_days) {
            return Err(ExtensionError::ExceedsMaxSpan {
                requested_days: span.num_days(),
                max_days: self.max_extension_days,
            });
        }
        Ok(())
    }
}

/// What an approved or rejected decision does to the stored state: the
/// updated request row, plus the parent's new deadline when approved.
#[derive(Clone, Debug, PartialEq)]
pub struct DecisionOutcome {
    pub request: ExtensionRequest,
    pub new_parent_deadline: Option<DateTime<Utc>>,
}

/// Decide a pending request. Deciding an already-decided request fails
/// rather than silently re-deciding it.
pub fn decide(
    request: &ExtensionRequest,
    decision: ExtensionDecision,
    decided_by: &str,
    comment: Option<String>,
) -> Result<DecisionOutcome, ExtensionError> {
    if !request.is_pending() {
        return Err(ExtensionError::AlreadyDecided {
            extension_id: request.id.clone(),
            status: request.status,
        });
    }
    let mut updated = request.clone();
    updated.decided_by = Some(decided_by.to_string());
    updated.decision_comment = comment;
    updated.decided_at = Some(Utc::now());
    let new_parent_deadline = match decision {
        ExtensionDecision::Approve => {
            updated.status = ExtensionStatus::Approved;
            Some(updated.new_deadline)
        }
        ExtensionDecision::Reject => {
            updated.status = ExtensionStatus::Rejected;
            None
        }
    };
    Ok(DecisionOutcome { request: updated, new_parent_deadline })
}
