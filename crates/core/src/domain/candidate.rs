use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::workflow::{ApprovalMode, InstanceId, UserRef};

/// One eligible approver for one step of one instance. Uniqueness over
/// (instance, step, user) is enforced by the store; the first recorded action
/// wins and later writes for the same row are no-ops.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CandidateHandler {
    pub instance_id: InstanceId,
    pub step_index: i32,
    pub user: UserRef,
    pub has_acted: bool,
    pub acted_at: Option<DateTime<Utc>>,
    /// Free-text opinion captured alongside the action, if any.
    pub opinion: Option<String>,
}

impl CandidateHandler {
    pub fn pending(instance_id: InstanceId, step_index: i32, user: UserRef) -> Self {
        Self { instance_id, step_index, user, has_acted: false, acted_at: None, opinion: None }
    }
}

/// Progress of a step's quorum, derived from its candidate rows.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct QuorumProgress {
    pub mode: ApprovalMode,
    pub total: usize,
    pub acted: usize,
    pub satisfied: bool,
    /// Candidates still expected to act. Empty when satisfied.
    pub outstanding: Vec<UserRef>,
}

/// Whether the step's quorum is satisfied by the given candidate rows.
///
/// An empty candidate set is never complete, regardless of mode: a step with
/// nobody eligible is a configuration problem, not a finished step.
pub fn quorum_complete(candidates: &[CandidateHandler], mode: ApprovalMode) -> bool {
    if candidates.is_empty() {
        return false;
    }
    match mode {
        ApprovalMode::Any => candidates.iter().any(|c| c.has_acted),
        ApprovalMode::All => candidates.iter().all(|c| c.has_acted),
    }
}

pub fn quorum_progress(candidates: &[CandidateHandler], mode: ApprovalMode) -> QuorumProgress {
    let acted = candidates.iter().filter(|c| c.has_acted).count();
    let satisfied = quorum_complete(candidates, mode);
    let outstanding = if satisfied {
        Vec::new()
    } else {
        candidates.iter().filter(|c| !c.has_acted).map(|c| c.user.clone()).collect()
    };
    QuorumProgress { mode, total: candidates.len(), acted, satisfied, outstanding }
}

pub fn is_eligible(candidates: &[CandidateHandler], user_id: &str) -> bool {
    candidates.iter().any(|c| c.user.id == user_id)
}

pub fn has_acted(candidates: &[CandidateHandler], user_id: &str) -> bool {
    candidates.iter().any(|c| c.user.id == user_id && c.has_acted)
}

#[cfg(test)]
mod tests {
    use crate::domain::workflow::{ApprovalMode, InstanceId, UserRef};

    use super::{has_acted, is_eligible, quorum_complete, quorum_progress, CandidateHandler};

    fn candidate(user_id: &str, acted: bool) -> CandidateHandler {
        let mut c = CandidateHandler::pending(
            InstanceId("WP-1".to_string()),
            0,
            UserRef::new(user_id, format!("user {user_id}")),
        );
        c.has_acted = acted;
        c
    }

    #[test]
    fn empty_set_is_never_complete() {
        assert!(!quorum_complete(&[], ApprovalMode::Any));
        assert!(!quorum_complete(&[], ApprovalMode::All));
    }

    #[test]
    fn any_mode_completes_on_first_action() {
        let set = vec![candidate("u-1", false), candidate("u-2", true)];
        assert!(quorum_complete(&set, ApprovalMode::Any));
        assert!(!quorum_complete(&set, ApprovalMode::All));
    }

    #[test]
    fn all_mode_waits_for_everyone() {
        let set = vec![candidate("u-1", true), candidate("u-2", true), candidate("u-3", false)];
        assert!(!quorum_complete(&set, ApprovalMode::All));

        let progress = quorum_progress(&set, ApprovalMode::All);
        assert_eq!(progress.acted, 2);
        assert_eq!(progress.total, 3);
        assert!(!progress.satisfied);
        assert_eq!(progress.outstanding.len(), 1);
        assert_eq!(progress.outstanding[0].id, "u-3");

        let done = vec![candidate("u-1", true), candidate("u-2", true)];
        assert!(quorum_complete(&done, ApprovalMode::All));
        assert!(quorum_progress(&done, ApprovalMode::All).outstanding.is_empty());
    }

    #[test]
    fn eligibility_and_acted_lookups() {
        let set = vec![candidate("u-1", true), candidate("u-2", false)];
        assert!(is_eligible(&set, "u-2"));
        assert!(!is_eligible(&set, "u-9"));
        assert!(has_acted(&set, "u-1"));
        assert!(!has_acted(&set, "u-2"));
    }
}
