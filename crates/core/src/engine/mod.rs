//! The workflow state machine.
//!
//! `transition` is pure: it inspects the instance, its template, and the
//! candidate rows for the current step, and returns a `TransitionOutcome`
//! describing the new state plus the writes the caller must persist. It
//! never touches storage itself, which is what makes the single-transaction
//! guarantee in the service layer possible.

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::warn;

use crate::domain::candidate::{
    is_eligible, quorum_progress, CandidateHandler, QuorumProgress,
};
use crate::domain::workflow::{
    LogEntry, StepDefinition, UserRef, WorkflowAction, WorkflowInstance, WorkflowStatus,
    WorkflowTemplate, TERMINAL_STEP,
};
use crate::resolve::{ApproverResolver, OrgDirectory, ResolutionContext};
use crate::signature::snapshot_hash;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum TransitionError {
    #[error("workflow is already closed with status {status:?}")]
    AlreadyClosed { status: WorkflowStatus },
    #[error("workflow was already submitted, current status is {status:?}")]
    AlreadySubmitted { status: WorkflowStatus },
    #[error("{action:?} requires a pending workflow, current status is {status:?}")]
    NotPending { action: WorkflowAction, status: WorkflowStatus },
    #[error("template is unusable: {0}")]
    InvalidTemplate(String),
    #[error("template `{template_id}` has no step {step_index}")]
    UnknownStep { template_id: String, step_index: i32 },
    #[error("step {step_index} resolved no candidates, routing configuration is broken")]
    NoCandidates { step_index: i32 },
    #[error("`{user_id}` is not an eligible candidate for step {step_index}")]
    NotEligible { user_id: String, step_index: i32 },
    #[error("a rejection must carry a comment explaining it")]
    MissingRejectComment,
}

/// Everything a single transition call reads. Candidate rows are the ones
/// currently persisted for `instance.current_step`.
#[derive(Debug)]
pub struct TransitionRequest<'a> {
    pub instance: &'a WorkflowInstance,
    pub template: &'a WorkflowTemplate,
    pub action: WorkflowAction,
    pub actor: UserRef,
    pub comment: Option<String>,
    pub context: &'a ResolutionContext,
    pub current_candidates: &'a [CandidateHandler],
}

/// Writes the caller must apply, in order, in the same transaction as the
/// instance row update and the log append.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum PersistDirective {
    /// Flip the actor's candidate row to acted. First write wins; a row
    /// already acted is left untouched.
    MarkActed { step_index: i32, user_id: String, opinion: Option<String> },
    /// Drop all candidate rows for the step and insert these.
    ReplaceCandidates { step_index: i32, candidates: Vec<UserRef> },
}

#[derive(Clone, Debug, PartialEq)]
pub struct TransitionOutcome {
    pub status: WorkflowStatus,
    pub current_step: i32,
    /// Audit row to append. Every successful call produces exactly one.
    pub entry: LogEntry,
    /// Quorum state after this action, for approve calls.
    pub quorum: Option<QuorumProgress>,
    pub directives: Vec<PersistDirective>,
}

pub struct WorkflowEngine<'a, D: OrgDirectory + ?Sized> {
    resolver: ApproverResolver<'a, D>,
}

impl<'a, D: OrgDirectory + ?Sized> WorkflowEngine<'a, D> {
    pub fn new(resolver: ApproverResolver<'a, D>) -> Self {
        Self { resolver }
    }

    pub fn transition(
        &self,
        req: TransitionRequest<'_>,
    ) -> Result<TransitionOutcome, TransitionError> {
        if req.instance.status.is_terminal() {
            return Err(TransitionError::AlreadyClosed { status: req.instance.status });
        }
        match req.action {
            WorkflowAction::Submit => self.submit(req),
            WorkflowAction::Approve => self.approve(req),
            WorkflowAction::Reject => self.reject(req),
        }
    }

    fn submit(&self, req: TransitionRequest<'_>) -> Result<TransitionOutcome, TransitionError> {
        if req.instance.status != WorkflowStatus::Draft {
            return Err(TransitionError::AlreadySubmitted { status: req.instance.status });
        }
        req.template.validate().map_err(TransitionError::InvalidTemplate)?;
        let first = step_at(req.template, 0)?;
        let candidates = self.resolve_step(req.template, first, req.context, &req.instance.id.0);

        let entry = LogEntry::record(
            req.instance.id.clone(),
            first.index,
            first.name.clone(),
            WorkflowAction::Submit,
            req.actor,
            req.comment.unwrap_or_default(),
            snapshot_hash(&req.instance.form_data),
        );
        Ok(TransitionOutcome {
            status: WorkflowStatus::Pending,
            current_step: first.index,
            entry,
            quorum: None,
            directives: vec![PersistDirective::ReplaceCandidates {
                step_index: first.index,
                candidates,
            }],
        })
    }

    fn approve(&self, req: TransitionRequest<'_>) -> Result<TransitionOutcome, TransitionError> {
        let step = self.pending_step(&req, WorkflowAction::Approve)?;

        // Project the actor's action onto the candidate rows without writing
        // anything. Acting a second time leaves the projection unchanged, so
        // an idempotent retry can never double-count a quorum.
        let mut projected = req.current_candidates.to_vec();
        for candidate in projected.iter_mut().filter(|c| c.user.id == req.actor.id) {
            candidate.has_acted = true;
        }
        let progress = quorum_progress(&projected, step.mode);

        let mut directives = vec![PersistDirective::MarkActed {
            step_index: step.index,
            user_id: req.actor.id.clone(),
            opinion: req.comment.clone(),
        }];

        let (status, current_step) = if !progress.satisfied {
            (WorkflowStatus::Pending, step.index)
        } else if step.index == req.template.last_index() {
            (WorkflowStatus::Approved, TERMINAL_STEP)
        } else {
            let next = step_at(req.template, step.index + 1)?;
            let candidates =
                self.resolve_step(req.template, next, req.context, &req.instance.id.0);
            directives.push(PersistDirective::ReplaceCandidates {
                step_index: next.index,
                candidates,
            });
            (WorkflowStatus::Pending, next.index)
        };

        let entry = LogEntry::record(
            req.instance.id.clone(),
            step.index,
            step.name.clone(),
            WorkflowAction::Approve,
            req.actor,
            req.comment.unwrap_or_default(),
            snapshot_hash(&req.instance.form_data),
        );
        Ok(TransitionOutcome {
            status,
            current_step,
            entry,
            quorum: Some(progress),
            directives,
        })
    }

    fn reject(&self, req: TransitionRequest<'_>) -> Result<TransitionOutcome, TransitionError> {
        let step = self.pending_step(&req, WorkflowAction::Reject)?;
        let comment = match req.comment.as_deref().map(str::trim) {
            Some(text) if !text.is_empty() => text.to_string(),
            _ => return Err(TransitionError::MissingRejectComment),
        };

        let entry = LogEntry::record(
            req.instance.id.clone(),
            step.index,
            step.name.clone(),
            WorkflowAction::Reject,
            req.actor.clone(),
            comment.clone(),
            snapshot_hash(&req.instance.form_data),
        );
        Ok(TransitionOutcome {
            status: WorkflowStatus::Rejected,
            current_step: TERMINAL_STEP,
            entry,
            quorum: None,
            directives: vec![PersistDirective::MarkActed {
                step_index: step.index,
                user_id: req.actor.id,
                opinion: Some(comment),
            }],
        })
    }

    /// Shared guards for approve and reject: the instance must be pending,
    /// the current step must exist, and the actor must be one of its
    /// resolved candidates.
    fn pending_step<'t>(
        &self,
        req: &TransitionRequest<'t>,
        action: WorkflowAction,
    ) -> Result<&'t StepDefinition, TransitionError> {
        if req.instance.status != WorkflowStatus::Pending {
            return Err(TransitionError::NotPending { action, status: req.instance.status });
        }
        let step = step_at(req.template, req.instance.current_step)?;
        if req.current_candidates.is_empty() {
            return Err(TransitionError::NoCandidates { step_index: step.index });
        }
        if !is_eligible(req.current_candidates, &req.actor.id) {
            return Err(TransitionError::NotEligible {
                user_id: req.actor.id.clone(),
                step_index: step.index,
            });
        }
        Ok(step)
    }

    fn resolve_step(
        &self,
        template: &WorkflowTemplate,
        step: &StepDefinition,
        context: &ResolutionContext,
        instance_id: &str,
    ) -> Vec<UserRef> {
        let candidates = self.resolver.resolve(&step.resolver, context);
        if candidates.is_empty() {
            warn!(
                event_name = "step_without_candidates",
                instance_id,
                template_id = %template.id.0,
                step_index = step.index,
                step_name = %step.name,
                "routing rule resolved no candidates, the step cannot complete"
            );
        }
        candidates
    }
}

fn step_at(template: &WorkflowTemplate, index: i32) -> Result<&StepDefinition, TransitionError> {
    template.step(index).ok_or(TransitionError::UnknownStep {
        template_id: template.id.0.clone(),
        step_index: index,
    })
}
