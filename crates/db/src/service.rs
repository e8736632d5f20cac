//! Application service tying the pure core to storage. Every mutating call
//! loads state, runs the core logic, and applies the resulting writes in a
//! single transaction with a guarded update on the instance row, so two
//! racing callers cannot both win.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::info;

use permitflow_core::config::AppConfig;
use permitflow_core::domain::candidate::{is_eligible, QuorumProgress};
use permitflow_core::domain::extension::ExtensionRequest;
use permitflow_core::domain::signature::SignatureRecord;
use permitflow_core::domain::workflow::{
    InstanceId, LogEntry, UserRef, WorkflowAction, WorkflowInstance, WorkflowStatus,
    WorkflowTemplate,
};
use permitflow_core::engine::{
    PersistDirective, TransitionError, TransitionRequest, WorkflowEngine,
};
use permitflow_core::errors::{ApplicationError, DomainError};
use permitflow_core::extension::{decide, ExtensionDecision, ExtensionError, ExtensionRules};
use permitflow_core::resolve::{ApproverResolver, OrgDirectory, ResolutionContext};
use permitflow_core::signature::{
    client_context, SignaturePolicy, SignatureService, SignatureVerdict, SigningRequest,
};

use crate::repositories::{
    workflow_status_as_str, CandidateRepository, ExtensionRepository, InstanceRepository,
    RepositoryError, SignatureRepository, SqlCandidateRepository, SqlExtensionRepository,
    SqlInstanceRepository, SqlSignatureRepository, SqlTemplateRepository, TemplateRepository,
};
use crate::DbPool;

/// Directory as the service needs it: the resolver's read interface plus
/// thread-safety for sharing across tasks.
pub trait ServiceOrgDirectory: OrgDirectory + Send + Sync {}
impl<T: OrgDirectory + Send + Sync> ServiceOrgDirectory for T {}

fn persistence(err: RepositoryError) -> ApplicationError {
    ApplicationError::Persistence(err.to_string())
}

#[derive(Clone, Debug, Serialize)]
pub struct TransitionReport {
    pub status: WorkflowStatus,
    pub current_step: i32,
    pub entry: LogEntry,
    pub quorum: Option<QuorumProgress>,
    /// Candidates resolved for the step the instance landed on, when the
    /// transition opened a new step.
    pub next_candidates: Vec<UserRef>,
}

pub struct WorkflowService {
    pool: DbPool,
    directory: Arc<dyn ServiceOrgDirectory>,
    max_supervisor_depth: usize,
    extension_rules: ExtensionRules,
    signatures: SignatureService,
}

impl WorkflowService {
    pub fn new(pool: DbPool, directory: Arc<dyn ServiceOrgDirectory>, config: &AppConfig) -> Self {
        Self {
            pool,
            directory,
            max_supervisor_depth: config.workflow.max_supervisor_depth as usize,
            extension_rules: ExtensionRules {
                max_extension_days: config.workflow.max_extension_days,
            },
            signatures: SignatureService::new(SignaturePolicy {
                store_snapshots: config.workflow.store_snapshots,
            }),
        }
    }

    pub async fn instance(&self, id: &InstanceId) -> Result<WorkflowInstance, ApplicationError> {
        SqlInstanceRepository::new(self.pool.clone())
            .find_by_id(id)
            .await
            .map_err(persistence)?
            .ok_or_else(|| {
                DomainError::InvariantViolation(format!("unknown workflow instance `{}`", id.0))
                    .into()
            })
    }

    pub async fn create_instance(
        &self,
        instance: WorkflowInstance,
    ) -> Result<(), ApplicationError> {
        if !instance.invariant_holds() {
            return Err(DomainError::InvariantViolation(format!(
                "instance `{}` has status {:?} at step {}",
                instance.id.0, instance.status, instance.current_step
            ))
            .into());
        }
        SqlInstanceRepository::new(self.pool.clone()).save(instance).await.map_err(persistence)
    }

    pub async fn logs(&self, id: &InstanceId) -> Result<Vec<LogEntry>, ApplicationError> {
        SqlInstanceRepository::new(self.pool.clone()).list_logs(id).await.map_err(persistence)
    }

    /// Templates are immutable once a live instance references them; publish
    /// a new version instead of editing in place.
    pub async fn save_template(
        &self,
        template: WorkflowTemplate,
    ) -> Result<(), ApplicationError> {
        template
            .validate()
            .map_err(|reason| ApplicationError::from(DomainError::InvariantViolation(reason)))?;

        let repo = SqlTemplateRepository::new(self.pool.clone());
        let exists =
            repo.find(&template.id, template.version).await.map_err(persistence)?.is_some();
        if exists {
            let live: i64 = sqlx::query_scalar(
                "SELECT COUNT(*) FROM workflow_instance
                 WHERE template_id = ? AND template_version = ?
                   AND status IN ('draft', 'pending')",
            )
            .bind(&template.id.0)
            .bind(template.version as i64)
            .fetch_one(&self.pool)
            .await
            .map_err(|e| ApplicationError::Persistence(e.to_string()))?;
            if live > 0 {
                return Err(DomainError::InvariantViolation(format!(
                    "template `{}` v{} is referenced by {live} open instance(s); publish a new version",
                    template.id.0, template.version
                ))
                .into());
            }
        }
        repo.save(template).await.map_err(persistence)
    }

    /// Run one workflow action end to end: load state, let the engine decide,
    /// persist the outcome atomically.
    pub async fn transition(
        &self,
        instance_id: &InstanceId,
        action: WorkflowAction,
        actor: UserRef,
        comment: Option<String>,
    ) -> Result<TransitionReport, ApplicationError> {
        // Templates are immutable while a live instance references them, so
        // the template read can stay outside the write transaction.
        let preread = self.instance(instance_id).await?;
        let template = SqlTemplateRepository::new(self.pool.clone())
            .find(&preread.template_id, preread.template_version)
            .await
            .map_err(persistence)?
            .ok_or_else(|| {
                ApplicationError::Configuration(format!(
                    "instance `{}` references missing template `{}` v{}",
                    preread.id.0, preread.template_id.0, preread.template_version
                ))
            })?;

        // Instance and candidate rows are read inside the same transaction
        // that writes them, so a quorum decision is never based on rows
        // another caller has since changed.
        let mut tx = self.pool.begin().await.map_err(sql_err)?;

        let instance = SqlInstanceRepository::fetch(&mut *tx, instance_id)
            .await
            .map_err(persistence)?
            .ok_or_else(|| {
                ApplicationError::from(DomainError::InvariantViolation(format!(
                    "unknown workflow instance `{}`",
                    instance_id.0
                )))
            })?;
        let candidates =
            SqlCandidateRepository::fetch_step(&mut *tx, instance_id, instance.current_step)
                .await
                .map_err(persistence)?;

        let context = resolution_context(&instance);
        let resolver = ApproverResolver::new(self.directory.as_ref(), self.max_supervisor_depth);
        let engine = WorkflowEngine::new(resolver);
        let outcome = engine
            .transition(TransitionRequest {
                instance: &instance,
                template: &template,
                action,
                actor: actor.clone(),
                comment,
                context: &context,
                current_candidates: &candidates,
            })
            .map_err(|e| ApplicationError::from(DomainError::from(e)))?;

        let now = Utc::now();

        // The `updated_at` token changes on every committed transition, even
        // one that leaves status and step in place (an incomplete quorum), so
        // an interleaved writer always fails this guard.
        let updated = sqlx::query(
            "UPDATE workflow_instance
             SET status = ?, current_step = ?, updated_at = ?
             WHERE id = ? AND status = ? AND current_step = ? AND updated_at = ?",
        )
        .bind(workflow_status_as_str(outcome.status))
        .bind(outcome.current_step)
        .bind(now.to_rfc3339())
        .bind(&instance_id.0)
        .bind(workflow_status_as_str(instance.status))
        .bind(instance.current_step)
        .bind(instance.updated_at.to_rfc3339())
        .execute(&mut *tx)
        .await
        .map_err(sql_err)?;
        if updated.rows_affected() != 1 {
            return Err(ApplicationError::Persistence(format!(
                "workflow instance `{}` changed concurrently",
                instance_id.0
            )));
        }

        SqlInstanceRepository::insert_log(&mut *tx, &outcome.entry).await.map_err(sql_err)?;

        let mut next_candidates = Vec::new();
        for directive in &outcome.directives {
            match directive {
                PersistDirective::MarkActed { step_index, user_id, opinion } => {
                    SqlCandidateRepository::mark_acted(
                        &mut *tx,
                        instance_id,
                        *step_index,
                        user_id,
                        opinion.as_deref(),
                        now,
                    )
                    .await
                    .map_err(sql_err)?;
                }
                PersistDirective::ReplaceCandidates { step_index, candidates } => {
                    SqlCandidateRepository::replace_step(
                        &mut tx,
                        instance_id,
                        *step_index,
                        candidates,
                    )
                    .await
                    .map_err(sql_err)?;
                    next_candidates = candidates.clone();
                }
            }
        }

        tx.commit().await.map_err(sql_err)?;

        info!(
            event_name = "workflow_transition",
            instance_id = %instance_id.0,
            action = ?action,
            actor_id = %actor.id,
            status = ?outcome.status,
            current_step = outcome.current_step,
            "workflow transition applied"
        );

        Ok(TransitionReport {
            status: outcome.status,
            current_step: outcome.current_step,
            entry: outcome.entry,
            quorum: outcome.quorum,
            next_candidates,
        })
    }

    /// Take a signature over the instance's form data as it reads right now.
    pub async fn sign(
        &self,
        instance_id: &InstanceId,
        signer: UserRef,
        action: WorkflowAction,
        comment: Option<String>,
        ip: Option<&str>,
        user_agent: Option<&str>,
    ) -> Result<SignatureRecord, ApplicationError> {
        let instance = self.instance(instance_id).await?;
        if instance.status.is_terminal() {
            return Err(DomainError::InvariantViolation(format!(
                "cannot sign closed workflow `{}`",
                instance_id.0
            ))
            .into());
        }

        // Only a current-step candidate may sign, and only once per step; the
        // unique index on (instance, step, signer) backstops races.
        let candidates = SqlCandidateRepository::new(self.pool.clone())
            .list_for_step(instance_id, instance.current_step)
            .await
            .map_err(persistence)?;
        if !is_eligible(&candidates, &signer.id) {
            return Err(DomainError::Transition(TransitionError::NotEligible {
                user_id: signer.id.clone(),
                step_index: instance.current_step,
            })
            .into());
        }
        let signature_repo = SqlSignatureRepository::new(self.pool.clone());
        if signature_repo
            .has_signature(instance_id, instance.current_step, Some(&signer.id))
            .await
            .map_err(persistence)?
        {
            return Err(DomainError::InvariantViolation(format!(
                "user `{}` already signed step {} of `{}`",
                signer.id, instance.current_step, instance_id.0
            ))
            .into());
        }

        let record = self.signatures.sign(
            SigningRequest {
                instance_id: instance.id.clone(),
                step_index: instance.current_step,
                signer,
                action,
                comment,
                client: client_context(ip, user_agent),
            },
            &instance.form_data,
        );
        signature_repo.save(record.clone()).await.map_err(persistence)?;
        Ok(record)
    }

    /// Re-hash the instance's current form data against every stored
    /// signature.
    pub async fn verify_signatures(
        &self,
        instance_id: &InstanceId,
    ) -> Result<SignatureVerdict, ApplicationError> {
        let instance = self.instance(instance_id).await?;
        let records = SqlSignatureRepository::new(self.pool.clone())
            .list_for_instance(instance_id)
            .await
            .map_err(persistence)?;
        Ok(self.signatures.verify(&records, &instance.form_data))
    }

    /// Verify a single signature by id.
    pub async fn verify_signature(
        &self,
        signature_id: &str,
    ) -> Result<SignatureVerdict, ApplicationError> {
        let repo = SqlSignatureRepository::new(self.pool.clone());
        let record = repo.find_by_id(signature_id).await.map_err(persistence)?.ok_or_else(|| {
            ApplicationError::from(DomainError::InvariantViolation(format!(
                "unknown signature `{signature_id}`"
            )))
        })?;
        let instance = self.instance(&record.instance_id).await?;
        Ok(self.signatures.verify(std::slice::from_ref(&record), &instance.form_data))
    }

    pub async fn request_extension(
        &self,
        instance_id: &InstanceId,
        new_deadline: DateTime<Utc>,
        reason: String,
        requested_by: String,
    ) -> Result<ExtensionRequest, ApplicationError> {
        let instance = self.instance(instance_id).await?;
        let repo = SqlExtensionRepository::new(self.pool.clone());
        let pending = repo.find_pending(instance_id).await.map_err(persistence)?;

        self.extension_rules
            .validate_request(
                instance.deadline,
                new_deadline,
                &reason,
                Utc::now(),
                pending.as_ref(),
            )
            .map_err(|e| ApplicationError::from(DomainError::from(e)))?;

        let old_deadline = instance
            .deadline
            .ok_or_else(|| ApplicationError::from(DomainError::from(ExtensionError::NoDeadline)))?;
        let request = ExtensionRequest::pending(
            instance.id.clone(),
            old_deadline,
            new_deadline,
            reason,
            requested_by,
        );
        repo.save(request.clone()).await.map_err(persistence)?;

        info!(
            event_name = "extension_requested",
            instance_id = %instance_id.0,
            extension_id = %request.id,
            new_deadline = %new_deadline.to_rfc3339(),
            "deadline extension requested"
        );
        Ok(request)
    }

    /// Approve or reject a pending extension. Approval moves the parent
    /// instance's deadline in the same transaction as the request update.
    pub async fn decide_extension(
        &self,
        extension_id: &str,
        decision: ExtensionDecision,
        decided_by: &str,
        comment: Option<String>,
    ) -> Result<ExtensionRequest, ApplicationError> {
        let repo = SqlExtensionRepository::new(self.pool.clone());
        let request = repo.find_by_id(extension_id).await.map_err(persistence)?.ok_or_else(
            || {
                ApplicationError::from(DomainError::InvariantViolation(format!(
                    "unknown extension request `{extension_id}`"
                )))
            },
        )?;

        let outcome = decide(&request, decision, decided_by, comment)
            .map_err(|e| ApplicationError::from(DomainError::from(e)))?;

        let mut tx = self.pool.begin().await.map_err(sql_err)?;

        let updated = sqlx::query(
            "UPDATE extension_request
             SET status = ?, decided_by = ?, decision_comment = ?, decided_at = ?
             WHERE id = ? AND status = 'pending'",
        )
        .bind(crate::repositories::extension_status_as_str(outcome.request.status))
        .bind(&outcome.request.decided_by)
        .bind(&outcome.request.decision_comment)
        .bind(outcome.request.decided_at.map(|dt| dt.to_rfc3339()))
        .bind(extension_id)
        .execute(&mut *tx)
        .await
        .map_err(sql_err)?;
        if updated.rows_affected() != 1 {
            return Err(ApplicationError::Persistence(format!(
                "extension request `{extension_id}` changed concurrently"
            )));
        }

        if let Some(deadline) = outcome.new_parent_deadline {
            sqlx::query("UPDATE workflow_instance SET deadline = ?, updated_at = ? WHERE id = ?")
                .bind(deadline.to_rfc3339())
                .bind(Utc::now().to_rfc3339())
                .bind(&outcome.request.instance_id.0)
                .execute(&mut *tx)
                .await
                .map_err(sql_err)?;
        }

        tx.commit().await.map_err(sql_err)?;

        info!(
            event_name = "extension_decided",
            extension_id,
            decision = ?decision,
            decided_by,
            "deadline extension decided"
        );
        Ok(outcome.request)
    }

    pub async fn extensions(
        &self,
        instance_id: &InstanceId,
    ) -> Result<Vec<ExtensionRequest>, ApplicationError> {
        SqlExtensionRepository::new(self.pool.clone())
            .list_for_instance(instance_id)
            .await
            .map_err(persistence)
    }
}

fn sql_err(err: sqlx::Error) -> ApplicationError {
    ApplicationError::Persistence(err.to_string())
}

/// Flatten the form snapshot into resolver inputs. Only top-level scalar
/// fields participate in routing.
fn resolution_context(instance: &WorkflowInstance) -> ResolutionContext {
    let mut context = ResolutionContext {
        subject_user: Some(instance.created_by.id.clone()),
        owning_department: instance.owning_department.clone(),
        fields: Default::default(),
    };
    if let Ok(serde_json::Value::Object(map)) =
        serde_json::from_str::<serde_json::Value>(&instance.form_data)
    {
        for (key, value) in map {
            let text = match value {
                serde_json::Value::String(s) => s,
                serde_json::Value::Number(n) => n.to_string(),
                serde_json::Value::Bool(b) => b.to_string(),
                _ => continue,
            };
            context.fields.insert(key, text);
        }
    }
    context
}
