use crate::commands::{block_on_pool, CommandError, CommandResult};
use permitflow_core::domain::workflow::InstanceId;
use permitflow_core::signature::{SignatureService, SignatureVerdict};
use permitflow_db::repositories::{
    InstanceRepository, SignatureRepository, SqlInstanceRepository, SqlSignatureRepository,
};

/// Re-hash the instance's current form data and compare against its stored
/// signatures. Exit 0 when everything matches, 1 on tampering.
pub fn run(instance_id: &str, signature_id: Option<&str>) -> CommandResult {
    let verdict = block_on_pool("verify", |pool| async move {
        let id = InstanceId(instance_id.to_string());
        let instance = SqlInstanceRepository::new(pool.clone())
            .find_by_id(&id)
            .await
            .map_err(|error| CommandError::new("persistence", error.to_string(), 5))?
            .ok_or_else(|| {
                CommandError::new(
                    "not_found",
                    format!("unknown workflow instance `{instance_id}`"),
                    6,
                )
            })?;

        let repo = SqlSignatureRepository::new(pool);
        let records = match signature_id {
            Some(signature_id) => {
                let record = repo
                    .find_by_id(signature_id)
                    .await
                    .map_err(|error| CommandError::new("persistence", error.to_string(), 5))?
                    .ok_or_else(|| {
                        CommandError::new(
                            "not_found",
                            format!("unknown signature `{signature_id}`"),
                            6,
                        )
                    })?;
                vec![record]
            }
            None => repo
                .list_for_instance(&id)
                .await
                .map_err(|error| CommandError::new("persistence", error.to_string(), 5))?,
        };

        Ok(SignatureService::default().verify(&records, &instance.form_data))
    });

    match verdict {
        Ok(SignatureVerdict::Valid { checked, current_hash }) => CommandResult::success(
            "verify",
            format!("{checked} signature(s) match form hash {current_hash}"),
        ),
        Ok(SignatureVerdict::NoSignatures) => CommandResult::success(
            "verify",
            format!("workflow `{instance_id}` has no signatures to verify"),
        ),
        Ok(SignatureVerdict::Tampered { signature_id, signer, signed_at, .. }) => {
            CommandResult::failure(
                "verify",
                "signature_tampered",
                format!(
                    "form data changed after signature `{signature_id}` by {} ({}) at {}",
                    signer.name,
                    signer.id,
                    signed_at.to_rfc3339()
                ),
                1,
            )
        }
        Err(failure) => failure,
    }
}
