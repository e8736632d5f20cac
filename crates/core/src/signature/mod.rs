//! Snapshot hashing and signature verification.
//!
//! A signature binds a signer, an action, and a SHA-256 digest of the form
//! data exactly as it read at signing time. Verification re-hashes the
//! current form data and compares; any divergence is reported with the
//! signer and timestamp of the record that no longer matches.

use chrono::Utc;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use uuid::Uuid;

use crate::domain::signature::{ClientContext, SignatureRecord};
use crate::domain::workflow::{InstanceId, UserRef, WorkflowAction};

/// Hex SHA-256 of a form snapshot. Hashing covers the serialized bytes as
/// given, so callers must hand in the canonical serialization every time.
pub fn snapshot_hash(snapshot: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(snapshot.as_bytes());
    encode_hex(&hasher.finalize())
}

fn encode_hex(bytes: &[u8]) -> String {
    let mut out = String::with_capacity(bytes.len() * 2);
    for byte in bytes {
        out.push_str(&format!("{byte:02x}"));
    }
    out
}

#[derive(Clone, Copy, Debug)]
pub struct SignaturePolicy {
    /// Retain the full snapshot text alongside the digest.
    pub store_snapshots: bool,
}

impl Default for SignaturePolicy {
    fn default() -> Self {
        Self { store_snapshots: false }
    }
}

#[derive(Clone, Debug)]
pub struct SigningRequest {
    pub instance_id: InstanceId,
    pub step_index: i32,
    pub signer: UserRef,
    pub action: WorkflowAction,
    pub comment: Option<String>,
    pub client: ClientContext,
}

/// Outcome of verifying one or all signatures against the current snapshot.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "verdict", rename_all = "snake_case")]
pub enum SignatureVerdict {
    /// Every checked record still matches the current snapshot.
    Valid { checked: usize, current_hash: String },
    /// Nothing to check. Distinct from `Valid` so callers cannot mistake an
    /// unsigned form for a verified one.
    NoSignatures,
    /// At least one record was taken over different form data.
    Tampered {
        signature_id: String,
        signer: UserRef,
        signed_at: chrono::DateTime<Utc>,
        recorded_hash: String,
        current_hash: String,
    },
}

impl SignatureVerdict {
    pub fn is_valid(&self) -> bool {
        matches!(self, Self::Valid { .. })
    }
}

#[derive(Clone, Debug, Default)]
pub struct SignatureService {
    policy: SignaturePolicy,
}

impl SignatureService {
    pub fn new(policy: SignaturePolicy) -> Self {
        Self { policy }
    }

    /// Take a signature over the snapshot as it reads right now.
    pub fn sign(&self, request: SigningRequest, snapshot: &str) -> SignatureRecord {
        SignatureRecord {
            id: Uuid::new_v4().to_string(),
            instance_id: request.instance_id,
            step_index: request.step_index,
            signer: request.signer,
            action: request.action,
            comment: request.comment,
            snapshot_hash: snapshot_hash(snapshot),
            snapshot: self.policy.store_snapshots.then(|| snapshot.to_string()),
            client: request.client,
            signed_at: Utc::now(),
        }
    }

    /// Verify `records` against the current snapshot. The first mismatch in
    /// record order decides the verdict.
    pub fn verify(&self, records: &[SignatureRecord], current_snapshot: &str) -> SignatureVerdict {
        if records.is_empty() {
            return SignatureVerdict::NoSignatures;
        }
        let current_hash = snapshot_hash(current_snapshot);
        for record in records {
            if !record.matches(&current_hash) {
                return SignatureVerdict::Tampered {
                    signature_id: record.id.clone(),
                    signer: record.signer.clone(),
                    signed_at: record.signed_at,
                    recorded_hash: record.snapshot_hash.clone(),
                    current_hash,
                };
            }
        }
        SignatureVerdict::Valid { checked: records.len(), current_hash }
    }

    /// Verify a single record by id; `None` if the id is unknown.
    pub fn verify_one(
        &self,
        records: &[SignatureRecord],
        signature_id: &str,
        current_snapshot: &str,
    ) -> Option<SignatureVerdict> {
        let record = records.iter().find(|r| r.id == signature_id)?;
        Some(self.verify(std::slice::from_ref(record), current_snapshot))
    }
}

/// Pull what we can out of transport metadata. Absent or unparseable inputs
/// become `None`; signing never fails for lack of client context.
pub fn client_context(ip: Option<&str>, user_agent: Option<&str>) -> ClientContext {
    let ip = ip.map(str::trim).filter(|s| !s.is_empty()).map(|s| {
        // X-Forwarded-For style lists keep the original client first.
        s.split(',').next().unwrap_or(s).trim().to_string()
    });
    let user_agent = user_agent.map(str::trim).filter(|s| !s.is_empty()).map(str::to_string);
    let (device, browser, os) = match user_agent.as_deref() {
        Some(ua) => classify_user_agent(ua),
        None => (None, None, None),
    };
    ClientContext { ip, user_agent, device, browser, os }
}

fn classify_user_agent(ua: &str) -> (Option<String>, Option<String>, Option<String>) {
    let lower = ua.to_ascii_lowercase();
    let device = if lower.contains("ipad") || lower.contains("tablet") {
        Some("tablet")
    } else if lower.contains("mobile") || lower.contains("iphone") || lower.contains("android") {
        Some("mobile")
    } else {
        Some("desktop")
    };
    let browser = if lower.contains("edg/") {
        Some("edge")
    } else if lower.contains("firefox") {
        Some("firefox")
    } else if lower.contains("chrome") {
        Some("chrome")
    } else if lower.contains("safari") {
        Some("safari")
    } else {
        None
    };
    let os = if lower.contains("windows") {
        Some("windows")
    } else if lower.contains("android") {
        Some("android")
    } else if lower.contains("iphone") || lower.contains("ipad") || lower.contains("ios") {
        Some("ios")
    } else if lower.contains("mac os") || lower.contains("macintosh") {
        Some("macos")
    } else if lower.contains("linux") {
        Some("linux")
    } else {
        None
    };
    (device.map(str::to_string), browser.map(str::to_string), os.map(str::to_string))
}

#[cfg(test)]
mod tests {
    use crate::domain::signature::ClientContext;
    use crate::domain::workflow::{InstanceId, UserRef, WorkflowAction};

    use super::{
        client_context, snapshot_hash, SignaturePolicy, SignatureService, SignatureVerdict,
        SigningRequest,
    };

    fn request(signer: &str) -> SigningRequest {
        SigningRequest {
            instance_id: InstanceId("WP-1".to_string()),
            step_index: 0,
            signer: UserRef::new(signer, format!("user {signer}")),
            action: WorkflowAction::Approve,
            comment: None,
            client: ClientContext::default(),
        }
    }

    #[test]
    fn hash_is_stable_and_input_sensitive() {
        let a = snapshot_hash(r#"{"gas_test":"0.0%"}"#);
        let b = snapshot_hash(r#"{"gas_test":"0.0%"}"#);
        let c = snapshot_hash(r#"{"gas_test":"0.1%"}"#);
        assert_eq!(a, b);
        assert_ne!(a, c);
        assert_eq!(a.len(), 64);
        assert!(a.chars().all(|ch| ch.is_ascii_hexdigit()));
    }

    #[test]
    fn untouched_snapshot_verifies() {
        let service = SignatureService::default();
        let snapshot = r#"{"permit":"hot work","area":"tank 3"}"#;
        let records =
            vec![service.sign(request("u-1"), snapshot), service.sign(request("u-2"), snapshot)];
        let verdict = service.verify(&records, snapshot);
        assert!(verdict.is_valid());
        match verdict {
            SignatureVerdict::Valid { checked, .. } => assert_eq!(checked, 2),
            other => panic!("unexpected verdict {other:?}"),
        }
    }

    #[test]
    fn edited_snapshot_names_the_betrayed_signer() {
        let service = SignatureService::default();
        let original = r#"{"permit":"hot work","area":"tank 3"}"#;
        let edited = r#"{"permit":"hot work","area":"tank 4"}"#;
        let record = service.sign(request("u-1"), original);
        let expected_id = record.id.clone();
        match service.verify(&[record], edited) {
            SignatureVerdict::Tampered { signature_id, signer, recorded_hash, current_hash, .. } => {
                assert_eq!(signature_id, expected_id);
                assert_eq!(signer.id, "u-1");
                assert_ne!(recorded_hash, current_hash);
            }
            other => panic!("expected tampered, got {other:?}"),
        }
    }

    #[test]
    fn no_signatures_is_not_valid() {
        let service = SignatureService::default();
        let verdict = service.verify(&[], "{}");
        assert_eq!(verdict, SignatureVerdict::NoSignatures);
        assert!(!verdict.is_valid());
    }

    #[test]
    fn verify_one_targets_a_single_record() {
        let service = SignatureService::default();
        let first = service.sign(request("u-1"), "v1");
        let second = service.sign(request("u-2"), "v2");
        let records = vec![first.clone(), second];
        // Whole-set verification fails because the snapshots differ...
        assert!(!service.verify(&records, "v1").is_valid());
        // ...but the record taken over "v1" still verifies on its own.
        let verdict = service.verify_one(&records, &first.id, "v1").expect("known id");
        assert!(verdict.is_valid());
        assert!(service.verify_one(&records, "sig-missing", "v1").is_none());
    }

    #[test]
    fn snapshot_retention_follows_policy() {
        let keep = SignatureService::new(SignaturePolicy { store_snapshots: true });
        let drop = SignatureService::default();
        assert_eq!(keep.sign(request("u-1"), "{}").snapshot.as_deref(), Some("{}"));
        assert!(drop.sign(request("u-1"), "{}").snapshot.is_none());
    }

    #[test]
    fn client_context_degrades_to_nulls() {
        let empty = client_context(None, None);
        assert_eq!(empty, ClientContext::default());

        let blank = client_context(Some("  "), Some(""));
        assert_eq!(blank, ClientContext::default());
    }

    #[test]
    fn client_context_takes_first_forwarded_ip() {
        let ctx = client_context(Some("10.1.2.3, 172.16.0.1"), None);
        assert_eq!(ctx.ip.as_deref(), Some("10.1.2.3"));
    }

    #[test]
    fn user_agent_classification() {
        let ctx = client_context(
            None,
            Some(
                "Mozilla/5.0 (iPhone; CPU iPhone OS 17_0 like Mac OS X) AppleWebKit/605.1.15 \
                 (KHTML, like Gecko) Version/17.0 Mobile/15E148 Safari/604.1",
            ),
        );
        assert_eq!(ctx.device.as_deref(), Some("mobile"));
        assert_eq!(ctx.browser.as_deref(), Some("safari"));
        assert_eq!(ctx.os.as_deref(), Some("ios"));

        let ctx = client_context(
            None,
            Some(
                "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 \
                 (KHTML, like Gecko) Chrome/120.0 Safari/537.36 Edg/120.0",
            ),
        );
        assert_eq!(ctx.device.as_deref(), Some("desktop"));
        assert_eq!(ctx.browser.as_deref(), Some("edge"));
        assert_eq!(ctx.os.as_deref(), Some("windows"));
    }
}
