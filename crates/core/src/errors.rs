use thiserror::Error;

use crate::engine::TransitionError;
use crate::extension::ExtensionError;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum DomainError {
    #[error(transparent)]
    Transition(#[from] TransitionError),
    #[error(transparent)]
    Extension(#[from] ExtensionError),
    #[error("signature integrity violation: {0}")]
    SignatureIntegrity(String),
    #[error("domain invariant violation: {0}")]
    InvariantViolation(String),
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ApplicationError {
    #[error(transparent)]
    Domain(#[from] DomainError),
    #[error("persistence failure: {0}")]
    Persistence(String),
    #[error("configuration failure: {0}")]
    Configuration(String),
}

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum InterfaceError {
    #[error("bad request: {message}")]
    BadRequest { message: String, correlation_id: String },
    #[error("conflict: {message}")]
    Conflict { message: String, correlation_id: String },
    #[error("service unavailable: {message}")]
    ServiceUnavailable { message: String, correlation_id: String },
    #[error("internal error: {message}")]
    Internal { message: String, correlation_id: String },
}

impl InterfaceError {
    /// Message safe to show an end user; internals stay in the log line
    /// keyed by the correlation id.
    pub fn user_message(&self) -> &'static str {
        match self {
            Self::BadRequest { .. } => {
                "The request could not be applied. Check the inputs and try again."
            }
            Self::Conflict { .. } => {
                "The workflow changed while the request was in flight. Reload and retry."
            }
            Self::ServiceUnavailable { .. } => {
                "The service is temporarily unavailable. Retry in a moment."
            }
            Self::Internal { .. } => "Something went wrong on our side.",
        }
    }
}

impl ApplicationError {
    pub fn into_interface(self, correlation_id: impl Into<String>) -> InterfaceError {
        let correlation_id = correlation_id.into();
        match self {
            // A closed workflow or an already-decided extension means the
            // caller raced someone else, not that the request was malformed.
            Self::Domain(DomainError::Transition(TransitionError::AlreadyClosed { .. }))
            | Self::Domain(DomainError::Extension(
                ExtensionError::AlreadyDecided { .. } | ExtensionError::PendingRequestExists { .. },
            )) => InterfaceError::Conflict {
                message: "workflow state changed concurrently".to_owned(),
                correlation_id,
            },
            Self::Domain(error) => {
                InterfaceError::BadRequest { message: error.to_string(), correlation_id }
            }
            Self::Persistence(message) => {
                InterfaceError::ServiceUnavailable { message, correlation_id }
            }
            Self::Configuration(message) => {
                InterfaceError::Internal { message, correlation_id }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use crate::domain::workflow::WorkflowStatus;
    use crate::engine::TransitionError;
    use crate::errors::{ApplicationError, DomainError, InterfaceError};

    #[test]
    fn domain_error_maps_to_bad_request_interface_error() {
        let interface = ApplicationError::from(DomainError::Transition(
            TransitionError::MissingRejectComment,
        ))
        .into_interface("req-1");

        assert!(matches!(
            interface,
            InterfaceError::BadRequest {
                ref correlation_id,
                ..
            } if correlation_id == "req-1"
        ));
        assert_eq!(
            interface.user_message(),
            "The request could not be applied. Check the inputs and try again."
        );
    }

    #[test]
    fn closed_workflow_maps_to_conflict() {
        let interface = ApplicationError::from(DomainError::Transition(
            TransitionError::AlreadyClosed { status: WorkflowStatus::Approved },
        ))
        .into_interface("req-2");

        assert!(matches!(interface, InterfaceError::Conflict { .. }));
        assert_eq!(
            interface.user_message(),
            "The workflow changed while the request was in flight. Reload and retry."
        );
    }

    #[test]
    fn persistence_error_maps_to_service_unavailable() {
        let interface = ApplicationError::Persistence("database lock timeout".to_owned())
            .into_interface("req-3");

        assert!(matches!(interface, InterfaceError::ServiceUnavailable { .. }));
    }

    #[test]
    fn configuration_error_maps_to_internal() {
        let interface = ApplicationError::Configuration("missing database url".to_owned())
            .into_interface("req-4");

        assert!(matches!(interface, InterfaceError::Internal { .. }));
        assert_eq!(interface.user_message(), "Something went wrong on our side.");
    }
}
