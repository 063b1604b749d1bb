//! service::errors
//!
//! Error type of the domain services.

use thiserror::Error;

use crate::core::types::TypeError;
use crate::store::StoreError;
use crate::structure::StructureError;

/// Errors from domain operations.
///
/// Each variant corresponds to one HTTP status class at the API boundary.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum SdlcError {
    #[error("{0}")]
    NotFound(String),

    #[error("{0}")]
    AlreadyExists(String),

    /// A precondition did not hold: stale revision, wrong review state,
    /// workspace in conflict resolution.
    #[error("{0}")]
    Conflict(String),

    #[error("{0}")]
    InvalidRequest(String),

    /// The caller must (re-)authenticate.
    #[error("{0}")]
    Unauthorized(String),

    #[error("{0}")]
    Unsupported(String),

    /// The backend (GitLab) failed or could not be reached.
    #[error("{0}")]
    Upstream(String),

    #[error("{0}")]
    Internal(String),
}

impl SdlcError {
    /// Stable machine-readable code for API responses.
    pub fn code(&self) -> &'static str {
        match self {
            SdlcError::NotFound(_) => "NOT_FOUND",
            SdlcError::AlreadyExists(_) => "ALREADY_EXISTS",
            SdlcError::Conflict(_) => "CONFLICT",
            SdlcError::InvalidRequest(_) => "INVALID_REQUEST",
            SdlcError::Unauthorized(_) => "UNAUTHORIZED",
            SdlcError::Unsupported(_) => "UNSUPPORTED",
            SdlcError::Upstream(_) => "UPSTREAM_ERROR",
            SdlcError::Internal(_) => "INTERNAL_ERROR",
        }
    }

    pub(crate) fn invalid(message: impl Into<String>) -> Self {
        SdlcError::InvalidRequest(message.into())
    }

    pub(crate) fn not_found(message: impl Into<String>) -> Self {
        SdlcError::NotFound(message.into())
    }

    pub(crate) fn conflict(message: impl Into<String>) -> Self {
        SdlcError::Conflict(message.into())
    }
}

impl From<StoreError> for SdlcError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::NotFound(what) => SdlcError::NotFound(format!("not found: {what}")),
            StoreError::AlreadyExists(what) => {
                SdlcError::AlreadyExists(format!("already exists: {what}"))
            }
            StoreError::Conflict(message) => SdlcError::Conflict(message),
            StoreError::InvalidRequest(message) => SdlcError::InvalidRequest(message),
            StoreError::AuthRequired => SdlcError::Unauthorized("authentication required".into()),
            StoreError::AuthFailed(message) => SdlcError::Unauthorized(message),
            StoreError::Unsupported(message) => SdlcError::Unsupported(message),
            err @ (StoreError::Network(_) | StoreError::Api { .. }) => {
                SdlcError::Upstream(err.to_string())
            }
            err @ (StoreError::Git(_) | StoreError::Internal(_)) => {
                SdlcError::Internal(err.to_string())
            }
        }
    }
}

impl From<StructureError> for SdlcError {
    fn from(err: StructureError) -> Self {
        SdlcError::InvalidRequest(err.to_string())
    }
}

impl From<TypeError> for SdlcError {
    fn from(err: TypeError) -> Self {
        SdlcError::InvalidRequest(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn store_errors_map_to_classes() {
        assert!(matches!(
            SdlcError::from(StoreError::NotFound("branch x".into())),
            SdlcError::NotFound(m) if m == "not found: branch x"
        ));
        assert!(matches!(
            SdlcError::from(StoreError::AuthRequired),
            SdlcError::Unauthorized(_)
        ));
        assert!(matches!(
            SdlcError::from(StoreError::Api {
                status: 502,
                message: "bad gateway".into()
            }),
            SdlcError::Upstream(_)
        ));
        assert!(matches!(
            SdlcError::from(StoreError::Git("corrupt".into())),
            SdlcError::Internal(_)
        ));
    }

    #[test]
    fn codes() {
        assert_eq!(SdlcError::conflict("x").code(), "CONFLICT");
        assert_eq!(SdlcError::Upstream("x".into()).code(), "UPSTREAM_ERROR");
    }

    #[test]
    fn structure_errors_are_invalid_requests() {
        let err: SdlcError = StructureError::UnknownVersion(9).into();
        assert_eq!(
            err,
            SdlcError::InvalidRequest("unknown project structure version 9".into())
        );
    }
}
