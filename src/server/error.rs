//! server::error
//!
//! JSON error responses.
//!
//! Every failed request answers with
//!
//! ```text
//! { "code": "NOT_FOUND", "message": "...", "requestId": "...", "timestamp": "..." }
//! ```
//!
//! and 401 responses in OAuth mode also carry `authorizeUrl`.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{error, warn};
use uuid::Uuid;

use crate::auth::AuthError;
use crate::service::SdlcError;
use crate::store::StoreError;

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct ErrorBody {
    code: &'static str,
    message: String,
    request_id: String,
    timestamp: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    authorize_url: Option<String>,
}

/// A failed request.
#[derive(Debug)]
pub struct ApiError {
    error: SdlcError,
    authorize_url: Option<String>,
}

impl ApiError {
    pub fn new(error: SdlcError) -> Self {
        Self {
            error,
            authorize_url: None,
        }
    }

    /// A 401 telling the browser where to authorize.
    pub fn unauthorized(message: impl Into<String>, authorize_url: Option<String>) -> Self {
        Self {
            error: SdlcError::Unauthorized(message.into()),
            authorize_url,
        }
    }

    pub fn error(&self) -> &SdlcError {
        &self.error
    }

    pub fn status(&self) -> StatusCode {
        status_for(&self.error)
    }
}

/// HTTP status of a service error.
pub fn status_for(error: &SdlcError) -> StatusCode {
    match error {
        SdlcError::NotFound(_) => StatusCode::NOT_FOUND,
        SdlcError::AlreadyExists(_) | SdlcError::Conflict(_) => StatusCode::CONFLICT,
        SdlcError::InvalidRequest(_) => StatusCode::BAD_REQUEST,
        SdlcError::Unauthorized(_) => StatusCode::UNAUTHORIZED,
        SdlcError::Unsupported(_) => StatusCode::NOT_IMPLEMENTED,
        SdlcError::Upstream(_) => StatusCode::BAD_GATEWAY,
        SdlcError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

impl From<SdlcError> for ApiError {
    fn from(error: SdlcError) -> Self {
        Self::new(error)
    }
}

impl From<StoreError> for ApiError {
    fn from(error: StoreError) -> Self {
        Self::new(error.into())
    }
}

impl From<AuthError> for ApiError {
    fn from(error: AuthError) -> Self {
        let mapped = if error.needs_reauth() {
            SdlcError::Unauthorized(error.to_string())
        } else {
            match error {
                AuthError::Network(_) | AuthError::GitLabApi { .. } | AuthError::RefreshFailed(_) => {
                    SdlcError::Upstream(error.to_string())
                }
                AuthError::NotConfigured(_) => SdlcError::Unsupported(error.to_string()),
                _ => SdlcError::Internal(error.to_string()),
            }
        };
        Self::new(mapped)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        let request_id = Uuid::new_v4().to_string();
        let code = self.error.code();
        let message = self.error.to_string();

        if status.is_server_error() {
            error!(request_id = %request_id, code, status = status.as_u16(), error = %message, "request failed");
        } else {
            warn!(request_id = %request_id, code, status = status.as_u16(), error = %message, "request rejected");
        }

        let body = ErrorBody {
            code,
            message,
            request_id,
            timestamp: Utc::now(),
            authorize_url: self.authorize_url,
        };
        (status, Json(body)).into_response()
    }
}
