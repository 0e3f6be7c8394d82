//! API error surface.
//!
//! Every failure the HTTP layer can return carries a stable wire token in a
//! JSON body (`{"error": "<token>", ...}`). The tokens are the public
//! contract; refactors must not change them.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;

use crate::policy::Decision;
use crate::store::StoreError;
use crate::token::TokenError;

#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    // Identification
    #[error("agent_not_found")]
    AgentNotFound,
    #[error("agent_key_not_found")]
    AgentKeyNotFound,
    #[error("agent_id_taken")]
    AgentIdTaken,

    // Authentication
    #[error("missing_bearer_token")]
    MissingBearerToken,
    #[error("jwt_expired")]
    JwtExpired,
    #[error("jwt_invalid")]
    JwtInvalid,
    #[error("invalid_or_expired_nonce")]
    InvalidOrExpiredNonce,
    #[error("bad_signature")]
    BadSignature,

    // Authorization
    #[error("token_agent_mismatch")]
    TokenAgentMismatch,
    #[error("denied")]
    Denied(Decision),

    // Validation
    #[error("invalid_verification_level")]
    InvalidVerificationLevel,
    #[error("invalid_request")]
    InvalidRequest(&'static str),

    // Resource
    #[error("tool_not_found_or_disabled")]
    ToolNotFoundOrDisabled,

    #[error("internal error: {0}")]
    Internal(String),
}

impl From<StoreError> for ApiError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::AgentIdTaken => ApiError::AgentIdTaken,
            other => ApiError::Internal(other.to_string()),
        }
    }
}

impl From<TokenError> for ApiError {
    fn from(e: TokenError) -> Self {
        match e {
            TokenError::Expired => ApiError::JwtExpired,
            TokenError::Invalid => ApiError::JwtInvalid,
        }
    }
}

impl From<serde_json::Error> for ApiError {
    fn from(e: serde_json::Error) -> Self {
        ApiError::Internal(e.to_string())
    }
}

impl From<anyhow::Error> for ApiError {
    fn from(e: anyhow::Error) -> Self {
        ApiError::Internal(e.to_string())
    }
}

impl ApiError {
    fn status(&self) -> StatusCode {
        match self {
            ApiError::AgentNotFound
            | ApiError::AgentKeyNotFound
            | ApiError::ToolNotFoundOrDisabled => StatusCode::NOT_FOUND,
            ApiError::AgentIdTaken => StatusCode::CONFLICT,
            ApiError::MissingBearerToken
            | ApiError::JwtExpired
            | ApiError::JwtInvalid
            | ApiError::InvalidOrExpiredNonce
            | ApiError::BadSignature => StatusCode::UNAUTHORIZED,
            ApiError::TokenAgentMismatch | ApiError::Denied(_) => StatusCode::FORBIDDEN,
            ApiError::InvalidVerificationLevel | ApiError::InvalidRequest(_) => {
                StatusCode::BAD_REQUEST
            }
            ApiError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        let body = match &self {
            ApiError::Denied(decision) => {
                json!({"error": "denied", "denied": true, "decision": decision})
            }
            ApiError::InvalidRequest(message) => {
                json!({"error": "invalid_request", "message": message})
            }
            ApiError::Internal(detail) => {
                // Detail goes to the log, never onto the wire.
                tracing::error!(error = %detail, "internal error");
                json!({"error": "internal_error"})
            }
            other => json!({"error": other.to_string()}),
        };
        (status, Json(body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::policy::Mode;

    #[test]
    fn wire_tokens_are_stable() {
        assert_eq!(ApiError::AgentNotFound.to_string(), "agent_not_found");
        assert_eq!(ApiError::AgentIdTaken.to_string(), "agent_id_taken");
        assert_eq!(
            ApiError::InvalidOrExpiredNonce.to_string(),
            "invalid_or_expired_nonce"
        );
        assert_eq!(ApiError::BadSignature.to_string(), "bad_signature");
        assert_eq!(
            ApiError::TokenAgentMismatch.to_string(),
            "token_agent_mismatch"
        );
        assert_eq!(
            ApiError::ToolNotFoundOrDisabled.to_string(),
            "tool_not_found_or_disabled"
        );
    }

    #[test]
    fn status_mapping() {
        assert_eq!(ApiError::AgentNotFound.status(), StatusCode::NOT_FOUND);
        assert_eq!(ApiError::AgentIdTaken.status(), StatusCode::CONFLICT);
        assert_eq!(ApiError::JwtExpired.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(
            ApiError::TokenAgentMismatch.status(),
            StatusCode::FORBIDDEN
        );
        let denied = ApiError::Denied(Decision {
            allow: false,
            mode: Mode::Deny,
            ttl_seconds: 0,
            reasons: vec![],
        });
        assert_eq!(denied.status(), StatusCode::FORBIDDEN);
        assert_eq!(
            ApiError::InvalidVerificationLevel.status(),
            StatusCode::BAD_REQUEST
        );
    }
}
