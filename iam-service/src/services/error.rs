use std::collections::BTreeMap;

use service_core::error::AppError;
use thiserror::Error;

/// Broad classification of an [`IamError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Validation,
    Authentication,
    Authorization,
    Session,
    PolicyEvaluation,
    Conflict,
    NotFound,
    RateLimited,
    Infrastructure,
}

#[derive(Error, Debug)]
pub enum IamError {
    #[error("Validation error on {field}: {message}")]
    Validation { field: String, message: String },

    #[error("Invalid credentials")]
    InvalidCredentials,

    #[error("Account is not active")]
    AccountInactive { status: String },

    #[error("Token expired")]
    TokenExpired,

    #[error("Token revoked")]
    TokenRevoked,

    #[error("Invalid token")]
    InvalidToken,

    #[error("Access denied")]
    AccessDenied { resource: String, action: String },

    #[error("Session not found")]
    SessionNotFound { session_id: String },

    #[error("Session is not active")]
    SessionInactive { session_id: String },

    #[error("Policy evaluation failed: {0}")]
    PolicyEvaluation(String),

    #[error("Identity already exists")]
    IdentityAlreadyExists { field: String },

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("{entity} not found")]
    NotFound { entity: &'static str, id: String },

    #[error("Too many attempts")]
    RateLimited { retry_after_secs: Option<u64> },

    #[error("Infrastructure error: {0}")]
    Infrastructure(#[from] anyhow::Error),
}

impl IamError {
    pub fn validation(field: impl Into<String>, message: impl Into<String>) -> Self {
        IamError::Validation {
            field: field.into(),
            message: message.into(),
        }
    }

    pub fn not_found(entity: &'static str, id: impl ToString) -> Self {
        IamError::NotFound {
            entity,
            id: id.to_string(),
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            IamError::Validation { .. } => ErrorKind::Validation,
            IamError::InvalidCredentials
            | IamError::AccountInactive { .. }
            | IamError::TokenExpired
            | IamError::TokenRevoked
            | IamError::InvalidToken => ErrorKind::Authentication,
            IamError::AccessDenied { .. } => ErrorKind::Authorization,
            IamError::SessionNotFound { .. } | IamError::SessionInactive { .. } => {
                ErrorKind::Session
            }
            IamError::PolicyEvaluation(_) => ErrorKind::PolicyEvaluation,
            IamError::IdentityAlreadyExists { .. } | IamError::Conflict(_) => ErrorKind::Conflict,
            IamError::NotFound { .. } => ErrorKind::NotFound,
            IamError::RateLimited { .. } => ErrorKind::RateLimited,
            IamError::Infrastructure(_) => ErrorKind::Infrastructure,
        }
    }

    /// Stable machine-readable code.
    pub fn code(&self) -> &'static str {
        match self {
            IamError::Validation { .. } => "VALIDATION_ERROR",
            IamError::InvalidCredentials => "INVALID_CREDENTIALS",
            IamError::AccountInactive { .. } => "ACCOUNT_INACTIVE",
            IamError::TokenExpired => "TOKEN_EXPIRED",
            IamError::TokenRevoked => "TOKEN_REVOKED",
            IamError::InvalidToken => "INVALID_TOKEN",
            IamError::AccessDenied { .. } => "ACCESS_DENIED",
            IamError::SessionNotFound { .. } => "SESSION_NOT_FOUND",
            IamError::SessionInactive { .. } => "SESSION_INACTIVE",
            IamError::PolicyEvaluation(_) => "POLICY_EVALUATION_ERROR",
            IamError::IdentityAlreadyExists { .. } => "IDENTITY_ALREADY_EXISTS",
            IamError::Conflict(_) => "CONFLICT",
            IamError::NotFound { .. } => "NOT_FOUND",
            IamError::RateLimited { .. } => "RATE_LIMITED",
            IamError::Infrastructure(_) => "INFRASTRUCTURE_ERROR",
        }
    }

    /// Structured context for logs and audit records. Never holds secrets.
    pub fn context(&self) -> BTreeMap<&'static str, String> {
        let mut ctx = BTreeMap::new();
        match self {
            IamError::Validation { field, message } => {
                ctx.insert("field", field.clone());
                ctx.insert("message", message.clone());
            }
            IamError::AccountInactive { status } => {
                ctx.insert("status", status.clone());
            }
            IamError::AccessDenied { resource, action } => {
                ctx.insert("resource", resource.clone());
                ctx.insert("action", action.clone());
            }
            IamError::SessionNotFound { session_id } | IamError::SessionInactive { session_id } => {
                ctx.insert("session_id", session_id.clone());
            }
            IamError::PolicyEvaluation(reason) => {
                ctx.insert("reason", reason.clone());
            }
            IamError::IdentityAlreadyExists { field } => {
                ctx.insert("field", field.clone());
            }
            IamError::NotFound { entity, id } => {
                ctx.insert("entity", entity.to_string());
                ctx.insert("id", id.clone());
            }
            IamError::RateLimited {
                retry_after_secs: Some(secs),
            } => {
                ctx.insert("retry_after_secs", secs.to_string());
            }
            _ => {}
        }
        ctx
    }
}

impl From<IamError> for AppError {
    fn from(err: IamError) -> Self {
        let code = err.code();
        match err {
            IamError::Validation { .. } => AppError::BadRequest(anyhow::anyhow!(err.to_string())),
            IamError::InvalidCredentials
            | IamError::AccountInactive { .. }
            | IamError::TokenExpired
            | IamError::TokenRevoked
            | IamError::InvalidToken
            | IamError::SessionInactive { .. } => AppError::Unauthorized(anyhow::anyhow!(code)),
            IamError::AccessDenied { .. } => AppError::Forbidden(anyhow::anyhow!(code)),
            IamError::SessionNotFound { .. } | IamError::NotFound { .. } => {
                AppError::NotFound(anyhow::anyhow!(code))
            }
            // Indeterminate policy outcomes are denials at the boundary.
            IamError::PolicyEvaluation(_) => AppError::Forbidden(anyhow::anyhow!("ACCESS_DENIED")),
            IamError::IdentityAlreadyExists { .. } | IamError::Conflict(_) => {
                AppError::Conflict(anyhow::anyhow!(code))
            }
            IamError::RateLimited { retry_after_secs } => {
                AppError::TooManyRequests(code.to_string(), retry_after_secs)
            }
            IamError::Infrastructure(e) => AppError::InternalError(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn codes_and_kinds_line_up() {
        assert_eq!(IamError::InvalidCredentials.code(), "INVALID_CREDENTIALS");
        assert_eq!(IamError::InvalidCredentials.kind(), ErrorKind::Authentication);
        assert_eq!(
            IamError::SessionNotFound {
                session_id: "s".into()
            }
            .kind(),
            ErrorKind::Session
        );
        assert_eq!(
            IamError::IdentityAlreadyExists {
                field: "username".into()
            }
            .code(),
            "IDENTITY_ALREADY_EXISTS"
        );
    }

    #[test]
    fn context_carries_fields() {
        let err = IamError::AccessDenied {
            resource: "workout".into(),
            action: "delete".into(),
        };
        let ctx = err.context();
        assert_eq!(ctx.get("resource").map(String::as_str), Some("workout"));
        assert_eq!(ctx.get("action").map(String::as_str), Some("delete"));
    }

    #[test]
    fn boundary_mapping_does_not_leak_infrastructure_details() {
        let err = IamError::Infrastructure(anyhow::anyhow!("signing key /etc/keys/private.pem"));
        let app: AppError = err.into();
        let (message, details) = app.public_message();
        assert_eq!(message, "Internal server error");
        assert!(details.is_none());
    }

    #[test]
    fn credential_failures_share_one_public_message() {
        let a: AppError = IamError::InvalidCredentials.into();
        let b: AppError = IamError::InvalidCredentials.into();
        assert_eq!(a.public_message(), b.public_message());
        assert_eq!(a.status_code(), service_core::axum::http::StatusCode::UNAUTHORIZED);
    }
}
