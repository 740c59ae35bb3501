pub mod commands;
pub mod responses;

pub use commands::{
    AssignRoleCommand, CreateIdentityCommand, CreateSessionCommand, GrantPermissionCommand,
    LoginCommand, RefreshSessionCommand, RevokeSessionCommand, ValidateAccessCommand,
};
pub use responses::{serialize_session, IdentityResponse, SessionResponse};

use validator::Validate;

use crate::services::IamError;

/// Runs the derive checks and reports the first failing field.
pub fn validate_command<T: Validate>(command: &T) -> Result<(), IamError> {
    command.validate().map_err(|errors| {
        let (field, message) = errors
            .field_errors()
            .into_iter()
            .min_by(|a, b| a.0.cmp(&b.0))
            .and_then(|(field, errs)| {
                errs.first().map(|e| {
                    let message = e
                        .message
                        .as_ref()
                        .map(|m| m.to_string())
                        .unwrap_or_else(|| e.code.to_string());
                    (field.to_string(), message)
                })
            })
            .unwrap_or_else(|| ("command".to_string(), errors.to_string()));
        IamError::validation(field, message)
    })
}
