use serde::ser::SerializeStruct;
use serde::{Serialize, Serializer};
use thiserror::Error;

/// Failure taxonomy shared by every gateway operation.
#[derive(Debug, Error)]
pub enum GatewayError {
    #[error("Not connected to server")]
    NotConnected,

    #[error("Authentication failed: {0}")]
    AuthenticationFailed(String),

    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    #[error("Invalid auth method: {0}")]
    InvalidAuthMethod(String),

    #[error("Timed out: {0}")]
    Timeout(String),

    #[error("Remote command failed with exit code {code}: {stderr}")]
    RemoteCommandFailed { code: u32, stderr: String },

    #[error("Validation failed: {0}")]
    ValidationFailed(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Permission denied: {0}")]
    PermissionDenied(String),

    #[error("Stale index: {0}")]
    StaleIndex(String),

    #[error("Invalid parameters: {0}")]
    InvalidParams(String),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

impl GatewayError {
    /// Stable tag sent to the UI alongside the message.
    pub fn kind(&self) -> &'static str {
        match self {
            GatewayError::NotConnected => "NotConnected",
            GatewayError::AuthenticationFailed(_) => "AuthenticationFailed",
            GatewayError::ConnectionFailed(_) => "ConnectionFailed",
            GatewayError::InvalidAuthMethod(_) => "InvalidAuthMethod",
            GatewayError::Timeout(_) => "Timeout",
            GatewayError::RemoteCommandFailed { .. } => "RemoteCommandFailed",
            GatewayError::ValidationFailed(_) => "ValidationFailed",
            GatewayError::NotFound(_) => "NotFound",
            GatewayError::PermissionDenied(_) => "PermissionDenied",
            GatewayError::StaleIndex(_) => "StaleIndex",
            GatewayError::InvalidParams(_) => "InvalidParams",
            GatewayError::Storage(_) => "Storage",
            GatewayError::Internal(_) => "Internal",
        }
    }
}

impl From<sea_orm::DbErr> for GatewayError {
    fn from(err: sea_orm::DbErr) -> Self {
        GatewayError::Storage(err.to_string())
    }
}

impl From<serde_json::Error> for GatewayError {
    fn from(err: serde_json::Error) -> Self {
        GatewayError::InvalidParams(err.to_string())
    }
}

pub type GatewayResult<T> = Result<T, GatewayError>;

/// Error type returned across the command boundary.
#[derive(Debug)]
pub struct CommandError(GatewayError);

impl CommandError {
    pub fn inner(&self) -> &GatewayError {
        &self.0
    }
}

impl From<GatewayError> for CommandError {
    fn from(err: GatewayError) -> Self {
        CommandError(err)
    }
}

impl From<anyhow::Error> for CommandError {
    fn from(err: anyhow::Error) -> Self {
        CommandError(GatewayError::Internal(err))
    }
}

impl std::fmt::Display for CommandError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

// The UI only needs the tag and a readable message, not the error chain.
impl Serialize for CommandError {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let mut state = serializer.serialize_struct("CommandError", 2)?;
        state.serialize_field("kind", self.0.kind())?;
        state.serialize_field("message", &self.0.to_string())?;
        state.end()
    }
}

pub type CommandResult<T> = Result<T, CommandError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn command_error_serializes_kind_and_message() {
        let err = CommandError::from(GatewayError::StaleIndex("rule 3 changed".into()));
        let value = serde_json::to_value(&err).unwrap();
        assert_eq!(value["kind"], "StaleIndex");
        assert_eq!(value["message"], "Stale index: rule 3 changed");
    }

    #[test]
    fn remote_failure_message_carries_exit_code() {
        let err = GatewayError::RemoteCommandFailed {
            code: 127,
            stderr: "docker: command not found".into(),
        };
        assert_eq!(err.kind(), "RemoteCommandFailed");
        assert!(err.to_string().contains("127"));
    }
}
