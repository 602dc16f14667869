//! Client error taxonomy.

use thiserror::Error;

/// Errors surfaced by the debug client.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DebugError {
    /// A required session or precondition is missing.
    #[error("configuration error: {0}")]
    Configuration(String),

    /// The engine returned a failure envelope or a malformed message.
    #[error("protocol error: {0}")]
    Protocol(String),

    /// The transport was torn down before the operation could complete.
    #[error("debug session disposed")]
    Disposed,
}

impl DebugError {
    pub(crate) fn configuration(message: impl Into<String>) -> Self {
        Self::Configuration(message.into())
    }

    pub(crate) fn protocol(message: impl Into<String>) -> Self {
        Self::Protocol(message.into())
    }
}

/// Result alias used throughout the crate.
pub type DebugResult<T> = Result<T, DebugError>;

#[cfg(test)]
mod tests {
    use super::DebugError;

    #[test]
    fn messages_name_the_failure_kind() {
        assert_eq!(
            DebugError::configuration("no active session").to_string(),
            "configuration error: no active session"
        );
        assert_eq!(
            DebugError::protocol("bad frame").to_string(),
            "protocol error: bad frame"
        );
        assert_eq!(DebugError::Disposed.to_string(), "debug session disposed");
    }
}
