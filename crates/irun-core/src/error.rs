//! Application error types with rich context

use std::path::PathBuf;
use thiserror::Error;

/// Result type alias using our Error type
pub type Result<T> = std::result::Result<T, Error>;

/// Message shown when the device agent cannot be reached
pub const NO_CONNECTION_MESSAGE: &str = "No connection to app; cannot sync changes";

/// Application error types organized by layer/domain
#[derive(Debug, Error)]
pub enum Error {
    // ─────────────────────────────────────────────────────────────
    // Common/Infrastructure Errors
    // ─────────────────────────────────────────────────────────────
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON parsing error: {0}")]
    Json(#[from] serde_json::Error),

    // ─────────────────────────────────────────────────────────────
    // Agent Connectivity Errors
    // ─────────────────────────────────────────────────────────────
    #[error("No connection to app; cannot sync changes ({message})")]
    AgentUnreachable { message: String },

    #[error("Device agent closed the connection without acknowledging")]
    NoAcknowledgement,

    #[error("Device agent rejected the patches")]
    PatchesRejected,

    // ─────────────────────────────────────────────────────────────
    // Wire Protocol Errors
    // ─────────────────────────────────────────────────────────────
    #[error("Agent protocol mismatch: {message}")]
    ProtocolMismatch { message: String },

    #[error("Agent protocol error: {message}")]
    Protocol { message: String },

    // ─────────────────────────────────────────────────────────────
    // Device / adb Errors
    // ─────────────────────────────────────────────────────────────
    #[error("adb not found. Set ANDROID_HOME or put 'adb' on your PATH.")]
    AdbNotFound,

    #[error("adb error: {message}")]
    Adb { message: String },

    #[error("Failed to spawn process: {reason}")]
    ProcessSpawn { reason: String },

    #[error("Device not found: {serial}")]
    DeviceNotFound { serial: String },

    // ─────────────────────────────────────────────────────────────
    // Build Artifact Errors
    // ─────────────────────────────────────────────────────────────
    #[error("Build artifact error at {path}: {message}")]
    Artifact { path: PathBuf, message: String },

    #[error("Invalid build info: {message}")]
    BuildInfo { message: String },

    #[error("Build failed: {message}")]
    BuildFailed { message: String },

    // ─────────────────────────────────────────────────────────────
    // Configuration Errors
    // ─────────────────────────────────────────────────────────────
    #[error("Configuration error: {message}")]
    Config { message: String },

    #[error("Invalid configuration: {message}")]
    ConfigInvalid { message: String },

    // ─────────────────────────────────────────────────────────────
    // Cache Errors
    // ─────────────────────────────────────────────────────────────
    #[error("Installed patch cache error: {message}")]
    Cache { message: String },
}

// ─────────────────────────────────────────────────────────────────
// Convenience Constructors
// ─────────────────────────────────────────────────────────────────

impl Error {
    pub fn agent_unreachable(message: impl Into<String>) -> Self {
        Self::AgentUnreachable {
            message: message.into(),
        }
    }

    pub fn protocol_mismatch(message: impl Into<String>) -> Self {
        Self::ProtocolMismatch {
            message: message.into(),
        }
    }

    pub fn protocol(message: impl Into<String>) -> Self {
        Self::Protocol {
            message: message.into(),
        }
    }

    pub fn adb(message: impl Into<String>) -> Self {
        Self::Adb {
            message: message.into(),
        }
    }

    pub fn artifact(path: impl Into<PathBuf>, message: impl Into<String>) -> Self {
        Self::Artifact {
            path: path.into(),
            message: message.into(),
        }
    }

    pub fn build_info(message: impl Into<String>) -> Self {
        Self::BuildInfo {
            message: message.into(),
        }
    }

    pub fn build_failed(message: impl Into<String>) -> Self {
        Self::BuildFailed {
            message: message.into(),
        }
    }

    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
        }
    }

    pub fn cache(message: impl Into<String>) -> Self {
        Self::Cache {
            message: message.into(),
        }
    }

    /// Classify an IO failure that happened while talking to the agent.
    ///
    /// Refused, reset, broken and timed-out connections all mean the app
    /// cannot be reached; anything else stays an IO error.
    pub fn from_agent_io(err: std::io::Error) -> Self {
        use std::io::ErrorKind;
        match err.kind() {
            ErrorKind::ConnectionRefused
            | ErrorKind::ConnectionReset
            | ErrorKind::ConnectionAborted
            | ErrorKind::NotConnected
            | ErrorKind::BrokenPipe
            | ErrorKind::TimedOut
            | ErrorKind::AddrNotAvailable => Self::agent_unreachable(err.to_string()),
            _ => Self::Io(err),
        }
    }

    /// True for failures that mean the agent could not be reached at all
    pub fn is_connectivity(&self) -> bool {
        matches!(self, Error::AgentUnreachable { .. })
    }

    /// Check if this is a recoverable error
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            Error::AgentUnreachable { .. }
                | Error::NoAcknowledgement
                | Error::PatchesRejected
                | Error::Protocol { .. }
                | Error::Adb { .. }
                | Error::Artifact { .. }
                | Error::BuildFailed { .. }
                | Error::Cache { .. }
        )
    }

    /// Check if this error should end the program
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Error::AdbNotFound | Error::ProcessSpawn { .. } | Error::ConfigInvalid { .. }
        )
    }
}

// ─────────────────────────────────────────────────────────────────
// Error Context Extensions
// ─────────────────────────────────────────────────────────────────

/// Extension trait for adding context to Results
pub trait ResultExt<T> {
    /// Add context to an error
    fn context(self, context: impl Into<String>) -> Result<T>;

    /// Add context with a closure (lazy evaluation)
    fn with_context<F>(self, f: F) -> Result<T>
    where
        F: FnOnce() -> String;
}

impl<T, E: Into<Error>> ResultExt<T> for std::result::Result<T, E> {
    fn context(self, context: impl Into<String>) -> Result<T> {
        self.map_err(|e| {
            let err = e.into();
            tracing::error!("{}: {:?}", context.into(), err);
            err
        })
    }

    fn with_context<F>(self, f: F) -> Result<T>
    where
        F: FnOnce() -> String,
    {
        self.map_err(|e| {
            let err = e.into();
            tracing::error!("{}: {:?}", f(), err);
            err
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::{Error as IoError, ErrorKind};

    #[test]
    fn test_error_display_messages() {
        let err = Error::agent_unreachable("connection refused");
        assert!(err.to_string().starts_with(NO_CONNECTION_MESSAGE));

        let err = Error::AdbNotFound;
        assert!(err.to_string().contains("adb not found"));
    }

    #[test]
    fn test_error_from_io() {
        let io_err = IoError::new(ErrorKind::NotFound, "file not found");
        let err: Error = io_err.into();
        assert!(matches!(err, Error::Io(_)));
    }

    #[test]
    fn test_agent_io_classification() {
        for kind in [
            ErrorKind::ConnectionRefused,
            ErrorKind::BrokenPipe,
            ErrorKind::ConnectionReset,
            ErrorKind::TimedOut,
        ] {
            let err = Error::from_agent_io(IoError::new(kind, "boom"));
            assert!(err.is_connectivity(), "{:?}", kind);
        }

        let err = Error::from_agent_io(IoError::new(ErrorKind::InvalidData, "bad"));
        assert!(matches!(err, Error::Io(_)));
    }

    #[test]
    fn test_error_is_fatal() {
        assert!(Error::AdbNotFound.is_fatal());
        assert!(!Error::agent_unreachable("x").is_fatal());
        assert!(!Error::PatchesRejected.is_fatal());
    }

    #[test]
    fn test_error_is_recoverable() {
        assert!(Error::agent_unreachable("x").is_recoverable());
        assert!(Error::NoAcknowledgement.is_recoverable());
        assert!(Error::artifact("/tmp/classes.dex", "unreadable").is_recoverable());
        assert!(Error::build_failed("exit status 1").is_recoverable());
        assert!(!Error::AdbNotFound.is_recoverable());
        assert!(!Error::protocol_mismatch("v3").is_recoverable());
    }

    #[test]
    fn test_artifact_error_mentions_path() {
        let err = Error::artifact("/out/reload-dex/debug/classes.dex", "permission denied");
        let text = err.to_string();
        assert!(text.contains("reload-dex"));
        assert!(text.contains("permission denied"));
    }
}
