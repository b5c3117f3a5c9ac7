//! Vault session error types using thiserror 2.0.
//!
//! Provides the session-manager error taxonomy with retryability
//! classification and integration with platform common errors.

use rust_common::{PlatformError, Retryable};
use std::fmt;
use thiserror::Error;

/// Step of a connect sequence, reported when that step fails.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectStep {
    /// Initial status probe
    Status,
    /// Logout before a forced reconnect
    Logout,
    /// Server URL configuration
    ConfigureServer,
    /// API-key login
    Login,
    /// Unlock (including retries)
    Unlock,
    /// Final status verification
    Verify,
}

impl ConnectStep {
    /// Stable lowercase name used in logs and messages.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Status => "status",
            Self::Logout => "logout",
            Self::ConfigureServer => "configure-server",
            Self::Login => "login",
            Self::Unlock => "unlock",
            Self::Verify => "verify",
        }
    }
}

impl fmt::Display for ConnectStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Vault session errors.
#[derive(Error, Debug)]
pub enum VaultError {
    /// External vault client missing or not executable
    #[error("Vault client unavailable: {0}")]
    AdapterUnavailable(String),

    /// Server or local configuration rejected
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// API-key login failed
    #[error("Authentication failed: {0}")]
    Authentication(String),

    /// Unlock failed; carries the client's diagnostic text
    #[error("Unlock failed: {0}")]
    Unlock(String),

    /// Remote synchronization failed
    #[error("Sync failed: {0}")]
    Sync(String),

    /// Structured output from the vault client was malformed
    #[error("Malformed vault client output: {0}")]
    Parse(String),

    /// Post-operation status check disagreed with the expected state
    #[error("Verification failed: {0}")]
    Verification(String),

    /// No unexpired session is available
    #[error("Session expired: {0}")]
    ExpiredSession(String),

    /// A connect sequence failed at the named step
    #[error("Connect failed at {step} step: {source}")]
    StepFailed {
        /// The failing step
        step: ConnectStep,
        /// The underlying error
        #[source]
        source: Box<VaultError>,
    },

    /// Platform error
    #[error(transparent)]
    Platform(#[from] PlatformError),
}

/// Result type for vault session operations.
pub type VaultResult<T> = Result<T, VaultError>;

impl VaultError {
    /// Check if error is retryable.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Unlock(_) | Self::Sync(_) => true,
            Self::Platform(e) => e.is_retryable(),
            Self::StepFailed { source, .. } => source.is_retryable(),
            _ => false,
        }
    }

    /// Check if the error was caused by a shutdown signal.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        match self {
            Self::Platform(PlatformError::Cancelled(_)) => true,
            Self::StepFailed { source, .. } => source.is_cancelled(),
            _ => false,
        }
    }

    /// The failing connect step, if this error came from a connect sequence.
    #[must_use]
    pub const fn step(&self) -> Option<ConnectStep> {
        match self {
            Self::StepFailed { step, .. } => Some(*step),
            _ => None,
        }
    }

    /// The innermost error, unwrapping any step annotation.
    #[must_use]
    pub fn root(&self) -> &Self {
        match self {
            Self::StepFailed { source, .. } => source.root(),
            other => other,
        }
    }

    /// Annotate this error with the connect step it occurred in.
    #[must_use]
    pub fn at_step(self, step: ConnectStep) -> Self {
        Self::StepFailed {
            step,
            source: Box::new(self),
        }
    }

    /// Create a configuration error.
    #[must_use]
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Configuration(msg.into())
    }

    /// Create a parse error.
    #[must_use]
    pub fn parse(msg: impl Into<String>) -> Self {
        Self::Parse(msg.into())
    }

    /// Create a verification error.
    #[must_use]
    pub fn verification(msg: impl Into<String>) -> Self {
        Self::Verification(msg.into())
    }
}

impl Retryable for VaultError {
    fn is_retryable(&self) -> bool {
        Self::is_retryable(self)
    }
}

impl From<serde_json::Error> for VaultError {
    fn from(err: serde_json::Error) -> Self {
        Self::Parse(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_error_display() {
        let err = VaultError::Unlock("Invalid master password.".to_string());
        assert_eq!(err.to_string(), "Unlock failed: Invalid master password.");

        let err = VaultError::Authentication("client_id or client_secret is incorrect".to_string())
            .at_step(ConnectStep::Login);
        assert_eq!(
            err.to_string(),
            "Connect failed at login step: Authentication failed: client_id or client_secret is incorrect"
        );
    }

    #[test]
    fn test_retryable_errors() {
        assert!(VaultError::Unlock("locked".to_string()).is_retryable());
        assert!(VaultError::Sync("timeout".to_string()).is_retryable());
        assert!(VaultError::from(PlatformError::timeout("bw unlock", Duration::from_secs(1))).is_retryable());

        assert!(!VaultError::AdapterUnavailable("bw".to_string()).is_retryable());
        assert!(!VaultError::config("bad url").is_retryable());
        assert!(!VaultError::Authentication("nope".to_string()).is_retryable());
        assert!(!VaultError::parse("not json").is_retryable());
        assert!(!VaultError::verification("still locked").is_retryable());
        assert!(!VaultError::from(PlatformError::cancelled("shutdown")).is_retryable());
    }

    #[test]
    fn test_step_annotation() {
        let err = VaultError::Unlock("bad".to_string()).at_step(ConnectStep::Unlock);
        assert_eq!(err.step(), Some(ConnectStep::Unlock));
        assert!(matches!(err.root(), VaultError::Unlock(_)));
    }

    #[test]
    fn test_cancelled_through_step() {
        let err = VaultError::from(PlatformError::cancelled("shutdown")).at_step(ConnectStep::Unlock);
        assert!(err.is_cancelled());
    }

    #[test]
    fn test_from_serde_error() {
        let json_err = serde_json::from_str::<serde_json::Value>("{not json").unwrap_err();
        let vault_err: VaultError = json_err.into();
        assert!(matches!(vault_err, VaultError::Parse(_)));
    }
}
