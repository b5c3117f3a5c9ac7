//! Vault client output handling.
//!
//! Exit codes are authoritative. Text scanning for error markers is a
//! fallback applied only to stderr of commands whose stdout never carries a
//! token.

use chrono::{DateTime, Utc};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::Deserialize;
use zeroize::Zeroizing;

use super::VaultStatus;
use crate::error::{VaultError, VaultResult};
use crate::session::LockState;

#[allow(clippy::expect_used)]
static ERROR_MARKER: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)\b(error|failed|not found|invalid|unauthorized)\b")
        .expect("error marker pattern is valid")
});

/// Output of one vault client invocation.
#[derive(Debug, Clone, Default)]
pub struct CommandOutput {
    /// Standard output from the command, zeroed on drop since `--raw`
    /// unlock prints the session token here
    pub stdout: Zeroizing<String>,
    /// Standard error from the command
    pub stderr: String,
    /// Exit code; `None` if the process was killed by a signal
    pub exit_code: Option<i32>,
}

impl CommandOutput {
    /// Returns true if the command exited with code 0
    #[must_use]
    pub fn success(&self) -> bool {
        self.exit_code == Some(0)
    }

    /// Returns the combined stdout and stderr, trimmed
    #[must_use]
    pub fn combined_output(&self) -> String {
        let stdout = self.stdout.trim();
        let stderr = self.stderr.trim();
        match (stdout.is_empty(), stderr.is_empty()) {
            (_, true) => stdout.to_string(),
            (true, false) => stderr.to_string(),
            (false, false) => format!("{stdout}\n{stderr}"),
        }
    }

    /// Diagnostic text for a failed invocation.
    #[must_use]
    pub fn diagnostic(&self) -> String {
        let text = self.combined_output();
        match (self.exit_code, text.is_empty()) {
            (Some(code), true) => format!("exited with code {code}"),
            (Some(code), false) => format!("exited with code {code}: {text}"),
            (None, true) => "terminated by signal".to_string(),
            (None, false) => format!("terminated by signal: {text}"),
        }
    }

    /// Check the invocation outcome.
    ///
    /// Fails on a non-zero or missing exit code. When `scan_stderr` is set, a
    /// zero exit whose stderr carries an error marker also fails.
    ///
    /// # Errors
    ///
    /// Returns the diagnostic text on failure.
    pub fn check(&self, scan_stderr: bool) -> Result<(), String> {
        if !self.success() {
            return Err(self.diagnostic());
        }
        if scan_stderr && looks_like_error(&self.stderr) {
            return Err(self.stderr.trim().to_string());
        }
        Ok(())
    }
}

/// Whether `text` contains a legacy error marker.
#[must_use]
pub fn looks_like_error(text: &str) -> bool {
    ERROR_MARKER.is_match(text)
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "lowercase")]
enum RawLockStatus {
    Unauthenticated,
    Locked,
    Unlocked,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawStatus {
    server_url: Option<String>,
    last_sync: Option<DateTime<Utc>>,
    user_email: Option<String>,
    status: RawLockStatus,
}

/// Parse the JSON emitted by `status`.
///
/// # Errors
///
/// Returns [`VaultError::Parse`] if the output is empty, not JSON, or
/// carries an unknown status value.
pub fn parse_status(stdout: &str) -> VaultResult<VaultStatus> {
    let raw = stdout.trim();
    // The client may print update notices before the JSON document.
    let json = raw
        .lines()
        .rev()
        .find(|line| line.trim_start().starts_with('{'))
        .ok_or_else(|| VaultError::parse(format!("status output is not JSON: {raw:?}")))?;

    let parsed: RawStatus = serde_json::from_str(json)?;
    let state = match parsed.status {
        RawLockStatus::Unauthenticated => LockState::NotLoggedIn,
        RawLockStatus::Locked => LockState::LoggedInLocked,
        RawLockStatus::Unlocked => LockState::Unlocked,
    };

    Ok(VaultStatus {
        state,
        server_url: parsed.server_url,
        user_email: parsed.user_email,
        last_sync: parsed.last_sync,
        raw: json.to_string(),
    })
}
