//! Vault client adapter.
//!
//! [`VaultCli`] is the only seam through which the session talks to the
//! external vault client. [`ProcessVaultCli`] drives the real binary;
//! [`MockVaultCli`] is a scripted in-memory stand-in for tests.

mod mock;
mod output;
mod process;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use secrecy::SecretString;

use crate::binder::CliEnvironment;
use crate::error::VaultResult;
use crate::session::{LockState, SessionToken};

pub use mock::{CliCall, MockVaultCli};
pub use output::{CommandOutput, looks_like_error, parse_status};
pub use process::ProcessVaultCli;

/// Parsed result of a `status` call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VaultStatus {
    /// Lock state reported by the client
    pub state: LockState,
    /// Server the client is configured for
    pub server_url: Option<String>,
    /// Authenticated account, if any
    pub user_email: Option<String>,
    /// Last completed sync
    pub last_sync: Option<DateTime<Utc>>,
    /// Raw structured output
    pub raw: String,
}

/// How to unlock the vault.
#[derive(Debug, Clone, Copy)]
pub enum UnlockWith<'a> {
    /// Master password
    Password(&'a SecretString),
    /// Existing session token, validated rather than re-derived
    Session(&'a SessionToken),
}

impl UnlockWith<'_> {
    /// Short name for logs.
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::Password(_) => "password",
            Self::Session(_) => "session",
        }
    }
}

/// Typed operations of the external vault client.
///
/// Every implementation must report a failed or malformed invocation as an
/// error; none may silently succeed.
#[async_trait]
pub trait VaultCli: Send + Sync {
    /// Report authentication and lock state.
    async fn status(
        &self,
        env: &CliEnvironment,
        session: Option<&SessionToken>,
    ) -> VaultResult<VaultStatus>;

    /// Point the client at `url`.
    async fn configure_server(&self, env: &CliEnvironment, url: &str) -> VaultResult<()>;

    /// Log in with the API key held in `env`.
    async fn login_api_key(&self, env: &CliEnvironment) -> VaultResult<()>;

    /// Unlock and return a session token.
    async fn unlock(&self, env: &CliEnvironment, with: UnlockWith<'_>) -> VaultResult<SessionToken>;

    /// Synchronize with the server.
    async fn sync(
        &self,
        env: &CliEnvironment,
        session: &SessionToken,
        force: bool,
    ) -> VaultResult<()>;

    /// Lock the vault, keeping the login.
    async fn lock(&self, env: &CliEnvironment) -> VaultResult<()>;

    /// Log out.
    async fn logout(&self, env: &CliEnvironment) -> VaultResult<()>;
}
