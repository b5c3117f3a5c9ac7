//! Scripted in-memory vault client for testing.
//!
//! Models the client's observable behaviour closely enough to drive the
//! session end to end: it refuses server changes while logged in, reports
//! `locked` unless the caller presents the issued session token, and records
//! every call so tests can count adapter invocations.

use std::collections::VecDeque;

use async_trait::async_trait;
use secrecy::ExposeSecret;
use tokio::sync::RwLock;

use super::{UnlockWith, VaultCli, VaultStatus};
use crate::binder::CliEnvironment;
use crate::error::{VaultError, VaultResult};
use crate::session::{LockState, SessionToken};

/// One recorded adapter invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CliCall {
    /// `status`, with whether a session token was presented
    Status {
        /// A session token accompanied the call
        with_session: bool,
    },
    /// `config server <url>`
    ConfigureServer(String),
    /// `login --apikey`, with the client id seen in the environment
    Login {
        /// Bound client id
        client_id: Option<String>,
    },
    /// `unlock` by the named method
    Unlock(&'static str),
    /// `sync`
    Sync {
        /// `--force` was passed
        force: bool,
    },
    /// `lock`
    Lock,
    /// `logout`
    Logout,
}

#[derive(Debug)]
struct MockState {
    lock_state: LockState,
    server_url: Option<String>,
    token: String,
    password: Option<String>,
    unavailable: bool,
    unlock_failures: u32,
    sync_failures: u32,
    login_error: Option<String>,
    configure_error: Option<String>,
    status_override: Option<LockState>,
    status_errors: VecDeque<bool>,
    fail_status_after_sync: bool,
    logout_on_sync: bool,
    synced: bool,
    calls: Vec<CliCall>,
}

/// Scripted vault client.
#[derive(Debug)]
pub struct MockVaultCli {
    state: RwLock<MockState>,
}

impl Default for MockVaultCli {
    fn default() -> Self {
        Self::new()
    }
}

impl MockVaultCli {
    /// A client with no account logged in.
    #[must_use]
    pub fn new() -> Self {
        Self {
            state: RwLock::new(MockState {
                lock_state: LockState::NotLoggedIn,
                server_url: None,
                token: "mock-session-token".to_string(),
                password: None,
                unavailable: false,
                unlock_failures: 0,
                sync_failures: 0,
                login_error: None,
                configure_error: None,
                status_override: None,
                status_errors: VecDeque::new(),
                fail_status_after_sync: false,
                logout_on_sync: false,
                synced: false,
                calls: Vec::new(),
            }),
        }
    }

    fn edit(self, f: impl FnOnce(&mut MockState)) -> Self {
        let mut state = self.state.into_inner();
        f(&mut state);
        Self {
            state: RwLock::new(state),
        }
    }

    /// Start in the given lock state.
    #[must_use]
    pub fn with_state(self, lock_state: LockState) -> Self {
        self.edit(|s| s.lock_state = lock_state)
    }

    /// Start configured for `url`.
    #[must_use]
    pub fn with_server_url(self, url: impl Into<String>) -> Self {
        let url = url.into();
        self.edit(|s| s.server_url = Some(url))
    }

    /// Token issued by a successful password unlock.
    #[must_use]
    pub fn with_token(self, token: impl Into<String>) -> Self {
        let token = token.into();
        self.edit(|s| s.token = token)
    }

    /// Only this master password unlocks.
    #[must_use]
    pub fn with_password(self, password: impl Into<String>) -> Self {
        let password = password.into();
        self.edit(|s| s.password = Some(password))
    }

    /// Behave as if the binary is not installed.
    #[must_use]
    pub fn unavailable(self) -> Self {
        self.edit(|s| s.unavailable = true)
    }

    /// Fail the next `n` unlock attempts.
    #[must_use]
    pub fn failing_unlocks(self, n: u32) -> Self {
        self.edit(|s| s.unlock_failures = n)
    }

    /// Fail the next `n` sync attempts.
    #[must_use]
    pub fn failing_syncs(self, n: u32) -> Self {
        self.edit(|s| s.sync_failures = n)
    }

    /// Reject every login with `message`.
    #[must_use]
    pub fn failing_login(self, message: impl Into<String>) -> Self {
        let message = message.into();
        self.edit(|s| s.login_error = Some(message))
    }

    /// Reject every server configuration with `message`.
    #[must_use]
    pub fn failing_configure(self, message: impl Into<String>) -> Self {
        let message = message.into();
        self.edit(|s| s.configure_error = Some(message))
    }

    /// Always report `lock_state` from `status`.
    #[must_use]
    pub fn with_status_override(self, lock_state: LockState) -> Self {
        self.edit(|s| s.status_override = Some(lock_state))
    }

    /// Make `status` emit malformed output once a sync has completed.
    #[must_use]
    pub fn failing_status_after_sync(self) -> Self {
        self.edit(|s| s.fail_status_after_sync = true)
    }

    /// Drop the login once a sync has completed, as if the server revoked it.
    #[must_use]
    pub fn logging_out_on_sync(self) -> Self {
        self.edit(|s| s.logout_on_sync = true)
    }

    /// Script per-call `status` outcomes; `true` emits malformed output.
    #[must_use]
    pub fn with_status_errors(self, script: impl IntoIterator<Item = bool>) -> Self {
        let script: VecDeque<bool> = script.into_iter().collect();
        self.edit(|s| s.status_errors = script)
    }

    /// Every call made so far.
    pub async fn calls(&self) -> Vec<CliCall> {
        self.state.read().await.calls.clone()
    }

    /// Number of calls matching `predicate`.
    pub async fn count(&self, predicate: impl Fn(&CliCall) -> bool) -> usize {
        self.state.read().await.calls.iter().filter(|c| predicate(c)).count()
    }

    /// Number of unlock calls.
    pub async fn unlock_calls(&self) -> usize {
        self.count(|c| matches!(c, CliCall::Unlock(_))).await
    }

    /// Number of sync calls.
    pub async fn sync_calls(&self) -> usize {
        self.count(|c| matches!(c, CliCall::Sync { .. })).await
    }

    /// Current simulated lock state.
    pub async fn lock_state(&self) -> LockState {
        self.state.read().await.lock_state
    }

    /// Forget recorded calls.
    pub async fn clear_calls(&self) {
        self.state.write().await.calls.clear();
    }
}

fn not_installed() -> VaultError {
    VaultError::AdapterUnavailable("mock vault client is not installed".to_string())
}

#[async_trait]
impl VaultCli for MockVaultCli {
    async fn status(
        &self,
        _env: &CliEnvironment,
        session: Option<&SessionToken>,
    ) -> VaultResult<VaultStatus> {
        let mut s = self.state.write().await;
        s.calls.push(CliCall::Status {
            with_session: session.is_some(),
        });
        if s.unavailable {
            return Err(not_installed());
        }
        if s.status_errors.pop_front().unwrap_or(false) || (s.fail_status_after_sync && s.synced) {
            return Err(VaultError::parse("status output is not JSON: \"?\""));
        }

        let session_valid = session.is_some_and(|t| t.secret().expose_secret() == s.token);
        let state = s.status_override.unwrap_or(match s.lock_state {
            LockState::Unlocked if !session_valid => LockState::LoggedInLocked,
            other => other,
        });
        let raw = match state {
            LockState::NotLoggedIn => "unauthenticated",
            LockState::LoggedInLocked => "locked",
            LockState::Unlocked => "unlocked",
        };
        Ok(VaultStatus {
            state,
            server_url: s.server_url.clone(),
            user_email: None,
            last_sync: None,
            raw: format!("{{\"status\":\"{raw}\"}}"),
        })
    }

    async fn configure_server(&self, _env: &CliEnvironment, url: &str) -> VaultResult<()> {
        let mut s = self.state.write().await;
        s.calls.push(CliCall::ConfigureServer(url.to_string()));
        if s.unavailable {
            return Err(not_installed());
        }
        if let Some(message) = &s.configure_error {
            return Err(VaultError::Configuration(message.clone()));
        }
        if s.lock_state != LockState::NotLoggedIn {
            return Err(VaultError::Configuration(
                "Logout required before server config update.".to_string(),
            ));
        }
        s.server_url = Some(url.to_string());
        Ok(())
    }

    async fn login_api_key(&self, env: &CliEnvironment) -> VaultResult<()> {
        let mut s = self.state.write().await;
        s.calls.push(CliCall::Login {
            client_id: env.client_id.clone(),
        });
        if s.unavailable {
            return Err(not_installed());
        }
        if !env.has_api_key() {
            return Err(VaultError::Authentication("client_id or client_secret is missing".to_string()));
        }
        if let Some(message) = &s.login_error {
            return Err(VaultError::Authentication(message.clone()));
        }
        if s.lock_state != LockState::NotLoggedIn {
            return Err(VaultError::Authentication("You are already logged in.".to_string()));
        }
        s.lock_state = LockState::LoggedInLocked;
        Ok(())
    }

    async fn unlock(&self, _env: &CliEnvironment, with: UnlockWith<'_>) -> VaultResult<SessionToken> {
        let mut s = self.state.write().await;
        s.calls.push(CliCall::Unlock(with.kind()));
        if s.unavailable {
            return Err(not_installed());
        }
        if s.lock_state == LockState::NotLoggedIn {
            return Err(VaultError::Unlock("You are not logged in.".to_string()));
        }
        if s.unlock_failures > 0 {
            s.unlock_failures -= 1;
            return Err(VaultError::Unlock("Invalid master password.".to_string()));
        }
        match with {
            UnlockWith::Password(password) => {
                if s
                    .password
                    .as_deref()
                    .is_some_and(|expected| expected != password.expose_secret())
                {
                    return Err(VaultError::Unlock("Invalid master password.".to_string()));
                }
                s.lock_state = LockState::Unlocked;
                SessionToken::new(s.token.clone())
            }
            UnlockWith::Session(token) => {
                if s.lock_state == LockState::Unlocked && token.secret().expose_secret() == s.token {
                    Ok(token.clone())
                } else {
                    Err(VaultError::Unlock("Vault is locked.".to_string()))
                }
            }
        }
    }

    async fn sync(
        &self,
        _env: &CliEnvironment,
        session: &SessionToken,
        force: bool,
    ) -> VaultResult<()> {
        let mut s = self.state.write().await;
        s.calls.push(CliCall::Sync { force });
        if s.unavailable {
            return Err(not_installed());
        }
        if s.sync_failures > 0 {
            s.sync_failures -= 1;
            return Err(VaultError::Sync("Syncing failed: network error".to_string()));
        }
        if s.lock_state != LockState::Unlocked || session.secret().expose_secret() != s.token {
            return Err(VaultError::Sync("Vault is locked.".to_string()));
        }
        s.synced = true;
        if s.logout_on_sync {
            s.lock_state = LockState::NotLoggedIn;
        }
        Ok(())
    }

    async fn lock(&self, _env: &CliEnvironment) -> VaultResult<()> {
        let mut s = self.state.write().await;
        s.calls.push(CliCall::Lock);
        if s.unavailable {
            return Err(not_installed());
        }
        if s.lock_state == LockState::Unlocked {
            s.lock_state = LockState::LoggedInLocked;
        }
        Ok(())
    }

    async fn logout(&self, _env: &CliEnvironment) -> VaultResult<()> {
        let mut s = self.state.write().await;
        s.calls.push(CliCall::Logout);
        if s.unavailable {
            return Err(not_installed());
        }
        if s.lock_state == LockState::NotLoggedIn {
            return Err(VaultError::Authentication("You are not logged in.".to_string()));
        }
        s.lock_state = LockState::NotLoggedIn;
        Ok(())
    }
}
