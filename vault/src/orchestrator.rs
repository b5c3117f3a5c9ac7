//! Connection orchestrator.
//!
//! [`VaultSession`] is the public entry point. It owns the session state
//! machine and the ambient credential environment behind one mutex, so
//! adapter calls for a session never interleave. A connect attempt runs
//! status, optional logout, configure, login, unlock and verify in order.
//! The ambient environment is restored when the attempt ends, whatever the
//! outcome.

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_common::{RetryPolicy, ShutdownSignal};
use secrecy::SecretString;
use tokio::sync::Mutex;
use tracing::{debug, info, instrument, warn};
use url::Url;
use uuid::Uuid;

use crate::binder::{BindMode, CliEnvironment, bind};
use crate::cli::{UnlockWith, VaultCli, VaultStatus};
use crate::config::VaultSessionConfig;
use crate::error::{ConnectStep, VaultError, VaultResult};
use crate::secret::Credential;
use crate::session::{CacheState, LockState, SessionMachine, SessionToken};

/// Source of the current time.
pub trait Clock: Send + Sync {
    /// Current instant.
    fn now(&self) -> DateTime<Utc>;
}

/// Wall clock.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Resolves a master password from a certificate thumbprint.
#[async_trait]
pub trait PasswordResolver: Send + Sync {
    /// Password protected by the certificate identified by `thumbprint`.
    async fn resolve(&self, thumbprint: &str) -> VaultResult<SecretString>;
}

/// How a locked vault is unlocked.
#[derive(Clone)]
pub enum UnlockMethod {
    /// Master password
    Password(SecretString),
    /// Previously issued session token
    SessionToken(SessionToken),
    /// Master password held by a certificate
    Certificate {
        /// Certificate thumbprint
        thumbprint: String,
    },
}

impl UnlockMethod {
    const fn kind(&self) -> &'static str {
        match self {
            Self::Password(_) => "password",
            Self::SessionToken(_) => "session",
            Self::Certificate { .. } => "certificate",
        }
    }
}

impl fmt::Debug for UnlockMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Password(_) => f.write_str("Password([REDACTED])"),
            Self::SessionToken(_) => f.write_str("SessionToken([REDACTED])"),
            Self::Certificate { thumbprint } => f
                .debug_struct("Certificate")
                .field("thumbprint", thumbprint)
                .finish(),
        }
    }
}

/// Options for [`VaultSession::connect`].
#[derive(Debug, Clone, Default)]
pub struct ConnectOptions {
    /// Reconnect even if already unlocked
    pub force: bool,
    /// Unlock after login; the session stays locked when `None`
    pub unlock: Option<UnlockMethod>,
    /// Override the configured unlock retry count
    pub unlock_retries: Option<u32>,
    /// How the credential is bound into the ambient environment
    pub bind_mode: BindMode,
}

impl ConnectOptions {
    /// Options that unlock with `method`.
    #[must_use]
    pub fn unlock_with(method: UnlockMethod) -> Self {
        Self {
            unlock: Some(method),
            ..Self::default()
        }
    }

    /// Set the force flag.
    #[must_use]
    pub const fn force(mut self, force: bool) -> Self {
        self.force = force;
        self
    }

    /// Set the unlock retry count.
    #[must_use]
    pub const fn with_unlock_retries(mut self, retries: u32) -> Self {
        self.unlock_retries = Some(retries);
        self
    }

    /// Set the bind mode.
    #[must_use]
    pub const fn with_bind_mode(mut self, mode: BindMode) -> Self {
        self.bind_mode = mode;
        self
    }
}

/// Outcome of a successful connect or unlock.
#[derive(Debug, Clone)]
pub struct ConnectResult {
    /// Lock state after the attempt
    pub state: LockState,
    /// Active session token, when unlocked
    pub session_token: Option<SessionToken>,
    /// Session expiry, when unlocked
    pub expires_at: Option<DateTime<Utc>>,
    /// The session was already unlocked and no adapter call was made
    pub short_circuited: bool,
}

impl ConnectResult {
    fn locked() -> Self {
        Self {
            state: LockState::LoggedInLocked,
            session_token: None,
            expires_at: None,
            short_circuited: false,
        }
    }

    fn unlocked(token: SessionToken, expires_at: DateTime<Utc>, short_circuited: bool) -> Self {
        Self {
            state: LockState::Unlocked,
            session_token: Some(token),
            expires_at: Some(expires_at),
            short_circuited,
        }
    }
}

/// Outcome of [`VaultSession::sync`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncOutcome {
    /// The adapter synchronized with the server
    Synced,
    /// Skipped inside the cool-down window
    Throttled,
}

struct SessionInner {
    machine: SessionMachine,
    env: CliEnvironment,
}

/// A vault session: connect, unlock, sync and lock through one adapter.
pub struct VaultSession<C> {
    cli: C,
    config: VaultSessionConfig,
    inner: Mutex<SessionInner>,
    shutdown: ShutdownSignal,
    resolver: Option<Arc<dyn PasswordResolver>>,
    clock: Arc<dyn Clock>,
}

impl<C: VaultCli> VaultSession<C> {
    /// Create a logged-out session.
    pub fn new(cli: C, config: VaultSessionConfig) -> Self {
        let machine = SessionMachine::new(config.sync_cooldown);
        Self {
            cli,
            config,
            inner: Mutex::new(SessionInner {
                machine,
                env: CliEnvironment::default(),
            }),
            shutdown: ShutdownSignal::never(),
            resolver: None,
            clock: Arc::new(SystemClock),
        }
    }

    /// Abort retry sequences when `shutdown` fires.
    #[must_use]
    pub fn with_shutdown(mut self, shutdown: ShutdownSignal) -> Self {
        self.shutdown = shutdown;
        self
    }

    /// Enable certificate unlock.
    #[must_use]
    pub fn with_password_resolver(mut self, resolver: Arc<dyn PasswordResolver>) -> Self {
        self.resolver = Some(resolver);
        self
    }

    /// Use `clock` instead of the wall clock.
    #[must_use]
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Start from an existing ambient environment.
    #[must_use]
    pub fn with_environment(self, env: CliEnvironment) -> Self {
        let mut inner = self.inner.into_inner();
        inner.env = env;
        Self {
            inner: Mutex::new(inner),
            ..self
        }
    }

    /// The underlying adapter.
    pub const fn cli(&self) -> &C {
        &self.cli
    }

    /// Session configuration.
    pub const fn config(&self) -> &VaultSessionConfig {
        &self.config
    }

    /// Connect with `credential` and leave the session in a defined state.
    ///
    /// When the session is already unlocked and `options.force` is unset,
    /// returns immediately without calling the adapter.
    ///
    /// # Errors
    ///
    /// Returns [`VaultError::StepFailed`] naming the failing step. The
    /// ambient environment has been restored by the time it is returned.
    #[instrument(
        skip_all,
        fields(
            attempt = %Uuid::new_v4(),
            client_id = credential.client_id(),
            force = options.force,
        )
    )]
    pub async fn connect(
        &self,
        credential: &Credential,
        options: ConnectOptions,
    ) -> VaultResult<ConnectResult> {
        let mut guard = self.inner.lock().await;
        let inner = &mut *guard;
        let now = self.clock.now();
        inner.machine.check_expiry(now);

        if !options.force {
            if let Some((token, expires_at)) = active_session(&inner.machine, now) {
                debug!("Session already unlocked");
                return Ok(ConnectResult::unlocked(token, expires_at, true));
            }
        }

        let binding = bind(&mut inner.env, credential, options.bind_mode);
        let result = self
            .connect_bound(&binding, &mut inner.machine, credential, &options)
            .await;
        binding.release();

        match &result {
            Ok(outcome) => info!(state = %outcome.state, "Connected to vault"),
            Err(e) => warn!(step = ?e.step(), error = %e, "Connect failed"),
        }
        result
    }

    async fn connect_bound(
        &self,
        env: &CliEnvironment,
        machine: &mut SessionMachine,
        credential: &Credential,
        options: &ConnectOptions,
    ) -> VaultResult<ConnectResult> {
        let status = self
            .cli
            .status(env, None)
            .await
            .map_err(|e| e.at_step(ConnectStep::Status))?;

        let mut logged_in = status.state != LockState::NotLoggedIn;
        if !logged_in {
            machine.logout();
        }
        if options.force && logged_in {
            info!("Logging out before forced reconnect");
            self.cli
                .logout(env)
                .await
                .map_err(|e| e.at_step(ConnectStep::Logout))?;
            machine.logout();
            logged_in = false;
        }

        let target = env.server_url.as_ref().unwrap_or_else(|| credential.server_url());
        if logged_in {
            if let Some(reported) = status.server_url.as_deref() {
                if !server_matches(Some(reported), target) {
                    return Err(VaultError::config(format!(
                        "already logged in to {reported}, not {target}; reconnect with force to switch servers"
                    ))
                    .at_step(ConnectStep::ConfigureServer));
                }
            }
            debug!("Already authenticated, skipping login");
            machine.record_login(true);
        } else {
            if server_matches(status.server_url.as_deref(), target) {
                debug!("Server URL already configured");
            } else {
                self.cli
                    .configure_server(env, target.as_str())
                    .await
                    .map_err(|e| e.at_step(ConnectStep::ConfigureServer))?;
            }
            let login = self.cli.login_api_key(env).await;
            machine.record_login(login.is_ok());
            login.map_err(|e| e.at_step(ConnectStep::Login))?;
        }

        match &options.unlock {
            Some(method) => {
                self.unlock_and_verify(env, machine, method, options.unlock_retries)
                    .await
            }
            None => {
                let status = self
                    .cli
                    .status(env, None)
                    .await
                    .map_err(|e| verification_failed(&e).at_step(ConnectStep::Verify))?;
                if status.state == LockState::LoggedInLocked {
                    Ok(ConnectResult::locked())
                } else {
                    Err(VaultError::verification(format!(
                        "expected locked after login, vault reports {}",
                        status.state
                    ))
                    .at_step(ConnectStep::Verify))
                }
            }
        }
    }

    /// Unlock an already authenticated session.
    ///
    /// A session that is already unlocked is returned as-is unless `force`
    /// is set.
    ///
    /// # Errors
    ///
    /// Returns [`VaultError::StepFailed`] at the unlock or verify step.
    #[instrument(skip(self, method), fields(method = method.kind()))]
    pub async fn unlock(&self, method: UnlockMethod, force: bool) -> VaultResult<ConnectResult> {
        let mut guard = self.inner.lock().await;
        let inner = &mut *guard;
        let now = self.clock.now();
        inner.machine.check_expiry(now);

        if !force {
            if let Some((token, expires_at)) = active_session(&inner.machine, now) {
                return Ok(ConnectResult::unlocked(token, expires_at, true));
            }
        }
        self.unlock_and_verify(&inner.env, &mut inner.machine, &method, None)
            .await
    }

    async fn unlock_and_verify(
        &self,
        env: &CliEnvironment,
        machine: &mut SessionMachine,
        method: &UnlockMethod,
        retries: Option<u32>,
    ) -> VaultResult<ConnectResult> {
        let policy = self.config.unlock_retry_policy(retries);
        let token = self
            .unlock_with_retry(env, method, &policy)
            .await
            .map_err(|e| e.at_step(ConnectStep::Unlock))?;

        let expires_at = machine
            .record_unlock(token.clone(), self.config.session_ttl, self.clock.now())
            .map_err(|e| e.at_step(ConnectStep::Unlock))?;

        let verified = match self.cli.status(env, Some(&token)).await {
            Ok(status) if status.state == LockState::Unlocked => Ok(()),
            Ok(status) => Err(VaultError::verification(format!(
                "expected unlocked after unlock, vault reports {}",
                status.state
            ))),
            Err(e) => Err(verification_failed(&e)),
        };
        if let Err(e) = verified {
            machine.force_relock();
            return Err(e.at_step(ConnectStep::Verify));
        }

        Ok(ConnectResult::unlocked(token, expires_at, false))
    }

    async fn unlock_with_retry(
        &self,
        env: &CliEnvironment,
        method: &UnlockMethod,
        policy: &RetryPolicy,
    ) -> VaultResult<SessionToken> {
        let password = match method {
            UnlockMethod::Certificate { thumbprint } => {
                let resolver = self.resolver.as_ref().ok_or_else(|| {
                    VaultError::config("certificate unlock requires a password resolver")
                })?;
                Some(resolver.resolve(thumbprint).await?)
            }
            _ => None,
        };
        let with = match (method, &password) {
            (UnlockMethod::Password(p), _) | (UnlockMethod::Certificate { .. }, Some(p)) => {
                UnlockWith::Password(p)
            }
            (UnlockMethod::SessionToken(t), _) => UnlockWith::Session(t),
            (UnlockMethod::Certificate { .. }, None) => {
                return Err(VaultError::config("certificate password was not resolved"));
            }
        };

        let mut shutdown = self.shutdown.clone();
        policy
            .execute_until(&mut shutdown, || self.cli.unlock(env, with))
            .await
    }

    /// Synchronize the vault, honouring the cool-down unless `force` is set.
    ///
    /// # Errors
    ///
    /// Returns [`VaultError::ExpiredSession`] if the session is not
    /// unlocked, the last [`VaultError::Sync`] once retries are exhausted, or
    /// [`VaultError::Verification`] if the sync succeeded but the follow-up
    /// status check did not.
    #[instrument(skip(self))]
    pub async fn sync(&self, force: bool) -> VaultResult<SyncOutcome> {
        let mut guard = self.inner.lock().await;
        let inner = &mut *guard;
        let now = self.clock.now();
        let token = require_token(&mut inner.machine, now)?;

        if inner.machine.throttle().should_skip(force, now) {
            debug!("Sync skipped inside cool-down window");
            return Ok(SyncOutcome::Throttled);
        }

        let env = &inner.env;
        let mut shutdown = self.shutdown.clone();
        self.config
            .sync_retry_policy()
            .execute_until(&mut shutdown, || self.cli.sync(env, &token, force))
            .await?;

        let now = self.clock.now();
        inner.machine.throttle_mut().record(now);

        match self.cli.status(&inner.env, Some(&token)).await {
            Ok(status) if status.state == LockState::Unlocked => {
                inner.machine.mark_cache_refreshed(now);
                info!("Vault synchronized");
                Ok(SyncOutcome::Synced)
            }
            Ok(status) => {
                if status.state == LockState::NotLoggedIn {
                    inner.machine.logout();
                } else {
                    inner.machine.force_relock();
                }
                Err(VaultError::verification(format!(
                    "expected unlocked after sync, vault reports {}",
                    status.state
                )))
            }
            Err(e) => Err(verification_failed(&e)),
        }
    }

    /// Lock the vault. The session is relocked even if the adapter fails.
    ///
    /// # Errors
    ///
    /// Returns the adapter error.
    #[instrument(skip(self))]
    pub async fn lock(&self) -> VaultResult<()> {
        let mut guard = self.inner.lock().await;
        let inner = &mut *guard;
        let result = self.cli.lock(&inner.env).await;
        inner.machine.force_relock();
        result
    }

    /// Log out. The session is reset even if the adapter fails.
    ///
    /// # Errors
    ///
    /// Returns the adapter error.
    #[instrument(skip(self))]
    pub async fn logout(&self) -> VaultResult<()> {
        let mut guard = self.inner.lock().await;
        let inner = &mut *guard;
        let result = self.cli.logout(&inner.env).await;
        inner.machine.logout();
        result
    }

    /// Ask the adapter for the current status and reconcile the session
    /// with it.
    ///
    /// # Errors
    ///
    /// Returns the adapter error.
    pub async fn refresh_status(&self) -> VaultResult<VaultStatus> {
        let mut guard = self.inner.lock().await;
        let inner = &mut *guard;
        let now = self.clock.now();
        inner.machine.check_expiry(now);
        let token = inner.machine.active_token(now).cloned();
        let status = self.cli.status(&inner.env, token.as_ref()).await?;

        match (status.state, inner.machine.effective_state(now)) {
            (LockState::NotLoggedIn, local) if local != LockState::NotLoggedIn => {
                inner.machine.logout();
            }
            (LockState::LoggedInLocked, LockState::Unlocked) => inner.machine.force_relock(),
            (LockState::LoggedInLocked | LockState::Unlocked, LockState::NotLoggedIn) => {
                inner.machine.record_login(true);
            }
            _ => {}
        }
        Ok(status)
    }

    /// The active session token.
    ///
    /// # Errors
    ///
    /// Returns [`VaultError::ExpiredSession`] if the session expired or was
    /// never unlocked.
    pub async fn session_token(&self) -> VaultResult<SessionToken> {
        let mut inner = self.inner.lock().await;
        let now = self.clock.now();
        require_token(&mut inner.machine, now)
    }

    /// Lock state, with expiry applied.
    pub async fn lock_state(&self) -> LockState {
        let mut inner = self.inner.lock().await;
        inner.machine.check_expiry(self.clock.now());
        inner.machine.state().lock_state()
    }

    /// Cache validity, with expiry applied.
    pub async fn cache_state(&self) -> CacheState {
        let mut inner = self.inner.lock().await;
        inner.machine.check_expiry(self.clock.now());
        inner.machine.cache()
    }

    /// Expiry of the active session.
    pub async fn expires_at(&self) -> Option<DateTime<Utc>> {
        let inner = self.inner.lock().await;
        active_session(&inner.machine, self.clock.now()).map(|(_, expires_at)| expires_at)
    }

    /// Snapshot of the ambient environment.
    pub async fn environment(&self) -> CliEnvironment {
        self.inner.lock().await.env.clone()
    }
}

fn active_session(
    machine: &SessionMachine,
    now: DateTime<Utc>,
) -> Option<(SessionToken, DateTime<Utc>)> {
    match machine.state() {
        crate::session::SessionState::Unlocked { token, expires_at } if now <= *expires_at => {
            Some((token.clone(), *expires_at))
        }
        _ => None,
    }
}

fn require_token(machine: &mut SessionMachine, now: DateTime<Utc>) -> VaultResult<SessionToken> {
    if machine.check_expiry(now) {
        return Err(VaultError::ExpiredSession("session token expired".to_string()));
    }
    machine.active_token(now).cloned().ok_or_else(|| {
        VaultError::ExpiredSession(format!("no active session, vault is {}", machine.state().lock_state()))
    })
}

fn server_matches(reported: Option<&str>, target: &Url) -> bool {
    reported
        .and_then(|url| Url::parse(url).ok())
        .is_some_and(|url| &url == target)
}

fn verification_failed(error: &VaultError) -> VaultError {
    VaultError::verification(format!("status check failed: {error}"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cli::{CliCall, MockVaultCli};
    use rust_common::ShutdownTrigger;
    use secrecy::ExposeSecret;
    use std::time::Duration;

    #[derive(Debug)]
    struct ManualClock(std::sync::Mutex<DateTime<Utc>>);

    impl ManualClock {
        fn new() -> Arc<Self> {
            Arc::new(Self(std::sync::Mutex::new(Utc::now())))
        }

        fn advance(&self, by: Duration) {
            let mut now = self.0.lock().unwrap();
            *now += chrono::Duration::from_std(by).unwrap();
        }
    }

    impl Clock for ManualClock {
        fn now(&self) -> DateTime<Utc> {
            *self.0.lock().unwrap()
        }
    }

    struct FixedResolver;

    #[async_trait]
    impl PasswordResolver for FixedResolver {
        async fn resolve(&self, thumbprint: &str) -> VaultResult<SecretString> {
            if thumbprint == "AB12" {
                Ok(SecretString::from("from-cert"))
            } else {
                Err(VaultError::config(format!("certificate {thumbprint} not found")))
            }
        }
    }

    fn credential() -> Credential {
        Credential::new("user.1", SecretString::from("s3cr3t"), "https://vault.example.com").unwrap()
    }

    fn password() -> ConnectOptions {
        ConnectOptions::unlock_with(UnlockMethod::Password(SecretString::from("master")))
    }

    fn session(cli: MockVaultCli) -> VaultSession<MockVaultCli> {
        VaultSession::new(cli, VaultSessionConfig::default())
    }

    fn original_env() -> CliEnvironment {
        CliEnvironment::new(
            Url::parse("https://a.example.com").unwrap(),
            "B",
            SecretString::from("C"),
        )
    }

    #[tokio::test]
    async fn test_connect_unlocks_with_future_expiry() {
        let session = session(MockVaultCli::new());
        let result = session.connect(&credential(), password()).await.unwrap();
        let done = Utc::now();

        assert_eq!(result.state, LockState::Unlocked);
        assert!(!result.short_circuited);
        assert!(result.expires_at.unwrap() > done);
        let token = session.session_token().await.unwrap();
        assert!(!token.secret().expose_secret().is_empty());
        assert!(token.matches(&result.session_token.unwrap()));
        assert_eq!(session.lock_state().await, LockState::Unlocked);

        let calls = session.cli().calls().await;
        assert_eq!(
            calls,
            vec![
                CliCall::Status { with_session: false },
                CliCall::ConfigureServer("https://vault.example.com/".to_string()),
                CliCall::Login { client_id: Some("user.1".to_string()) },
                CliCall::Unlock("password"),
                CliCall::Status { with_session: true },
            ]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_one_failed_unlock_then_success() {
        let session = session(MockVaultCli::new().failing_unlocks(1));
        let result = session
            .connect(&credential(), password().with_unlock_retries(3))
            .await
            .unwrap();

        assert_eq!(result.state, LockState::Unlocked);
        assert_eq!(session.cli().unlock_calls().await, 2);
        assert_eq!(session.lock_state().await, LockState::Unlocked);
    }

    #[tokio::test(start_paused = true)]
    async fn test_unlock_exhausts_retries_with_delay() {
        let session = session(MockVaultCli::new().failing_unlocks(10));
        let start = tokio::time::Instant::now();
        let err = session
            .connect(&credential(), password().with_unlock_retries(3))
            .await
            .unwrap_err();

        assert_eq!(session.cli().unlock_calls().await, 4);
        assert!(start.elapsed() >= Duration::from_secs(6));
        assert_eq!(err.step(), Some(ConnectStep::Unlock));
        assert!(matches!(err.root(), VaultError::Unlock(_)));
        assert_eq!(session.lock_state().await, LockState::LoggedInLocked);
    }

    #[tokio::test(start_paused = true)]
    async fn test_long_retry_delay_is_honoured() {
        let config = VaultSessionConfig::default().with_retry_delay(Duration::from_secs(60));
        let session = VaultSession::new(MockVaultCli::new().failing_unlocks(1), config);
        let start = tokio::time::Instant::now();
        session.connect(&credential(), password()).await.unwrap();

        assert!(start.elapsed() >= Duration::from_secs(60));
        assert_eq!(session.cli().unlock_calls().await, 2);
    }

    #[tokio::test]
    async fn test_second_connect_makes_no_adapter_calls() {
        let session = session(MockVaultCli::new());
        session.connect(&credential(), password()).await.unwrap();
        session.cli().clear_calls().await;

        let again = session.connect(&credential(), password()).await.unwrap();
        assert!(again.short_circuited);
        assert!(session.cli().calls().await.is_empty());
    }

    #[tokio::test]
    async fn test_forced_connect_logs_out_first() {
        let session = session(MockVaultCli::new());
        session.connect(&credential(), password()).await.unwrap();
        session.cli().clear_calls().await;

        let result = session
            .connect(&credential(), password().force(true))
            .await
            .unwrap();
        assert!(!result.short_circuited);
        assert_eq!(
            session.cli().calls().await,
            vec![
                CliCall::Status { with_session: false },
                CliCall::Logout,
                CliCall::Login { client_id: Some("user.1".to_string()) },
                CliCall::Unlock("password"),
                CliCall::Status { with_session: true },
            ]
        );
    }

    #[tokio::test]
    async fn test_already_logged_in_skips_login() {
        let cli = MockVaultCli::new()
            .with_state(LockState::LoggedInLocked)
            .with_server_url("https://vault.example.com");
        let session = session(cli);
        session.connect(&credential(), password()).await.unwrap();

        let cli = session.cli();
        assert_eq!(cli.count(|c| matches!(c, CliCall::Login { .. })).await, 0);
        assert_eq!(cli.count(|c| matches!(c, CliCall::ConfigureServer(_))).await, 0);
    }

    #[tokio::test]
    async fn test_logged_in_to_other_server_requires_force() {
        let cli = MockVaultCli::new()
            .with_state(LockState::LoggedInLocked)
            .with_server_url("https://other.example.com");
        let session = session(cli);
        let err = session.connect(&credential(), password()).await.unwrap_err();

        assert_eq!(err.step(), Some(ConnectStep::ConfigureServer));
        assert!(matches!(err.root(), VaultError::Configuration(msg) if msg.contains("force")));
        assert_eq!(session.cli().unlock_calls().await, 0);
        assert_eq!(
            session.cli().calls().await,
            vec![CliCall::Status { with_session: false }]
        );

        let result = session
            .connect(&credential(), password().force(true))
            .await
            .unwrap();
        assert_eq!(result.state, LockState::Unlocked);
        assert_eq!(
            session.cli().count(|c| *c == CliCall::ConfigureServer("https://vault.example.com/".to_string())).await,
            1
        );
    }

    #[tokio::test]
    async fn test_preserved_server_url_is_configured() {
        let ambient = CliEnvironment {
            server_url: Some(Url::parse("https://other.example.com").unwrap()),
            ..CliEnvironment::default()
        };
        let session = session(MockVaultCli::new()).with_environment(ambient.clone());
        let options = password().with_bind_mode(BindMode::PreserveExisting);
        session.connect(&credential(), options).await.unwrap();

        assert_eq!(
            session.cli().calls().await,
            vec![
                CliCall::Status { with_session: false },
                CliCall::ConfigureServer("https://other.example.com/".to_string()),
                CliCall::Login { client_id: Some("user.1".to_string()) },
                CliCall::Unlock("password"),
                CliCall::Status { with_session: true },
            ]
        );
        assert_eq!(session.environment().await, ambient);
    }

    #[tokio::test]
    async fn test_configure_skipped_when_server_matches() {
        let session = session(MockVaultCli::new().with_server_url("https://vault.example.com/"));
        session.connect(&credential(), password()).await.unwrap();
        assert_eq!(
            session.cli().count(|c| matches!(c, CliCall::ConfigureServer(_))).await,
            0
        );
    }

    #[tokio::test]
    async fn test_connect_without_unlock_stays_locked() {
        let session = session(MockVaultCli::new());
        let result = session
            .connect(&credential(), ConnectOptions::default())
            .await
            .unwrap();
        assert_eq!(result.state, LockState::LoggedInLocked);
        assert!(result.session_token.is_none());
        assert_eq!(session.cli().unlock_calls().await, 0);
        assert!(matches!(
            session.session_token().await,
            Err(VaultError::ExpiredSession(_))
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_rollback_after_unlock_failure() {
        let session = session(MockVaultCli::new().failing_unlocks(10)).with_environment(original_env());
        let err = session
            .connect(&credential(), password().with_unlock_retries(1))
            .await
            .unwrap_err();
        assert_eq!(err.step(), Some(ConnectStep::Unlock));
        assert_eq!(session.environment().await, original_env());
    }

    #[tokio::test]
    async fn test_environment_restored_after_success() {
        let session = session(MockVaultCli::new()).with_environment(original_env());
        session.connect(&credential(), password()).await.unwrap();
        assert_eq!(session.environment().await, original_env());
    }

    #[tokio::test]
    async fn test_configure_failure_is_not_retried() {
        let session = session(MockVaultCli::new().failing_configure("Invalid server URL."));
        let err = session.connect(&credential(), password()).await.unwrap_err();

        assert_eq!(err.step(), Some(ConnectStep::ConfigureServer));
        assert!(matches!(err.root(), VaultError::Configuration(_)));
        let cli = session.cli();
        assert_eq!(cli.count(|c| matches!(c, CliCall::ConfigureServer(_))).await, 1);
        assert_eq!(cli.count(|c| matches!(c, CliCall::Login { .. })).await, 0);
    }

    #[tokio::test]
    async fn test_login_failure_leaves_session_logged_out() {
        let session = session(MockVaultCli::new().failing_login("client_secret is invalid"));
        let err = session.connect(&credential(), password()).await.unwrap_err();
        assert_eq!(err.step(), Some(ConnectStep::Login));
        assert!(matches!(err.root(), VaultError::Authentication(_)));
        assert_eq!(session.lock_state().await, LockState::NotLoggedIn);
    }

    #[tokio::test]
    async fn test_adapter_unavailable_aborts_at_status() {
        let session = session(MockVaultCli::new().unavailable());
        let err = session.connect(&credential(), password()).await.unwrap_err();
        assert_eq!(err.step(), Some(ConnectStep::Status));
        assert!(matches!(err.root(), VaultError::AdapterUnavailable(_)));
        assert_eq!(session.cli().calls().await.len(), 1);
    }

    #[tokio::test]
    async fn test_verification_failure_is_distinct() {
        let cli = MockVaultCli::new()
            .with_state(LockState::LoggedInLocked)
            .with_status_override(LockState::LoggedInLocked);
        let session = session(cli);
        let err = session.connect(&credential(), password()).await.unwrap_err();

        assert_eq!(err.step(), Some(ConnectStep::Verify));
        assert!(matches!(err.root(), VaultError::Verification(_)));
        assert_eq!(session.cli().unlock_calls().await, 1);
        assert_eq!(session.lock_state().await, LockState::LoggedInLocked);
    }

    #[tokio::test]
    async fn test_session_expires_lazily() {
        let clock = ManualClock::new();
        let config = VaultSessionConfig::default().with_session_ttl(Duration::from_secs(60));
        let session = VaultSession::new(MockVaultCli::new(), config).with_clock(clock.clone());
        session.connect(&credential(), password()).await.unwrap();
        assert!(session.cache_state().await.last_refresh.is_none());

        clock.advance(Duration::from_secs(61));
        assert!(matches!(
            session.session_token().await,
            Err(VaultError::ExpiredSession(_))
        ));
        assert_eq!(session.lock_state().await, LockState::LoggedInLocked);

        session.cli().clear_calls().await;
        let result = session.connect(&credential(), password()).await.unwrap();
        assert!(!result.short_circuited);
        assert_eq!(session.cli().unlock_calls().await, 1);
    }

    #[tokio::test]
    async fn test_sync_throttled_within_cooldown() {
        let clock = ManualClock::new();
        let session = VaultSession::new(MockVaultCli::new(), VaultSessionConfig::default())
            .with_clock(clock.clone());
        session.connect(&credential(), password()).await.unwrap();

        assert_eq!(session.sync(false).await.unwrap(), SyncOutcome::Synced);
        assert!(session.cache_state().await.is_valid);
        clock.advance(Duration::from_secs(120));
        assert_eq!(session.sync(false).await.unwrap(), SyncOutcome::Throttled);
        assert_eq!(session.cli().sync_calls().await, 1);

        assert_eq!(session.sync(true).await.unwrap(), SyncOutcome::Synced);
        clock.advance(Duration::from_secs(301));
        assert_eq!(session.sync(false).await.unwrap(), SyncOutcome::Synced);
        assert_eq!(session.cli().sync_calls().await, 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_sync_retries_then_succeeds() {
        let session = session(MockVaultCli::new().failing_syncs(2));
        session.connect(&credential(), password()).await.unwrap();
        assert_eq!(session.sync(false).await.unwrap(), SyncOutcome::Synced);
        assert_eq!(session.cli().sync_calls().await, 3);
    }

    #[tokio::test]
    async fn test_status_failure_after_sync_is_verification() {
        let session = session(MockVaultCli::new().failing_status_after_sync());
        session.connect(&credential(), password()).await.unwrap();

        let err = session.sync(false).await.unwrap_err();
        assert!(matches!(err, VaultError::Verification(_)));
        assert_eq!(session.cli().sync_calls().await, 1);
        assert!(!session.cache_state().await.is_valid);
    }

    #[tokio::test]
    async fn test_logout_reported_after_sync_resets_session() {
        let session = session(MockVaultCli::new().logging_out_on_sync());
        session.connect(&credential(), password()).await.unwrap();

        let err = session.sync(false).await.unwrap_err();
        assert!(matches!(err, VaultError::Verification(_)));
        assert_eq!(session.lock_state().await, LockState::NotLoggedIn);
        assert!(!session.cache_state().await.is_valid);
    }

    #[tokio::test]
    async fn test_sync_requires_unlocked_session() {
        let session = session(MockVaultCli::new());
        assert!(matches!(
            session.sync(false).await,
            Err(VaultError::ExpiredSession(_))
        ));
        assert_eq!(session.cli().sync_calls().await, 0);
    }

    #[tokio::test]
    async fn test_shutdown_cancels_unlock_retries() {
        let (trigger, signal) = ShutdownTrigger::new();
        let session = session(MockVaultCli::new().failing_unlocks(10)).with_shutdown(signal);
        trigger.trigger();

        let err = session.connect(&credential(), password()).await.unwrap_err();
        assert!(err.is_cancelled());
        assert_eq!(err.step(), Some(ConnectStep::Unlock));
        assert_eq!(session.cli().unlock_calls().await, 0);
    }

    #[tokio::test]
    async fn test_certificate_unlock_uses_resolver() {
        let cli = MockVaultCli::new().with_password("from-cert");
        let session = session(cli).with_password_resolver(Arc::new(FixedResolver));
        let options = ConnectOptions::unlock_with(UnlockMethod::Certificate {
            thumbprint: "AB12".to_string(),
        });
        let result = session.connect(&credential(), options).await.unwrap();
        assert_eq!(result.state, LockState::Unlocked);
    }

    #[tokio::test]
    async fn test_certificate_unlock_without_resolver() {
        let session = session(MockVaultCli::new());
        let options = ConnectOptions::unlock_with(UnlockMethod::Certificate {
            thumbprint: "AB12".to_string(),
        });
        let err = session.connect(&credential(), options).await.unwrap_err();
        assert!(matches!(err.root(), VaultError::Configuration(_)));
        assert_eq!(session.cli().unlock_calls().await, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_session_token_unlock_after_lock() {
        let session = session(MockVaultCli::new());
        let token = session
            .connect(&credential(), password())
            .await
            .unwrap()
            .session_token
            .unwrap();

        session.lock().await.unwrap();
        assert_eq!(session.lock_state().await, LockState::LoggedInLocked);
        assert!(session.session_token().await.is_err());

        // The mock relocks too, so the old token no longer validates.
        let err = session
            .unlock(UnlockMethod::SessionToken(token), false)
            .await
            .unwrap_err();
        assert_eq!(err.step(), Some(ConnectStep::Unlock));

        let result = session
            .unlock(UnlockMethod::Password(SecretString::from("master")), false)
            .await
            .unwrap();
        assert_eq!(result.state, LockState::Unlocked);
    }

    #[tokio::test]
    async fn test_logout_resets_session() {
        let session = session(MockVaultCli::new());
        session.connect(&credential(), password()).await.unwrap();
        session.logout().await.unwrap();
        assert_eq!(session.lock_state().await, LockState::NotLoggedIn);
        assert_eq!(session.cli().lock_state().await, LockState::NotLoggedIn);
    }

    #[tokio::test]
    async fn test_refresh_status_reconciles_external_logout() {
        let session = session(MockVaultCli::new());
        session.connect(&credential(), password()).await.unwrap();
        session.cli().logout(&CliEnvironment::default()).await.unwrap();

        let status = session.refresh_status().await.unwrap();
        assert_eq!(status.state, LockState::NotLoggedIn);
        assert_eq!(session.lock_state().await, LockState::NotLoggedIn);
    }

    #[test]
    fn test_unlock_method_debug_redacts() {
        let debug = format!("{:?}", UnlockMethod::Password(SecretString::from("hunter2")));
        assert!(!debug.contains("hunter2"));
    }
}
