//! Session state machine.
//!
//! Owns the lock state, the active session token and its expiry, the cache
//! validity flag and the sync throttle. Expiry is lazy: it is evaluated when
//! the state is read, never by a background timer.

use std::fmt;
use std::time::Duration;

use chrono::{DateTime, Utc};
use secrecy::{ExposeSecret, SecretString};
use tracing::{debug, info};
use zeroize::Zeroizing;

use crate::error::{VaultError, VaultResult};

/// Opaque token proving the vault is unlocked.
#[derive(Clone)]
pub struct SessionToken(SecretString);

impl SessionToken {
    /// Wrap a raw token, rejecting empty or whitespace-only values.
    ///
    /// The untrimmed input is zeroed before returning.
    ///
    /// # Errors
    ///
    /// Returns [`VaultError::Unlock`] if the token is blank.
    pub fn new(raw: impl Into<String>) -> VaultResult<Self> {
        let raw = Zeroizing::new(raw.into());
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            return Err(VaultError::Unlock("vault client returned an empty session token".to_string()));
        }
        Ok(Self(SecretString::from(trimmed.to_string())))
    }

    /// The wrapped token.
    #[must_use]
    pub const fn secret(&self) -> &SecretString {
        &self.0
    }

    /// Constant-time comparison against another token.
    #[must_use]
    pub fn matches(&self, other: &Self) -> bool {
        use subtle::ConstantTimeEq;
        self.0
            .expose_secret()
            .as_bytes()
            .ct_eq(other.0.expose_secret().as_bytes())
            .into()
    }
}

impl fmt::Debug for SessionToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("SessionToken([REDACTED])")
    }
}

/// Lock state as reported by the vault client or derived from the session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockState {
    /// No account is authenticated
    NotLoggedIn,
    /// Authenticated, but secrets are not readable
    LoggedInLocked,
    /// Secrets are readable
    Unlocked,
}

impl fmt::Display for LockState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::NotLoggedIn => "not-logged-in",
            Self::LoggedInLocked => "locked",
            Self::Unlocked => "unlocked",
        })
    }
}

/// Authentication and lock state of the session.
#[derive(Debug, Clone, Default)]
pub enum SessionState {
    /// Initial and reset state
    #[default]
    LoggedOut,
    /// Logged in, unlock still required
    LoggedInLocked,
    /// Unlocked with a token valid until `expires_at`
    Unlocked {
        /// Active session token
        token: SessionToken,
        /// Instant after which the token must be treated as locked
        expires_at: DateTime<Utc>,
    },
}

impl SessionState {
    /// The lock state of the stored variant, ignoring expiry.
    #[must_use]
    pub const fn lock_state(&self) -> LockState {
        match self {
            Self::LoggedOut => LockState::NotLoggedIn,
            Self::LoggedInLocked => LockState::LoggedInLocked,
            Self::Unlocked { .. } => LockState::Unlocked,
        }
    }
}

/// Validity of locally cached vault data.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheState {
    /// Whether the cache reflects the server
    pub is_valid: bool,
    /// Last successful refresh
    pub last_refresh: Option<DateTime<Utc>>,
}

/// Cool-down applied to non-forced sync requests.
#[derive(Debug, Clone, Copy)]
pub struct SyncThrottle {
    /// Last successful sync
    pub last_sync: Option<DateTime<Utc>>,
    cooldown: Duration,
}

impl SyncThrottle {
    /// Create a throttle with the given cool-down window.
    #[must_use]
    pub const fn new(cooldown: Duration) -> Self {
        Self {
            last_sync: None,
            cooldown,
        }
    }

    /// Whether a sync requested at `now` should be skipped.
    #[must_use]
    pub fn should_skip(&self, force: bool, now: DateTime<Utc>) -> bool {
        if force {
            return false;
        }
        let Some(last) = self.last_sync else {
            return false;
        };
        match (now - last).to_std() {
            Ok(elapsed) => elapsed < self.cooldown,
            // Clock went backwards; stay conservative and sync.
            Err(_) => false,
        }
    }

    /// Record a completed sync.
    pub fn record(&mut self, now: DateTime<Utc>) {
        self.last_sync = Some(now);
    }
}

/// The session state machine. Transitions are the only mutators.
#[derive(Debug)]
pub struct SessionMachine {
    state: SessionState,
    cache: CacheState,
    throttle: SyncThrottle,
}

impl SessionMachine {
    /// Create a machine in [`SessionState::LoggedOut`].
    #[must_use]
    pub fn new(sync_cooldown: Duration) -> Self {
        Self {
            state: SessionState::LoggedOut,
            cache: CacheState::default(),
            throttle: SyncThrottle::new(sync_cooldown),
        }
    }

    /// The stored state. Callers that act on it should use
    /// [`effective_state`](Self::effective_state) instead.
    #[must_use]
    pub const fn state(&self) -> &SessionState {
        &self.state
    }

    /// Lock state at `now`, treating an expired unlock as locked.
    #[must_use]
    pub fn effective_state(&self, now: DateTime<Utc>) -> LockState {
        match &self.state {
            SessionState::Unlocked { expires_at, .. } if now > *expires_at => {
                LockState::LoggedInLocked
            }
            other => other.lock_state(),
        }
    }

    /// The session token if the session is unlocked and unexpired at `now`.
    #[must_use]
    pub fn active_token(&self, now: DateTime<Utc>) -> Option<&SessionToken> {
        match &self.state {
            SessionState::Unlocked { token, expires_at } if now <= *expires_at => Some(token),
            _ => None,
        }
    }

    /// Cache validity.
    #[must_use]
    pub const fn cache(&self) -> CacheState {
        self.cache
    }

    /// Sync throttle.
    #[must_use]
    pub const fn throttle(&self) -> &SyncThrottle {
        &self.throttle
    }

    /// Mutable sync throttle.
    pub fn throttle_mut(&mut self) -> &mut SyncThrottle {
        &mut self.throttle
    }

    /// `LoggedOut -> LoggedInLocked` on success; no change on failure or
    /// when already logged in.
    pub fn record_login(&mut self, success: bool) {
        if !success {
            debug!("Login failed, session state unchanged");
            return;
        }
        if matches!(self.state, SessionState::LoggedOut) {
            self.transition(SessionState::LoggedInLocked);
        }
    }

    /// Any state `-> Unlocked { token, now + ttl }`.
    ///
    /// # Errors
    ///
    /// Returns [`VaultError::Configuration`] if `ttl` is zero or too large
    /// to represent; the state is left unchanged.
    pub fn record_unlock(
        &mut self,
        token: SessionToken,
        ttl: Duration,
        now: DateTime<Utc>,
    ) -> VaultResult<DateTime<Utc>> {
        if ttl.is_zero() {
            return Err(VaultError::config("session TTL must be greater than zero"));
        }
        let expires_at = chrono::Duration::from_std(ttl)
            .ok()
            .and_then(|ttl| now.checked_add_signed(ttl))
            .ok_or_else(|| VaultError::config(format!("session TTL {ttl:?} is out of range")))?;
        let was_unlocked = matches!(self.state, SessionState::Unlocked { .. });
        self.transition(SessionState::Unlocked { token, expires_at });
        if !was_unlocked {
            self.cache = CacheState::default();
        }
        Ok(expires_at)
    }

    /// Force `Unlocked -> LoggedInLocked` once `now > expires_at`.
    ///
    /// Returns `true` if the session expired.
    pub fn check_expiry(&mut self, now: DateTime<Utc>) -> bool {
        match &self.state {
            SessionState::Unlocked { expires_at, .. } if now > *expires_at => {
                info!(%expires_at, "Session expired");
                self.transition(SessionState::LoggedInLocked);
                true
            }
            _ => false,
        }
    }

    /// Explicit relock. A logged-out session stays logged out.
    pub fn force_relock(&mut self) {
        if !matches!(self.state, SessionState::LoggedOut) {
            self.transition(SessionState::LoggedInLocked);
        }
    }

    /// Explicit logout or reset.
    pub fn logout(&mut self) {
        self.transition(SessionState::LoggedOut);
    }

    /// Mark the cache refreshed. Ignored unless unlocked at `now`.
    pub fn mark_cache_refreshed(&mut self, now: DateTime<Utc>) {
        if self.effective_state(now) == LockState::Unlocked {
            self.cache = CacheState {
                is_valid: true,
                last_refresh: Some(now),
            };
        }
    }

    fn transition(&mut self, next: SessionState) {
        let from = self.state.lock_state();
        let to = next.lock_state();
        if from != to {
            info!(%from, %to, "Session state transition");
        }
        if to != LockState::Unlocked {
            self.cache.is_valid = false;
        }
        self.state = next;
    }
}
