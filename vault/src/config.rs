//! Vault session configuration.

use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use chrono::{TimeDelta, Utc};
use rust_common::{RetryConfig, RetryPolicy};
use secrecy::SecretString;
use tracing::debug;

use crate::error::{VaultError, VaultResult};
use crate::secret::Credential;

const ENV_CLI_PATH: &str = "BW_CLI_PATH";
const ENV_SESSION_TTL_MINUTES: &str = "BW_SESSION_TTL_MINUTES";
const ENV_SYNC_COOLDOWN_SECS: &str = "BW_SYNC_COOLDOWN_SECS";
const ENV_UNLOCK_RETRIES: &str = "BW_UNLOCK_RETRIES";
const ENV_SYNC_RETRIES: &str = "BW_SYNC_RETRIES";
const ENV_RETRY_DELAY_SECS: &str = "BW_RETRY_DELAY_SECS";
const ENV_COMMAND_TIMEOUT_SECS: &str = "BW_COMMAND_TIMEOUT_SECS";
const ENV_APPDATA_DIR: &str = "BITWARDENCLI_APPDATA_DIR";

const ENV_SERVER_URL: &str = "BW_SERVER_URL";
const ENV_CLIENT_ID: &str = "BW_CLIENTID";
const ENV_CLIENT_SECRET: &str = "BW_CLIENTSECRET";
const ENV_PASSWORD: &str = "BW_PASSWORD";

/// Vault session configuration.
#[derive(Debug, Clone)]
pub struct VaultSessionConfig {
    /// Path to the vault client binary
    pub cli_path: PathBuf,
    /// Lifetime of an unlocked session
    pub session_ttl: Duration,
    /// Window in which a non-forced sync is skipped
    pub sync_cooldown: Duration,
    /// Additional unlock attempts after the first
    pub unlock_retries: u32,
    /// Additional sync attempts after the first
    pub sync_retries: u32,
    /// Fixed delay between attempts
    pub retry_delay: Duration,
    /// Deadline for a single vault client invocation
    pub command_timeout: Duration,
    /// Client data directory; the client's default when unset
    pub app_data_dir: Option<PathBuf>,
}

impl Default for VaultSessionConfig {
    fn default() -> Self {
        Self {
            cli_path: PathBuf::from("bw"),
            session_ttl: Duration::from_secs(30 * 60),
            sync_cooldown: Duration::from_secs(300),
            unlock_retries: 3,
            sync_retries: 3,
            retry_delay: Duration::from_secs(2),
            command_timeout: Duration::from_secs(60),
            app_data_dir: None,
        }
    }
}

impl VaultSessionConfig {
    /// Load configuration from the environment, reading `.env` first.
    ///
    /// # Errors
    ///
    /// Returns [`VaultError::Configuration`] if a variable is malformed.
    pub fn from_env() -> VaultResult<Self> {
        if let Ok(path) = dotenvy::dotenv() {
            debug!(path = %path.display(), "Loaded .env file");
        }
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Load configuration through `lookup`; absent variables keep defaults.
    ///
    /// # Errors
    ///
    /// Returns [`VaultError::Configuration`] if a variable is malformed or
    /// the session TTL is zero.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> VaultResult<Self> {
        let mut config = Self::default();

        if let Some(path) = lookup(ENV_CLI_PATH).filter(|v| !v.trim().is_empty()) {
            config.cli_path = PathBuf::from(path.trim());
        }
        if let Some(minutes) = parse_var::<u64>(&lookup, ENV_SESSION_TTL_MINUTES)? {
            let secs = minutes.checked_mul(60).ok_or_else(|| {
                VaultError::config(format!("{ENV_SESSION_TTL_MINUTES} is out of range: {minutes}"))
            })?;
            config.session_ttl = Duration::from_secs(secs);
        }
        if let Some(secs) = parse_var(&lookup, ENV_SYNC_COOLDOWN_SECS)? {
            config.sync_cooldown = Duration::from_secs(secs);
        }
        if let Some(n) = parse_var(&lookup, ENV_UNLOCK_RETRIES)? {
            config.unlock_retries = n;
        }
        if let Some(n) = parse_var(&lookup, ENV_SYNC_RETRIES)? {
            config.sync_retries = n;
        }
        if let Some(secs) = parse_var(&lookup, ENV_RETRY_DELAY_SECS)? {
            config.retry_delay = Duration::from_secs(secs);
        }
        if let Some(secs) = parse_var(&lookup, ENV_COMMAND_TIMEOUT_SECS)? {
            config.command_timeout = Duration::from_secs(secs);
        }
        if let Some(dir) = lookup(ENV_APPDATA_DIR).filter(|v| !v.trim().is_empty()) {
            config.app_data_dir = Some(PathBuf::from(dir));
        }

        config.validate()?;
        Ok(config)
    }

    /// Reject values no session can run with.
    ///
    /// # Errors
    ///
    /// Returns [`VaultError::Configuration`] for a zero session TTL or
    /// command timeout, or a TTL whose expiry cannot be represented.
    pub fn validate(&self) -> VaultResult<()> {
        if self.session_ttl.is_zero() {
            return Err(VaultError::config("session TTL must be greater than zero"));
        }
        TimeDelta::from_std(self.session_ttl)
            .ok()
            .and_then(|ttl| Utc::now().checked_add_signed(ttl))
            .ok_or_else(|| {
                VaultError::config(format!("session TTL {:?} is out of range", self.session_ttl))
            })?;
        if self.command_timeout.is_zero() {
            return Err(VaultError::config("command timeout must be greater than zero"));
        }
        Ok(())
    }

    /// Set the vault client binary.
    #[must_use]
    pub fn with_cli_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.cli_path = path.into();
        self
    }

    /// Set the session TTL.
    #[must_use]
    pub const fn with_session_ttl(mut self, ttl: Duration) -> Self {
        self.session_ttl = ttl;
        self
    }

    /// Set the sync cool-down window.
    #[must_use]
    pub const fn with_sync_cooldown(mut self, cooldown: Duration) -> Self {
        self.sync_cooldown = cooldown;
        self
    }

    /// Set the unlock retry count.
    #[must_use]
    pub const fn with_unlock_retries(mut self, retries: u32) -> Self {
        self.unlock_retries = retries;
        self
    }

    /// Set the sync retry count.
    #[must_use]
    pub const fn with_sync_retries(mut self, retries: u32) -> Self {
        self.sync_retries = retries;
        self
    }

    /// Set the delay between attempts.
    #[must_use]
    pub const fn with_retry_delay(mut self, delay: Duration) -> Self {
        self.retry_delay = delay;
        self
    }

    /// Set the per-invocation timeout.
    #[must_use]
    pub const fn with_command_timeout(mut self, timeout: Duration) -> Self {
        self.command_timeout = timeout;
        self
    }

    /// Set the client data directory.
    #[must_use]
    pub fn with_app_data_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.app_data_dir = Some(dir.into());
        self
    }

    /// Fixed-delay policy for unlock, overriding the retry count if given.
    #[must_use]
    pub fn unlock_retry_policy(&self, retries: Option<u32>) -> RetryPolicy {
        RetryPolicy::new(RetryConfig::fixed(
            retries.unwrap_or(self.unlock_retries),
            self.retry_delay,
        ))
    }

    /// Fixed-delay policy for sync.
    #[must_use]
    pub fn sync_retry_policy(&self) -> RetryPolicy {
        RetryPolicy::new(RetryConfig::fixed(self.sync_retries, self.retry_delay))
    }
}

fn parse_var<T: FromStr>(
    lookup: &impl Fn(&str) -> Option<String>,
    name: &str,
) -> VaultResult<Option<T>> {
    lookup(name)
        .map(|raw| {
            raw.trim()
                .parse()
                .map_err(|_| VaultError::config(format!("{name} must be a non-negative integer, got {raw:?}")))
        })
        .transpose()
}

/// Read the API-key credential from the environment.
///
/// # Errors
///
/// Returns [`VaultError::Configuration`] if a variable is missing or invalid.
pub fn credential_from_env() -> VaultResult<Credential> {
    credential_from_lookup(|name| std::env::var(name).ok())
}

/// Read the API-key credential through `lookup`.
///
/// # Errors
///
/// Returns [`VaultError::Configuration`] if a variable is missing or invalid.
pub fn credential_from_lookup(lookup: impl Fn(&str) -> Option<String>) -> VaultResult<Credential> {
    let require = |name: &str| {
        lookup(name).ok_or_else(|| VaultError::config(format!("{name} is not set")))
    };
    let server_url = require(ENV_SERVER_URL)?;
    let client_id = require(ENV_CLIENT_ID)?;
    let client_secret = SecretString::from(require(ENV_CLIENT_SECRET)?);
    Credential::new(client_id, client_secret, &server_url)
}

/// Master password from the environment, if set and non-empty.
#[must_use]
pub fn password_from_env() -> Option<SecretString> {
    std::env::var(ENV_PASSWORD)
        .ok()
        .filter(|v| !v.is_empty())
        .map(SecretString::from)
}
