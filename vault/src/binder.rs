//! Ambient credential environment and its scoped binding.
//!
//! The vault client reads its server URL and API key from environment
//! variables. Instead of mutating the process environment, the session owns a
//! [`CliEnvironment`] that the adapter applies to each child process.
//! [`bind`] installs a credential into it and returns an
//! [`EnvironmentBinding`] that restores the previous values when dropped.

use std::fmt;
use std::ops::Deref;

use secrecy::{ExposeSecret, SecretString};
use subtle::ConstantTimeEq;
use tracing::debug;
use url::Url;

use crate::secret::Credential;

/// Ambient configuration consumed by the vault client adapter.
#[derive(Clone, Default)]
pub struct CliEnvironment {
    /// Vault server URL
    pub server_url: Option<Url>,
    /// API client id
    pub client_id: Option<String>,
    /// API client secret
    pub client_secret: Option<SecretString>,
}

impl CliEnvironment {
    /// Environment with every value present.
    #[must_use]
    pub fn new(server_url: Url, client_id: impl Into<String>, client_secret: SecretString) -> Self {
        Self {
            server_url: Some(server_url),
            client_id: Some(client_id.into()),
            client_secret: Some(client_secret),
        }
    }

    /// Whether both API key values are present.
    #[must_use]
    pub const fn has_api_key(&self) -> bool {
        self.client_id.is_some() && self.client_secret.is_some()
    }
}

impl PartialEq for CliEnvironment {
    fn eq(&self, other: &Self) -> bool {
        let secrets_equal = match (&self.client_secret, &other.client_secret) {
            (Some(a), Some(b)) => bool::from(
                a.expose_secret()
                    .as_bytes()
                    .ct_eq(b.expose_secret().as_bytes()),
            ),
            (None, None) => true,
            _ => false,
        };
        self.server_url == other.server_url && self.client_id == other.client_id && secrets_equal
    }
}

impl Eq for CliEnvironment {}

impl fmt::Debug for CliEnvironment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CliEnvironment")
            .field("server_url", &self.server_url.as_ref().map(Url::as_str))
            .field("client_id", &self.client_id)
            .field(
                "client_secret",
                &self.client_secret.as_ref().map(|_| "[REDACTED]"),
            )
            .finish()
    }
}

/// How [`bind`] treats values that are already present.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum BindMode {
    /// Overwrite every value and restore the originals on release
    #[default]
    Overwrite,
    /// Leave present values untouched; only fill in missing ones
    PreserveExisting,
}

/// Values captured before a binding mutated the environment.
///
/// `None` means the field was not touched; `Some(previous)` means it was
/// overwritten and `previous` is restored on release.
#[derive(Default)]
struct EnvironmentSnapshot {
    server_url: Option<Option<Url>>,
    client_id: Option<Option<String>>,
    client_secret: Option<Option<SecretString>>,
}

/// Scoped credential binding. Dropping it restores the prior environment.
pub struct EnvironmentBinding<'a> {
    env: &'a mut CliEnvironment,
    snapshot: EnvironmentSnapshot,
}

/// Install `credential` into `env` for the lifetime of the returned binding.
pub fn bind<'a>(
    env: &'a mut CliEnvironment,
    credential: &Credential,
    mode: BindMode,
) -> EnvironmentBinding<'a> {
    let mut snapshot = EnvironmentSnapshot::default();
    let overwrite = |present: bool| mode == BindMode::Overwrite || !present;

    if overwrite(env.server_url.is_some()) {
        snapshot.server_url = Some(env.server_url.replace(credential.server_url().clone()));
    }
    if overwrite(env.client_id.is_some()) {
        snapshot.client_id = Some(env.client_id.replace(credential.client_id().to_string()));
    }
    if overwrite(env.client_secret.is_some()) {
        snapshot.client_secret = Some(env.client_secret.replace(credential.client_secret().clone()));
    }

    debug!(
        ?mode,
        server_url = snapshot.server_url.is_some(),
        client_id = snapshot.client_id.is_some(),
        client_secret = snapshot.client_secret.is_some(),
        "Bound credential environment"
    );

    EnvironmentBinding { env, snapshot }
}

impl EnvironmentBinding<'_> {
    /// Restore the prior environment now.
    pub fn release(self) {
        drop(self);
    }
}

impl Deref for EnvironmentBinding<'_> {
    type Target = CliEnvironment;

    fn deref(&self) -> &Self::Target {
        &*self.env
    }
}

impl Drop for EnvironmentBinding<'_> {
    fn drop(&mut self) {
        if let Some(previous) = self.snapshot.server_url.take() {
            self.env.server_url = previous;
        }
        if let Some(previous) = self.snapshot.client_id.take() {
            self.env.client_id = previous;
        }
        if let Some(previous) = self.snapshot.client_secret.take() {
            // The bound secret is dropped here, which zeroizes it.
            self.env.client_secret = previous;
        }
        debug!("Restored credential environment");
    }
}
