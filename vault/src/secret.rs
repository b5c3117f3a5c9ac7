//! Scoped access to secret material.
//!
//! Plaintext is only ever visible inside a closure passed to [`with_secret`]
//! or [`with_secret_in`]. The scratch buffer holding the copy is wiped on every
//! exit path, including unwinding, by a drop guard.

use std::fmt;

use secrecy::{ExposeSecret, SecretString};
use url::Url;
use zeroize::{Zeroize, Zeroizing};

use crate::error::{VaultError, VaultResult};

/// Wipes the borrowed buffer when dropped.
struct WipeGuard<'a> {
    buf: &'a mut [u8],
}

impl Drop for WipeGuard<'_> {
    fn drop(&mut self) {
        self.buf.zeroize();
    }
}

/// Expose `secret` to `f` through a caller-provided scratch buffer.
///
/// The whole of `scratch` is zeroed after `f` returns or panics.
///
/// # Errors
///
/// Returns [`PlatformError::InvalidInput`](rust_common::PlatformError) if
/// `scratch` is smaller than the secret.
pub fn with_secret_in<T>(
    secret: &SecretString,
    scratch: &mut [u8],
    f: impl FnOnce(&str) -> T,
) -> VaultResult<T> {
    let bytes = secret.expose_secret().as_bytes();
    let len = bytes.len();
    if scratch.len() < len {
        return Err(rust_common::PlatformError::invalid_input(format!(
            "scratch buffer of {} bytes cannot hold a {len}-byte secret",
            scratch.len()
        ))
        .into());
    }

    let mut guard = WipeGuard { buf: scratch };
    guard.buf[..len].copy_from_slice(bytes);
    let plaintext = std::str::from_utf8(&guard.buf[..len])
        .map_err(|e| VaultError::Platform(rust_common::PlatformError::Internal(e.to_string())))?;
    Ok(f(plaintext))
}

/// Expose `secret` to `f` through a freshly allocated, self-wiping buffer.
///
/// # Errors
///
/// Only fails if the secret cannot be copied, which indicates a bug.
pub fn with_secret<T>(secret: &SecretString, f: impl FnOnce(&str) -> T) -> VaultResult<T> {
    let mut scratch = Zeroizing::new(vec![0u8; secret.expose_secret().len()]);
    with_secret_in(secret, &mut scratch, f)
}

/// API-key credential for one connect attempt.
#[derive(Clone)]
pub struct Credential {
    client_id: String,
    client_secret: SecretString,
    server_url: Url,
}

impl Credential {
    /// Create a credential, validating the id and server URL.
    ///
    /// # Errors
    ///
    /// Returns [`VaultError::Configuration`] for an empty client id or secret,
    /// or a server URL that is not absolute http(s).
    pub fn new(
        client_id: impl Into<String>,
        client_secret: SecretString,
        server_url: &str,
    ) -> VaultResult<Self> {
        let client_id = client_id.into();
        if client_id.trim().is_empty() {
            return Err(VaultError::config("client id must not be empty"));
        }
        if client_secret.expose_secret().is_empty() {
            return Err(VaultError::config("client secret must not be empty"));
        }
        let server_url = Url::parse(server_url)
            .map_err(|e| VaultError::config(format!("invalid server URL {server_url:?}: {e}")))?;
        if !matches!(server_url.scheme(), "http" | "https") {
            return Err(VaultError::config(format!(
                "server URL must use http or https, got {}",
                server_url.scheme()
            )));
        }
        Ok(Self {
            client_id,
            client_secret,
            server_url,
        })
    }

    /// The API client id.
    #[must_use]
    pub fn client_id(&self) -> &str {
        &self.client_id
    }

    /// The API client secret, still wrapped.
    #[must_use]
    pub const fn client_secret(&self) -> &SecretString {
        &self.client_secret
    }

    /// The vault server URL.
    #[must_use]
    pub const fn server_url(&self) -> &Url {
        &self.server_url
    }
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credential")
            .field("client_id", &self.client_id)
            .field("client_secret", &"[REDACTED]")
            .field("server_url", &self.server_url.as_str())
            .finish()
    }
}
