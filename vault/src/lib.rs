//! Vault session manager.
//!
//! Drives an external vault client through its full credential lifecycle:
//! bind an API-key credential, configure the server, log in, unlock with
//! bounded retries, verify, and later sync, lock or log out. Secret material
//! is wiped as soon as each scoped use ends.
//!
//! ```no_run
//! use secrecy::SecretString;
//! use vault_session::{ConnectOptions, Credential, ProcessVaultCli, UnlockMethod, VaultSession, VaultSessionConfig};
//!
//! # async fn run() -> vault_session::VaultResult<()> {
//! let config = VaultSessionConfig::from_env()?;
//! let session = VaultSession::new(ProcessVaultCli::from_config(&config), config);
//! let credential = Credential::new("user.1", SecretString::from("s3cr3t"), "https://vault.example.com")?;
//! let options = ConnectOptions::unlock_with(UnlockMethod::Password(SecretString::from("master")));
//! let connected = session.connect(&credential, options).await?;
//! assert!(connected.session_token.is_some());
//! # Ok(())
//! # }
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod binder;
pub mod cli;
pub mod config;
pub mod error;
pub mod orchestrator;
pub mod secret;
pub mod session;

pub use binder::{BindMode, CliEnvironment, EnvironmentBinding, bind};
pub use cli::{MockVaultCli, ProcessVaultCli, VaultCli, VaultStatus};
pub use config::VaultSessionConfig;
pub use error::{ConnectStep, VaultError, VaultResult};
pub use orchestrator::{
    Clock, ConnectOptions, ConnectResult, PasswordResolver, SyncOutcome, SystemClock,
    UnlockMethod, VaultSession,
};
pub use secret::{Credential, with_secret};
pub use session::{CacheState, LockState, SessionMachine, SessionState, SessionToken};
