//! Vault client adapter backed by the external command-line binary.
//!
//! Secrets reach the child through its environment. The copy held in the
//! [`Command`] environment map is the one copy outside a zeroed buffer; it is
//! dropped with the command once the child has been spawned and reaped.
//! Captured stdout is held in zeroed buffers, since `unlock --raw` prints the
//! session token there.

use std::io::ErrorKind;
use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use rust_common::PlatformError;
use secrecy::ExposeSecret;
use tokio::process::Command;
use tracing::{debug, error, instrument, trace};
use zeroize::Zeroizing;

use super::output::{CommandOutput, parse_status};
use super::{UnlockWith, VaultCli, VaultStatus};
use crate::binder::CliEnvironment;
use crate::config::VaultSessionConfig;
use crate::error::{VaultError, VaultResult};
use crate::secret::with_secret;
use crate::session::SessionToken;

const ENV_CLIENT_ID: &str = "BW_CLIENTID";
const ENV_CLIENT_SECRET: &str = "BW_CLIENTSECRET";
const ENV_PASSWORD: &str = "BW_PASSWORD";
const ENV_SESSION: &str = "BW_SESSION";
const ENV_APPDATA_DIR: &str = "BITWARDENCLI_APPDATA_DIR";

/// Drives the vault client binary as a subprocess.
#[derive(Debug, Clone)]
pub struct ProcessVaultCli {
    cli_path: PathBuf,
    app_data_dir: Option<PathBuf>,
    timeout: Duration,
}

impl ProcessVaultCli {
    /// Create an adapter for the binary at `cli_path`.
    pub fn new(cli_path: impl Into<PathBuf>) -> Self {
        Self {
            cli_path: cli_path.into(),
            app_data_dir: None,
            timeout: Duration::from_secs(60),
        }
    }

    /// Create an adapter from session configuration.
    #[must_use]
    pub fn from_config(config: &VaultSessionConfig) -> Self {
        Self {
            cli_path: config.cli_path.clone(),
            app_data_dir: config.app_data_dir.clone(),
            timeout: config.command_timeout,
        }
    }

    /// Set the per-invocation timeout.
    #[must_use]
    pub const fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Set the client's data directory.
    #[must_use]
    pub fn with_app_data_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.app_data_dir = Some(dir.into());
        self
    }

    /// Build a command that inherits none of the parent's vault variables.
    fn command(&self, args: &[&str]) -> Command {
        let mut command = Command::new(&self.cli_path);
        command.args(args).arg("--nointeraction");

        for name in [ENV_CLIENT_ID, ENV_CLIENT_SECRET, ENV_PASSWORD, ENV_SESSION] {
            command.env_remove(name);
        }
        if let Some(dir) = &self.app_data_dir {
            command.env(ENV_APPDATA_DIR, dir);
        }

        command
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        command
    }

    fn with_session(command: &mut Command, session: &SessionToken) {
        command.env(ENV_SESSION, session.secret().expose_secret());
    }

    /// Run `command` under the per-call timeout.
    async fn run(&self, operation: &'static str, mut command: Command) -> VaultResult<CommandOutput> {
        trace!(operation, "Spawning vault client");
        let output = match tokio::time::timeout(self.timeout, command.output()).await {
            Ok(Ok(output)) => output,
            Ok(Err(e)) if matches!(e.kind(), ErrorKind::NotFound | ErrorKind::PermissionDenied) => {
                error!(operation, error = %e, "Vault client cannot be executed");
                return Err(VaultError::AdapterUnavailable(format!(
                    "{}: {e}",
                    self.cli_path.display()
                )));
            }
            Ok(Err(e)) => {
                error!(operation, error = %e, "Failed to run vault client");
                return Err(PlatformError::from(e).into());
            }
            Err(_) => {
                error!(operation, timeout = ?self.timeout, "Vault client timed out");
                return Err(PlatformError::timeout(format!("vault client {operation}"), self.timeout).into());
            }
        };

        let output = CommandOutput {
            exit_code: output.status.code(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
            stdout: stdout_text(output.stdout),
        };
        debug!(operation, exit_code = ?output.exit_code, "Vault client finished");
        Ok(output)
    }
}

/// Decode captured stdout, zeroing the raw bytes.
fn stdout_text(bytes: Vec<u8>) -> Zeroizing<String> {
    let bytes = Zeroizing::new(bytes);
    Zeroizing::new(String::from_utf8_lossy(&bytes).into_owned())
}

#[async_trait]
impl VaultCli for ProcessVaultCli {
    #[instrument(skip_all)]
    async fn status(
        &self,
        _env: &CliEnvironment,
        session: Option<&SessionToken>,
    ) -> VaultResult<VaultStatus> {
        let mut command = self.command(&["status"]);
        if let Some(session) = session {
            Self::with_session(&mut command, session);
        }
        let output = self.run("status", command).await?;
        output.check(false).map_err(VaultError::Parse)?;
        parse_status(&output.stdout)
    }

    #[instrument(skip(self, _env))]
    async fn configure_server(&self, _env: &CliEnvironment, url: &str) -> VaultResult<()> {
        let output = self.run("config", self.command(&["config", "server", url])).await?;
        output.check(true).map_err(VaultError::Configuration)
    }

    #[instrument(skip_all, fields(client_id = env.client_id.as_deref().unwrap_or_default()))]
    async fn login_api_key(&self, env: &CliEnvironment) -> VaultResult<()> {
        let (Some(client_id), Some(client_secret)) = (&env.client_id, &env.client_secret) else {
            return Err(VaultError::Authentication(
                "client id and client secret must be bound before login".to_string(),
            ));
        };

        let mut command = self.command(&["login", "--apikey"]);
        command.env(ENV_CLIENT_ID, client_id);
        with_secret(client_secret, |plain| {
            command.env(ENV_CLIENT_SECRET, plain);
        })?;

        let output = self.run("login", command).await?;
        output.check(true).map_err(VaultError::Authentication)
    }

    #[instrument(skip_all, fields(method = with.kind()))]
    async fn unlock(&self, _env: &CliEnvironment, with: UnlockWith<'_>) -> VaultResult<SessionToken> {
        match with {
            UnlockWith::Password(password) => {
                let mut command = self.command(&["unlock", "--passwordenv", ENV_PASSWORD, "--raw"]);
                with_secret(password, |plain| {
                    command.env(ENV_PASSWORD, plain);
                })?;
                let output = self.run("unlock", command).await?;
                // stdout is the raw token; it is never scanned for markers.
                output.check(false).map_err(VaultError::Unlock)?;
                SessionToken::new(output.stdout.as_str())
            }
            UnlockWith::Session(token) => {
                let mut command = self.command(&["unlock", "--check"]);
                Self::with_session(&mut command, token);
                let output = self.run("unlock", command).await?;
                output.check(false).map_err(VaultError::Unlock)?;
                Ok(token.clone())
            }
        }
    }

    #[instrument(skip(self, _env, session))]
    async fn sync(
        &self,
        _env: &CliEnvironment,
        session: &SessionToken,
        force: bool,
    ) -> VaultResult<()> {
        let args: &[&str] = if force { &["sync", "--force"] } else { &["sync"] };
        let mut command = self.command(args);
        Self::with_session(&mut command, session);
        let output = self.run("sync", command).await?;
        output.check(true).map_err(VaultError::Sync)
    }

    #[instrument(skip_all)]
    async fn lock(&self, _env: &CliEnvironment) -> VaultResult<()> {
        let output = self.run("lock", self.command(&["lock"])).await?;
        output.check(false).map_err(VaultError::Authentication)
    }

    #[instrument(skip_all)]
    async fn logout(&self, _env: &CliEnvironment) -> VaultResult<()> {
        let output = self.run("logout", self.command(&["logout"])).await?;
        output.check(false).map_err(VaultError::Authentication)
    }
}
