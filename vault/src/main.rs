//! `vault-connect`: connect to the vault and report the outcome.
//!
//! Reads the credential from `BW_SERVER_URL`, `BW_CLIENTID` and
//! `BW_CLIENTSECRET`, and the master password from `BW_PASSWORD`.

use anyhow::Context;
use clap::Parser;
use rust_common::shutdown::trigger_on_ctrl_c;
use rust_common::{ShutdownTrigger, TracingConfig, init_tracing};
use secrecy::ExposeSecret;
use tracing::{error, info};
use vault_session::config::{credential_from_env, password_from_env};
use vault_session::{
    ConnectOptions, ProcessVaultCli, SyncOutcome, UnlockMethod, VaultSession, VaultSessionConfig,
};

/// Connect to the vault through the external client.
#[derive(Debug, Parser)]
#[allow(clippy::struct_excessive_bools)]
#[command(name = "vault-connect", version, about)]
struct Args {
    /// Reconnect even if the session is already unlocked
    #[arg(long)]
    force: bool,

    /// Stop after login and leave the vault locked
    #[arg(long)]
    no_unlock: bool,

    /// Synchronize the vault after connecting
    #[arg(long)]
    sync: bool,

    /// Write the session token to stdout
    #[arg(long)]
    print_session: bool,

    /// Emit logs as JSON
    #[arg(long)]
    json_logs: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let mut tracing_config = TracingConfig::default().with_service_name("vault-connect");
    if args.json_logs {
        tracing_config = tracing_config.with_json_output();
    }
    init_tracing(&tracing_config).context("failed to initialize tracing")?;

    let config = VaultSessionConfig::from_env().context("invalid configuration")?;
    let credential = credential_from_env().context("invalid credential")?;

    let mut options = ConnectOptions::default().force(args.force);
    if !args.no_unlock {
        let password = password_from_env().context("BW_PASSWORD is not set")?;
        options.unlock = Some(UnlockMethod::Password(password));
    }

    let (trigger, shutdown) = ShutdownTrigger::new();
    tokio::spawn(async move {
        if let Err(e) = trigger_on_ctrl_c(trigger).await {
            error!(error = %e, "Failed to listen for Ctrl+C");
        }
    });

    let session = VaultSession::new(ProcessVaultCli::from_config(&config), config)
        .with_shutdown(shutdown);

    let connected = match session.connect(&credential, options).await {
        Ok(connected) => connected,
        Err(e) => {
            error!(step = ?e.step(), error = %e, "Connect failed");
            return Err(e.into());
        }
    };
    info!(state = %connected.state, expires_at = ?connected.expires_at, "Connected");

    if args.sync {
        match session.sync(args.force).await? {
            SyncOutcome::Synced => info!("Vault synchronized"),
            SyncOutcome::Throttled => info!("Sync skipped inside cool-down window"),
        }
    }

    if args.print_session {
        if let Some(token) = &connected.session_token {
            println!("{}", token.secret().expose_secret());
        }
    }

    Ok(())
}
