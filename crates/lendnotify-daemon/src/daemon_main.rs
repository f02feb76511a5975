//! Long-running notification session.
//!
//! Connects to the push endpoint for the configured user, stores every
//! delivered message, and saves the store periodically and on Ctrl-C.
//!
//!   lendnotify-daemon --dev --user-id 1024
//!   lendnotify-daemon --config /etc/lendnotify.toml

use anyhow::Context;
use clap::Parser;
use lendnotify_daemon::{CliConfig, DaemonConfig, FileConfig, NotificationSession};
use std::path::PathBuf;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "lendnotify-daemon", version, about = "Equipment-lending notification session")]
struct Args {
    /// TOML config file.
    #[arg(long, env = "LENDNOTIFY_CONFIG")]
    config: Option<PathBuf>,

    /// Use the local development endpoint (ws://localhost:29578/ws).
    #[arg(long)]
    dev: bool,

    /// Host of the deployed front end, e.g. lend.campus.edu.
    #[arg(long, conflicts_with = "dev")]
    host: Option<String>,

    /// Use ws:// instead of wss:// with --host.
    #[arg(long, requires = "host")]
    insecure: bool,

    /// Explicit endpoint base URL; overrides --dev and --host.
    #[arg(long)]
    url: Option<String>,

    /// User id to connect as.
    #[arg(long, env = "LENDNOTIFY_USER_ID")]
    user_id: Option<String>,

    /// Session record to read the user id from on every connection attempt.
    #[arg(long, conflicts_with = "user_id")]
    session_file: Option<PathBuf>,

    /// Where the store is saved.
    #[arg(long, env = "LENDNOTIFY_STATE_FILE")]
    state_file: Option<PathBuf>,

    /// Drop the connection if a heartbeat goes unanswered this long.
    #[arg(long)]
    pong_timeout_secs: Option<u64>,
}

impl Args {
    fn cli_config(&self) -> CliConfig {
        CliConfig {
            dev: self.dev,
            host: self.host.clone(),
            insecure: self.insecure,
            url: self.url.clone(),
            user_id: self.user_id.clone(),
            session_file: self.session_file.clone(),
            state_file: self.state_file.clone(),
            pong_timeout_secs: self.pong_timeout_secs,
        }
    }
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("lendnotify=info".parse()?))
        .init();

    let args = Args::parse();
    let file = match &args.config {
        Some(path) => FileConfig::load(path)?,
        None => FileConfig::default(),
    };
    let config = DaemonConfig::resolve(&args.cli_config(), file)?;

    let session = NotificationSession::from_config(&config)
        .with_context(|| format!("loading {}", config.state_file.display()))?;
    info!(
        endpoint = %config.client.endpoint.base_url(),
        state_file = %config.state_file.display(),
        "starting notification session"
    );
    session
        .start()
        .await
        .context("connecting to the notification endpoint")?;

    let shutdown = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!(error = %e, "cannot listen for Ctrl-C, shutting down");
        }
        info!("shutting down");
    };
    session
        .run_until(shutdown, config.persist_interval, config.is_development())
        .await?;
    Ok(())
}
