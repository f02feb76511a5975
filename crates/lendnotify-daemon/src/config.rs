//! Daemon configuration.
//!
//! Values come from an optional TOML file; command-line flags win over the
//! file, and built-in defaults fill the rest.
//!
//! ```toml
//! [endpoint]
//! host = "lend.campus.edu"
//! secure = true
//!
//! [identity]
//! session_file = "/var/lib/lendnotify/session.json"
//!
//! [store]
//! state_file = "/var/lib/lendnotify/state.json"
//! persist_interval_secs = 30
//!
//! [connection]
//! max_reconnect_attempts = 5
//! pong_timeout_secs = 10
//! ```

use anyhow::{Context, Result, bail};
use lendnotify_client::{ClientConfig, Endpoint};
use lendnotify_core::{IdentityProvider, SessionRecordIdentity, StaticIdentity, UserId};
use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

pub const DEFAULT_STATE_FILE: &str = "lendnotify-state.json";
pub const DEFAULT_PERSIST_INTERVAL: Duration = Duration::from_secs(30);

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct FileConfig {
    pub endpoint: EndpointFileConfig,
    pub identity: IdentityFileConfig,
    pub store: StoreFileConfig,
    pub connection: ConnectionFileConfig,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct EndpointFileConfig {
    pub dev: Option<bool>,
    pub host: Option<String>,
    pub secure: Option<bool>,
    pub url: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct IdentityFileConfig {
    pub user_id: Option<String>,
    pub session_file: Option<PathBuf>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct StoreFileConfig {
    pub state_file: Option<PathBuf>,
    pub persist_interval_secs: Option<u64>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ConnectionFileConfig {
    pub heartbeat_interval_secs: Option<u64>,
    pub reconnect_interval_ms: Option<u64>,
    pub max_reconnect_attempts: Option<u32>,
    pub open_timeout_secs: Option<u64>,
    pub pong_timeout_secs: Option<u64>,
}

impl FileConfig {
    pub fn load(path: &Path) -> Result<Self> {
        let text = fs::read_to_string(path)
            .with_context(|| format!("reading config file {}", path.display()))?;
        Self::parse(&text).with_context(|| format!("parsing config file {}", path.display()))
    }

    pub fn parse(text: &str) -> Result<Self> {
        Ok(toml::from_str(text)?)
    }
}

/// Flags that can override the file.
#[derive(Debug, Clone, Default)]
pub struct CliConfig {
    pub dev: bool,
    pub host: Option<String>,
    pub insecure: bool,
    pub url: Option<String>,
    pub user_id: Option<String>,
    pub session_file: Option<PathBuf>,
    pub state_file: Option<PathBuf>,
    pub pong_timeout_secs: Option<u64>,
}

/// Where the daemon gets the signed-in user from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IdentitySource {
    Fixed(UserId),
    SessionFile(PathBuf),
    Missing,
}

impl IdentitySource {
    pub fn provider(&self) -> Arc<dyn IdentityProvider> {
        match self {
            IdentitySource::Fixed(id) => Arc::new(StaticIdentity::new(id.clone())),
            IdentitySource::SessionFile(path) => Arc::new(SessionFileIdentity::new(path.clone())),
            IdentitySource::Missing => Arc::new(StaticIdentity::none()),
        }
    }
}

#[derive(Debug, Clone)]
pub struct DaemonConfig {
    pub client: ClientConfig,
    pub identity: IdentitySource,
    pub state_file: PathBuf,
    pub persist_interval: Duration,
}

impl DaemonConfig {
    pub fn resolve(cli: &CliConfig, file: FileConfig) -> Result<Self> {
        let endpoint = resolve_endpoint(cli, &file.endpoint)?;

        let user_id = cli.user_id.clone().or(file.identity.user_id);
        let identity = match (user_id, cli.session_file.clone().or(file.identity.session_file)) {
            (Some(id), _) => IdentitySource::Fixed(
                id.parse()
                    .with_context(|| format!("invalid user id {id:?}"))?,
            ),
            (None, Some(path)) => IdentitySource::SessionFile(path),
            (None, None) => IdentitySource::Missing,
        };

        let conn = file.connection;
        let defaults = ClientConfig::default();
        let client = ClientConfig {
            endpoint,
            heartbeat_interval: conn
                .heartbeat_interval_secs
                .map_or(defaults.heartbeat_interval, Duration::from_secs),
            reconnect_interval: conn
                .reconnect_interval_ms
                .map_or(defaults.reconnect_interval, Duration::from_millis),
            max_reconnect_attempts: conn
                .max_reconnect_attempts
                .unwrap_or(defaults.max_reconnect_attempts),
            open_timeout: conn
                .open_timeout_secs
                .map_or(defaults.open_timeout, Duration::from_secs),
            pong_timeout: cli
                .pong_timeout_secs
                .or(conn.pong_timeout_secs)
                .filter(|secs| *secs > 0)
                .map(Duration::from_secs),
        };
        if client.heartbeat_interval.is_zero() {
            bail!("heartbeat interval must be greater than zero");
        }

        let state_file = cli
            .state_file
            .clone()
            .or(file.store.state_file)
            .unwrap_or_else(|| PathBuf::from(DEFAULT_STATE_FILE));
        let persist_interval = file
            .store
            .persist_interval_secs
            .filter(|secs| *secs > 0)
            .map_or(DEFAULT_PERSIST_INTERVAL, Duration::from_secs);

        Ok(Self {
            client,
            identity,
            state_file,
            persist_interval,
        })
    }

    pub fn is_development(&self) -> bool {
        self.client.endpoint == Endpoint::Development
    }
}

fn resolve_endpoint(cli: &CliConfig, file: &EndpointFileConfig) -> Result<Endpoint> {
    if let Some(url) = cli.url.clone().or_else(|| file.url.clone()) {
        return Ok(Endpoint::Custom(url));
    }
    if cli.dev || file.dev.unwrap_or(false) {
        return Ok(Endpoint::Development);
    }
    match cli.host.clone().or_else(|| file.host.clone()) {
        Some(host) => Ok(Endpoint::Deployed {
            host,
            secure: !cli.insecure && file.secure.unwrap_or(true),
        }),
        None => bail!("no endpoint configured: pass --dev, --host or --url, or set [endpoint]"),
    }
}

/// Reads the session store's persisted record on every lookup, so a login
/// or logout on disk is picked up by the next connection attempt.
#[derive(Debug, Clone)]
pub struct SessionFileIdentity {
    path: PathBuf,
}

impl SessionFileIdentity {
    pub fn new(path: PathBuf) -> Self {
        Self { path }
    }
}

impl IdentityProvider for SessionFileIdentity {
    fn user_id(&self) -> Option<UserId> {
        let text = match fs::read_to_string(&self.path) {
            Ok(text) => text,
            Err(e) => {
                debug!(path = %self.path.display(), error = %e, "session file unreadable");
                return None;
            }
        };
        match SessionRecordIdentity::from_json(&text) {
            Ok(record) => record.user_id(),
            Err(e) => {
                debug!(path = %self.path.display(), error = %e, "session file is not JSON");
                None
            }
        }
    }
}
