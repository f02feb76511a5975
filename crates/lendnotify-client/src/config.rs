use crate::backoff::Backoff;
use lendnotify_core::UserId;
use std::time::Duration;

pub const DEFAULT_HEARTBEAT_INTERVAL: Duration = Duration::from_secs(30);
pub const DEFAULT_RECONNECT_INTERVAL: Duration = Duration::from_millis(3000);
pub const DEFAULT_MAX_RECONNECT_ATTEMPTS: u32 = 5;
pub const DEFAULT_OPEN_TIMEOUT: Duration = Duration::from_secs(10);

const DEV_BASE_URL: &str = "ws://localhost:29578/ws";

/// Where the push endpoint lives.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Endpoint {
    /// Local backend on its fixed development port.
    Development,
    /// Same host as the deployed front end.
    Deployed { host: String, secure: bool },
    /// An explicit base URL, e.g. `wss://lending.example.edu/ws`.
    Custom(String),
}

impl Endpoint {
    pub fn base_url(&self) -> String {
        match self {
            Endpoint::Development => DEV_BASE_URL.to_string(),
            Endpoint::Deployed { host, secure } => {
                let scheme = if *secure { "wss" } else { "ws" };
                format!("{scheme}://{host}/ws")
            }
            Endpoint::Custom(url) => url.trim_end_matches('/').to_string(),
        }
    }
}

/// Connection manager settings.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    pub endpoint: Endpoint,
    pub heartbeat_interval: Duration,
    /// Base delay for exponential backoff.
    pub reconnect_interval: Duration,
    pub max_reconnect_attempts: u32,
    pub open_timeout: Duration,
    /// If set, a session that sees no `pong` within this long after a
    /// `ping` is treated as an unclean close. Off by default.
    pub pong_timeout: Option<Duration>,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            endpoint: Endpoint::Development,
            heartbeat_interval: DEFAULT_HEARTBEAT_INTERVAL,
            reconnect_interval: DEFAULT_RECONNECT_INTERVAL,
            max_reconnect_attempts: DEFAULT_MAX_RECONNECT_ATTEMPTS,
            open_timeout: DEFAULT_OPEN_TIMEOUT,
            pong_timeout: None,
        }
    }
}

impl ClientConfig {
    pub fn with_endpoint(mut self, endpoint: Endpoint) -> Self {
        self.endpoint = endpoint;
        self
    }

    pub fn notification_url(&self, user: &UserId) -> String {
        format!(
            "{}/notification?userId={}",
            self.endpoint.base_url(),
            urlencoding::encode(user.as_str())
        )
    }

    pub fn backoff(&self) -> Backoff {
        Backoff::new(self.reconnect_interval, self.max_reconnect_attempts)
    }
}
