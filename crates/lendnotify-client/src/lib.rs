//! Client side of the notification push channel.
//!
//! [`ConnectionManager`] keeps one socket open to the per-user push endpoint,
//! sends a heartbeat while connected, reconnects with exponential backoff
//! after unclean closes, and hands adapted messages to registered listeners.

mod backoff;
mod config;
mod error;
mod listeners;
mod manager;
mod transport;

pub use backoff::Backoff;
pub use config::{
    ClientConfig, DEFAULT_HEARTBEAT_INTERVAL, DEFAULT_MAX_RECONNECT_ATTEMPTS,
    DEFAULT_OPEN_TIMEOUT, DEFAULT_RECONNECT_INTERVAL, Endpoint,
};
pub use error::ConnectError;
pub use listeners::ListenerId;
pub use manager::{ConnectionManager, PendingReconnect};
pub use transport::{Connector, TungsteniteConnector};
