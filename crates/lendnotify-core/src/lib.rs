//! Core types for the lending-system notification channel.
//!
//! This crate holds the canonical message model and the wire framing. It does
//! no I/O; the client crate owns the socket and the store crate owns the
//! collections.

mod frame;
mod identity;
mod message;

pub use frame::{Frame, FrameError, encode_outbound, parse_frame, parse_timestamp, ping_frame};
pub use identity::{IdentityError, IdentityProvider, SessionRecordIdentity, StaticIdentity, UserId};
pub use message::{Message, NotificationType, ParseEnumError, Priority, ToastKind, now_millis};

use serde::{Deserialize, Serialize};
use std::fmt;

/// Close code for an intentional, clean shutdown.
pub const NORMAL_CLOSURE: u16 = 1000;

/// Connection lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionStatus {
    /// No socket, and no attempt in flight.
    #[default]
    Disconnected,
    /// Opening the socket.
    Connecting,
    /// Socket open, heartbeat running.
    Connected,
    /// Waiting out a backoff delay before the next attempt.
    Reconnecting,
    /// The transport reported a failure; followed by `Disconnected` or `Reconnecting`.
    Error,
}

impl ConnectionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConnectionStatus::Disconnected => "disconnected",
            ConnectionStatus::Connecting => "connecting",
            ConnectionStatus::Connected => "connected",
            ConnectionStatus::Reconnecting => "reconnecting",
            ConnectionStatus::Error => "error",
        }
    }
}

impl fmt::Display for ConnectionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
