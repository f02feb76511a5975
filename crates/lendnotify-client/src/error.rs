use lendnotify_core::IdentityError;
use std::time::Duration;
use tokio_tungstenite::tungstenite;

#[derive(Debug, thiserror::Error)]
pub enum ConnectError {
    #[error(transparent)]
    Identity(#[from] IdentityError),
    #[error("failed to open connection: {0}")]
    Transport(#[from] tungstenite::Error),
    #[error("connection attempt timed out after {0:?}")]
    Timeout(Duration),
    #[error("connection attempt was superseded")]
    Superseded,
}
