use std::future::Future;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpStream;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, tungstenite};

/// Opens the socket the connection manager drives.
pub trait Connector: Send + Sync + 'static {
    type Io: AsyncRead + AsyncWrite + Unpin + Send + 'static;

    fn open(
        &self,
        url: &str,
    ) -> impl Future<Output = Result<WebSocketStream<Self::Io>, tungstenite::Error>> + Send;
}

/// TCP (optionally TLS) WebSocket connector.
#[derive(Debug, Clone, Copy, Default)]
pub struct TungsteniteConnector;

impl Connector for TungsteniteConnector {
    type Io = MaybeTlsStream<TcpStream>;

    async fn open(&self, url: &str) -> Result<WebSocketStream<Self::Io>, tungstenite::Error> {
        let (stream, _response) = tokio_tungstenite::connect_async(url).await?;
        Ok(stream)
    }
}
