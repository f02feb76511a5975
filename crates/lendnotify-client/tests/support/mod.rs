//! In-memory transport for driving the connection manager in tests.

#![allow(dead_code)]

use futures_util::{SinkExt, StreamExt};
use lendnotify_client::{ClientConfig, ConnectionManager, Connector};
use lendnotify_core::{ConnectionStatus, Message, StaticIdentity, UserId};
use std::collections::VecDeque;
use std::io;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tokio::io::DuplexStream;
use tokio::sync::mpsc;
use tokio::time::Instant;
use tokio_tungstenite::WebSocketStream;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::protocol::{CloseFrame, Role};
use tokio_tungstenite::tungstenite::{self, Message as WsMessage};

pub type ServerEnd = WebSocketStream<DuplexStream>;

#[derive(Debug, Clone, Copy)]
pub enum Outcome {
    Accept,
    Refuse,
}

/// Hands the server half of every accepted connection to the test.
pub struct MemoryConnector {
    outcomes: Mutex<VecDeque<Outcome>>,
    accepted: mpsc::UnboundedSender<ServerEnd>,
    opens: Arc<AtomicUsize>,
    urls: Arc<Mutex<Vec<String>>>,
    opened_at: Arc<Mutex<Vec<Instant>>>,
}

pub struct Harness {
    pub manager: ConnectionManager<MemoryConnector>,
    pub servers: mpsc::UnboundedReceiver<ServerEnd>,
    pub opens: Arc<AtomicUsize>,
    pub urls: Arc<Mutex<Vec<String>>>,
    pub opened_at: Arc<Mutex<Vec<Instant>>>,
}

impl Connector for MemoryConnector {
    type Io = DuplexStream;

    async fn open(&self, url: &str) -> Result<WebSocketStream<DuplexStream>, tungstenite::Error> {
        self.opens.fetch_add(1, Ordering::SeqCst);
        self.urls.lock().unwrap().push(url.to_string());
        self.opened_at.lock().unwrap().push(Instant::now());
        let outcome = self
            .outcomes
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or(Outcome::Refuse);
        match outcome {
            Outcome::Refuse => Err(tungstenite::Error::Io(io::Error::new(
                io::ErrorKind::ConnectionRefused,
                "refused",
            ))),
            Outcome::Accept => {
                let (client, server) = tokio::io::duplex(64 * 1024);
                let server = WebSocketStream::from_raw_socket(server, Role::Server, None).await;
                let client = WebSocketStream::from_raw_socket(client, Role::Client, None).await;
                let _ = self.accepted.send(server);
                Ok(client)
            }
        }
    }
}

pub fn user() -> UserId {
    "1024".parse().unwrap()
}

pub fn harness(config: ClientConfig, outcomes: &[Outcome]) -> Harness {
    harness_with_identity(config, outcomes, StaticIdentity::new(user()))
}

pub fn harness_with_identity(
    config: ClientConfig,
    outcomes: &[Outcome],
    identity: StaticIdentity,
) -> Harness {
    let (accepted, servers) = mpsc::unbounded_channel();
    let opens = Arc::new(AtomicUsize::new(0));
    let urls = Arc::new(Mutex::new(Vec::new()));
    let opened_at = Arc::new(Mutex::new(Vec::new()));
    let connector = MemoryConnector {
        outcomes: Mutex::new(outcomes.iter().copied().collect()),
        accepted,
        opens: Arc::clone(&opens),
        urls: Arc::clone(&urls),
        opened_at: Arc::clone(&opened_at),
    };
    let manager = ConnectionManager::with_connector(config, Arc::new(identity), connector);
    Harness {
        manager,
        servers,
        opens,
        urls,
        opened_at,
    }
}

pub fn collect_messages(
    manager: &ConnectionManager<MemoryConnector>,
) -> mpsc::UnboundedReceiver<Message> {
    let (tx, rx) = mpsc::unbounded_channel();
    manager.on_message(move |m| {
        let _ = tx.send(m.clone());
    });
    rx
}

pub fn collect_statuses(
    manager: &ConnectionManager<MemoryConnector>,
) -> mpsc::UnboundedReceiver<ConnectionStatus> {
    let (tx, rx) = mpsc::unbounded_channel();
    manager.on_status_change(move |s| {
        let _ = tx.send(*s);
    });
    rx
}

/// Wait for `wanted`, skipping other statuses.
pub async fn wait_for(
    rx: &mut mpsc::UnboundedReceiver<ConnectionStatus>,
    wanted: ConnectionStatus,
) {
    loop {
        match rx.recv().await {
            Some(status) if status == wanted => return,
            Some(_) => continue,
            None => panic!("status stream ended before {wanted}"),
        }
    }
}

pub async fn push(server: &mut ServerEnd, text: &str) {
    server
        .send(WsMessage::Text(text.to_string().into()))
        .await
        .unwrap();
}

pub async fn close(server: &mut ServerEnd, code: CloseCode) {
    server
        .send(WsMessage::Close(Some(CloseFrame {
            code,
            reason: "".into(),
        })))
        .await
        .unwrap();
}

/// Next text frame the client sent, skipping control frames.
pub async fn next_text(server: &mut ServerEnd) -> Option<String> {
    while let Some(frame) = server.next().await {
        match frame {
            Ok(WsMessage::Text(text)) => return Some(text.as_str().to_string()),
            Ok(WsMessage::Close(_)) | Err(_) => return None,
            Ok(_) => continue,
        }
    }
    None
}
