//! Push server implementation.

use crate::protocol::{
    ClientFrame, Command, PushKind, ServerFrame, parse_command, user_id_from_query,
};
use futures_util::{SinkExt, StreamExt};
use lendnotify_core::now_millis;
use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::broadcast;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;

const NOTIFICATION_PATH: &str = "/ws/notification";

/// Something to deliver to one user or to everyone.
#[derive(Debug, Clone)]
struct Outgoing {
    target: Option<String>,
    frame: Outbound,
}

#[derive(Debug, Clone)]
enum Outbound {
    Text(String),
    Close(u16),
}

pub async fn run(addr: SocketAddr) -> anyhow::Result<()> {
    let (broadcast_tx, _) = broadcast::channel::<Outgoing>(100);
    let next_id = Arc::new(AtomicU64::new(1));

    let listener = TcpListener::bind(addr).await?;
    tracing::info!("Listening on ws://{}{}?userId=<id>", addr, NOTIFICATION_PATH);

    tokio::spawn(read_operator(broadcast_tx.clone(), Arc::clone(&next_id)));

    loop {
        let (stream, client_addr) = listener.accept().await?;
        let broadcast_tx = broadcast_tx.clone();

        tokio::spawn(async move {
            if let Err(e) = handle_connection(stream, client_addr, broadcast_tx).await {
                tracing::warn!("Connection error from {}: {}", client_addr, e);
            }
        });
    }
}

async fn read_operator(broadcast_tx: broadcast::Sender<Outgoing>, next_id: Arc<AtomicU64>) {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        let line = match lines.next_line().await {
            Ok(Some(line)) => line,
            Ok(None) => break,
            Err(e) => {
                tracing::warn!("stdin error: {}", e);
                break;
            }
        };
        let command = match parse_command(&line) {
            Ok(command) => command,
            Err(e) => {
                tracing::warn!("{}", e);
                continue;
            }
        };
        let outgoing = match command {
            Command::Close { code } => Outgoing {
                target: None,
                frame: Outbound::Close(code),
            },
            Command::Push {
                target,
                kind,
                subject,
                content,
            } => {
                let id = format!("srv_{}", next_id.fetch_add(1, Ordering::Relaxed));
                let frame = match kind {
                    PushKind::System => ServerFrame::System {
                        title: subject,
                        content,
                        timestamp: now_millis(),
                        id,
                    },
                    PushKind::Notification(notification_type) => ServerFrame::Notification {
                        notification_type,
                        subject,
                        content,
                        timestamp: chrono::Utc::now().format("%Y-%m-%d %H:%M:%S").to_string(),
                        id,
                    },
                };
                match serde_json::to_string(&frame) {
                    Ok(text) => Outgoing {
                        target,
                        frame: Outbound::Text(text),
                    },
                    Err(e) => {
                        tracing::warn!("Cannot encode frame: {}", e);
                        continue;
                    }
                }
            }
        };
        if broadcast_tx.send(outgoing).is_err() {
            tracing::info!("No clients connected, nothing sent");
        }
    }
}

async fn handle_connection(
    stream: TcpStream,
    addr: SocketAddr,
    broadcast_tx: broadcast::Sender<Outgoing>,
) -> anyhow::Result<()> {
    let mut requested = None;
    let ws = tokio_tungstenite::accept_hdr_async(
        stream,
        |req: &Request, resp: Response| -> Result<Response, ErrorResponse> {
            requested = Some((req.uri().path().to_string(), user_id_from_query(req.uri().query())));
            Ok(resp)
        },
    )
    .await?;
    let (mut sink, mut stream) = ws.split();

    let user_id = match requested {
        Some((path, Some(user_id))) if path == NOTIFICATION_PATH => user_id,
        other => {
            tracing::warn!(
                "Rejecting {}: expected {}?userId=<id>, got {:?}",
                addr,
                NOTIFICATION_PATH,
                other
            );
            let frame = CloseFrame {
                code: CloseCode::Policy,
                reason: "userId required".into(),
            };
            sink.send(Message::Close(Some(frame))).await?;
            return Ok(());
        }
    };
    tracing::info!("{} connected from {}", user_id, addr);

    let mut broadcast_rx = broadcast_tx.subscribe();

    loop {
        tokio::select! {
            msg = stream.next() => {
                let msg = match msg {
                    Some(Ok(msg)) => msg,
                    Some(Err(e)) => {
                        tracing::debug!("WebSocket error: {}", e);
                        break;
                    }
                    None => break,
                };

                match msg {
                    Message::Text(text) => match serde_json::from_str::<ClientFrame>(&text) {
                        Ok(ClientFrame::Ping) => {
                            let pong = serde_json::to_string(&ServerFrame::pong())?;
                            sink.send(Message::Text(pong.into())).await?;
                        }
                        Ok(ClientFrame::Event) => {
                            tracing::info!("{} sent {}", user_id, text.as_str());
                        }
                        Err(e) => {
                            tracing::warn!("Invalid message from {}: {}", user_id, e);
                        }
                    },
                    Message::Close(frame) => {
                        tracing::info!(
                            "{} closed: {:?}",
                            user_id,
                            frame.map(|f| u16::from(f.code))
                        );
                        break;
                    }
                    _ => {}
                }
            }

            outgoing = broadcast_rx.recv() => {
                let outgoing = match outgoing {
                    Ok(outgoing) => outgoing,
                    Err(broadcast::error::RecvError::Lagged(n)) => {
                        tracing::warn!("{} missed {} pushes", user_id, n);
                        continue;
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                };
                if outgoing.target.as_deref().is_some_and(|target| target != user_id) {
                    continue;
                }
                match outgoing.frame {
                    Outbound::Text(text) => sink.send(Message::Text(text.into())).await?,
                    Outbound::Close(code) => {
                        let frame = CloseFrame {
                            code: CloseCode::from(code),
                            reason: "closed by operator".into(),
                        };
                        sink.send(Message::Close(Some(frame))).await?;
                    }
                }
            }
        }
    }

    tracing::debug!("Connection closed: {} ({})", addr, user_id);
    Ok(())
}
