//! Connection manager.

use crate::backoff::Backoff;
use crate::config::ClientConfig;
use crate::error::ConnectError;
use crate::listeners::{ListenerId, Listeners};
use crate::transport::{Connector, TungsteniteConnector};
use futures_util::future::BoxFuture;
use futures_util::{SinkExt, StreamExt};
use lendnotify_core::{
    ConnectionStatus, Frame, IdentityProvider, Message, NORMAL_CLOSURE, encode_outbound,
    now_millis, parse_frame, ping_frame,
};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::{self, Instant};
use tokio_tungstenite::WebSocketStream;
use tokio_tungstenite::tungstenite::Message as WsMessage;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tracing::{debug, info, warn};

const CLOSE_REASON: &str = "User disconnected";
const NO_STATUS_RECEIVED: u16 = 1005;
const ABNORMAL_CLOSURE: u16 = 1006;

/// A reconnect attempt waiting out its backoff delay.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PendingReconnect {
    pub attempt: u32,
    pub delay: Duration,
}

/// Owns the single push-channel socket for one signed-in client.
///
/// Cloning yields another handle to the same connection.
pub struct ConnectionManager<C: Connector = TungsteniteConnector> {
    inner: Arc<Inner<C>>,
}

impl<C: Connector> Clone for ConnectionManager<C> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

struct Inner<C> {
    config: ClientConfig,
    backoff: Backoff,
    connector: C,
    identity: Arc<dyn IdentityProvider>,
    status: watch::Sender<ConnectionStatus>,
    message_listeners: Listeners<Message>,
    status_listeners: Listeners<ConnectionStatus>,
    link: Mutex<Link>,
}

#[derive(Default)]
struct Link {
    /// Bumped by every open attempt and by `disconnect`. Attempts and
    /// sessions carrying an older value are stale.
    generation: u64,
    session: Option<Session>,
    reconnect: Option<ScheduledReconnect>,
    attempts: u32,
    manual_close: bool,
}

struct Session {
    generation: u64,
    outbound: mpsc::UnboundedSender<Outbound>,
}

struct ScheduledReconnect {
    plan: PendingReconnect,
    timer: JoinHandle<()>,
}

enum Outbound {
    Frame(String),
    Close,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Attempt {
    Initial,
    Reconnect,
}

enum SessionEnd {
    Closed(u16),
    Failed(String),
    Unresponsive,
}

impl SessionEnd {
    fn close_code(&self) -> u16 {
        match self {
            SessionEnd::Closed(code) => *code,
            SessionEnd::Failed(_) | SessionEnd::Unresponsive => ABNORMAL_CLOSURE,
        }
    }
}

impl ConnectionManager {
    pub fn new(config: ClientConfig, identity: Arc<dyn IdentityProvider>) -> Self {
        Self::with_connector(config, identity, TungsteniteConnector)
    }
}

impl<C: Connector> ConnectionManager<C> {
    pub fn with_connector(
        config: ClientConfig,
        identity: Arc<dyn IdentityProvider>,
        connector: C,
    ) -> Self {
        let (status, _) = watch::channel(ConnectionStatus::Disconnected);
        Self {
            inner: Arc::new(Inner {
                backoff: config.backoff(),
                config,
                connector,
                identity,
                status,
                message_listeners: Listeners::new(),
                status_listeners: Listeners::new(),
                link: Mutex::new(Link::default()),
            }),
        }
    }

    /// Open the channel for the current user.
    ///
    /// Resolves once the socket is open. A failure here is returned to the
    /// caller and does not start the reconnect loop. Calling this while
    /// already connected is a no-op.
    pub async fn connect(&self) -> Result<(), ConnectError> {
        let user = self.inner.identity.resolve().inspect_err(|_| {
            warn!("no user identity available, not connecting");
        })?;
        {
            let mut link = self.inner.link();
            if link.session.is_some() {
                debug!("already connected");
                return Ok(());
            }
            link.manual_close = false;
            if let Some(pending) = link.reconnect.take() {
                pending.timer.abort();
            }
        }
        let url = self.inner.config.notification_url(&user);
        self.inner.open(url, Attempt::Initial).await
    }

    /// Close with the normal-closure code and cancel any pending reconnect.
    pub fn disconnect(&self) {
        self.inner.disconnect();
    }

    /// Drop the current session, reset the attempt counter and connect again.
    pub async fn reconnect(&self) -> Result<(), ConnectError> {
        let status = {
            let mut link = self.inner.link();
            link.generation += 1;
            link.attempts = 0;
            if let Some(pending) = link.reconnect.take() {
                pending.timer.abort();
            }
            if let Some(session) = link.session.take() {
                let _ = session.outbound.send(Outbound::Close);
            }
            self.inner.transition(ConnectionStatus::Disconnected)
        };
        self.inner.emit_status([status]);
        self.connect().await
    }

    /// Best-effort send of `{ type: event_type, ...payload }`. Returns
    /// `false` when the channel is not open.
    pub fn send(&self, event_type: &str, payload: serde_json::Value) -> bool {
        let text = match encode_outbound(event_type, payload) {
            Ok(text) => text,
            Err(e) => {
                warn!(event_type, error = %e, "could not encode outbound frame");
                return false;
            }
        };
        let link = self.inner.link();
        match &link.session {
            Some(session) if session.outbound.send(Outbound::Frame(text)).is_ok() => true,
            _ => {
                warn!(event_type, "connection not open, dropping outbound frame");
                false
            }
        }
    }

    pub fn on_message(&self, handler: impl Fn(&Message) + Send + Sync + 'static) -> ListenerId {
        self.inner.message_listeners.add(handler)
    }

    pub fn off_message(&self, id: ListenerId) -> bool {
        self.inner.message_listeners.remove(id)
    }

    pub fn on_status_change(
        &self,
        handler: impl Fn(&ConnectionStatus) + Send + Sync + 'static,
    ) -> ListenerId {
        self.inner.status_listeners.add(handler)
    }

    pub fn off_status_change(&self, id: ListenerId) -> bool {
        self.inner.status_listeners.remove(id)
    }

    pub fn status(&self) -> ConnectionStatus {
        *self.inner.status.borrow()
    }

    pub fn is_connected(&self) -> bool {
        self.status() == ConnectionStatus::Connected
    }

    pub fn subscribe_status(&self) -> watch::Receiver<ConnectionStatus> {
        self.inner.status.subscribe()
    }

    pub fn pending_reconnect(&self) -> Option<PendingReconnect> {
        self.inner.link().reconnect.as_ref().map(|pending| pending.plan)
    }

    /// Reconnect attempts made since the last successful open.
    pub fn reconnect_attempts(&self) -> u32 {
        self.inner.link().attempts
    }

    pub fn config(&self) -> &ClientConfig {
        &self.inner.config
    }
}

impl<C: Connector> Inner<C> {
    fn link(&self) -> MutexGuard<'_, Link> {
        self.link.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Publish a new status. Called with the link lock held; listeners are
    /// run by `emit_status` after the lock is released.
    fn transition(&self, status: ConnectionStatus) -> ConnectionStatus {
        self.status.send_replace(status);
        status
    }

    fn emit_status(&self, changes: impl IntoIterator<Item = ConnectionStatus>) {
        for status in changes {
            self.status_listeners.emit(&status);
        }
    }

    async fn open(self: &Arc<Self>, url: String, attempt: Attempt) -> Result<(), ConnectError> {
        let generation = {
            let mut link = self.link();
            if link.manual_close {
                return Err(ConnectError::Superseded);
            }
            link.generation += 1;
            self.transition(ConnectionStatus::Connecting);
            link.generation
        };
        self.emit_status([ConnectionStatus::Connecting]);
        info!(%url, ?attempt, "opening notification channel");

        let opened = match time::timeout(self.config.open_timeout, self.connector.open(&url)).await
        {
            Ok(Ok(ws)) => Ok(ws),
            Ok(Err(e)) => Err(ConnectError::Transport(e)),
            Err(_) => Err(ConnectError::Timeout(self.config.open_timeout)),
        };
        let ws = match opened {
            Ok(ws) => ws,
            Err(e) => {
                warn!(error = %e, "failed to open notification channel");
                self.open_failed(generation, attempt);
                return Err(e);
            }
        };

        let (outbound, commands) = mpsc::unbounded_channel();
        {
            let mut link = self.link();
            if link.generation != generation {
                debug!("discarding superseded connection");
                return Err(ConnectError::Superseded);
            }
            link.attempts = 0;
            link.session = Some(Session {
                generation,
                outbound,
            });
            self.transition(ConnectionStatus::Connected);
        }
        info!("notification channel connected");
        self.emit_status([ConnectionStatus::Connected]);
        tokio::spawn(Arc::clone(self).run_session(generation, ws, commands));
        Ok(())
    }

    fn open_failed(self: &Arc<Self>, generation: u64, attempt: Attempt) {
        let mut changes = Vec::new();
        {
            let mut link = self.link();
            if link.generation != generation {
                return;
            }
            changes.push(self.transition(ConnectionStatus::Error));
            changes.push(self.transition(ConnectionStatus::Disconnected));
            if attempt == Attempt::Reconnect && !link.manual_close {
                changes.extend(self.schedule_reconnect(&mut link));
            }
        }
        self.emit_status(changes);
    }

    /// Arm the next backoff timer, or give up once attempts are exhausted.
    fn schedule_reconnect(self: &Arc<Self>, link: &mut Link) -> Option<ConnectionStatus> {
        let attempt = link.attempts + 1;
        let Some(delay) = self.backoff.delay(attempt) else {
            warn!(
                attempts = link.attempts,
                "reconnect attempts exhausted, staying disconnected"
            );
            return None;
        };
        link.attempts = attempt;
        info!(
            attempt,
            max = self.backoff.max_attempts(),
            delay_ms = delay.as_millis() as u64,
            "scheduling reconnect"
        );
        let timer = tokio::spawn(Arc::clone(self).reconnect_after(attempt, delay));
        link.reconnect = Some(ScheduledReconnect {
            plan: PendingReconnect { attempt, delay },
            timer,
        });
        Some(self.transition(ConnectionStatus::Reconnecting))
    }

    fn reconnect_after(self: Arc<Self>, attempt: u32, delay: Duration) -> BoxFuture<'static, ()> {
        Box::pin(async move {
            time::sleep(delay).await;
            {
                let mut link = self.link();
                let due = matches!(&link.reconnect, Some(p) if p.plan.attempt == attempt);
                if !due || link.manual_close || link.session.is_some() {
                    return;
                }
                link.reconnect = None;
            }

            let url = match self.identity.resolve() {
                Ok(user) => self.config.notification_url(&user),
                Err(e) => {
                    warn!(attempt, error = %e, "cannot reconnect without a user identity");
                    let status = {
                        let _link = self.link();
                        self.transition(ConnectionStatus::Disconnected)
                    };
                    self.emit_status([status]);
                    return;
                }
            };

            info!(attempt, "reconnecting");
            if let Err(e) = self.open(url, Attempt::Reconnect).await {
                debug!(attempt, error = %e, "reconnect attempt failed");
            }
        })
    }

    fn disconnect(&self) {
        let status = {
            let mut link = self.link();
            link.manual_close = true;
            link.generation += 1;
            if let Some(pending) = link.reconnect.take() {
                pending.timer.abort();
                debug!(attempt = pending.plan.attempt, "cancelled pending reconnect");
            }
            if let Some(session) = link.session.take() {
                let _ = session.outbound.send(Outbound::Close);
            }
            self.transition(ConnectionStatus::Disconnected)
        };
        info!("notification channel disconnected");
        self.emit_status([status]);
    }

    async fn run_session(
        self: Arc<Self>,
        generation: u64,
        ws: WebSocketStream<C::Io>,
        mut commands: mpsc::UnboundedReceiver<Outbound>,
    ) {
        let (mut sink, mut stream) = ws.split();
        let period = self.config.heartbeat_interval;
        let mut heartbeat = time::interval_at(Instant::now() + period, period);
        let mut pong_deadline: Option<Instant> = None;

        let end = loop {
            tokio::select! {
                command = commands.recv() => match command {
                    Some(Outbound::Frame(text)) => {
                        if let Err(e) = sink.send(WsMessage::Text(text.into())).await {
                            break SessionEnd::Failed(e.to_string());
                        }
                    }
                    Some(Outbound::Close) | None => {
                        let frame = CloseFrame {
                            code: CloseCode::Normal,
                            reason: CLOSE_REASON.into(),
                        };
                        if let Err(e) = sink.send(WsMessage::Close(Some(frame))).await {
                            debug!(error = %e, "close frame not delivered");
                        }
                        break SessionEnd::Closed(NORMAL_CLOSURE);
                    }
                },
                _ = heartbeat.tick() => {
                    debug!("sending heartbeat");
                    if let Err(e) = sink.send(WsMessage::Text(ping_frame().into())).await {
                        break SessionEnd::Failed(e.to_string());
                    }
                    if let (Some(timeout), None) = (self.config.pong_timeout, pong_deadline) {
                        pong_deadline = Some(Instant::now() + timeout);
                    }
                },
                _ = wait_until(pong_deadline) => {
                    warn!("heartbeat not acknowledged in time");
                    break SessionEnd::Unresponsive;
                },
                frame = stream.next() => match frame {
                    Some(Ok(WsMessage::Text(text))) => {
                        if self.handle_text(text.as_str()) {
                            pong_deadline = None;
                        }
                    }
                    Some(Ok(WsMessage::Close(frame))) => {
                        let code = frame.map_or(NO_STATUS_RECEIVED, |f| u16::from(f.code));
                        break SessionEnd::Closed(code);
                    }
                    Some(Ok(_)) => {}
                    Some(Err(e)) => break SessionEnd::Failed(e.to_string()),
                    None => break SessionEnd::Closed(ABNORMAL_CLOSURE),
                },
            }
        };

        self.session_ended(generation, end);
    }

    /// Adapt and dispatch one text frame. Returns `true` for a pong.
    fn handle_text(&self, text: &str) -> bool {
        match parse_frame(text, now_millis()) {
            Ok(Frame::Pong { timestamp }) => {
                debug!(timestamp, "heartbeat acknowledged");
                true
            }
            Ok(Frame::Message(message)) => {
                debug!(id = %message.id, kind = %message.kind, "message received");
                self.message_listeners.emit(&message);
                false
            }
            Err(e) => {
                warn!(error = %e, "dropping malformed frame");
                false
            }
        }
    }

    fn session_ended(self: &Arc<Self>, generation: u64, end: SessionEnd) {
        let mut changes = Vec::new();
        {
            let mut link = self.link();
            match &link.session {
                Some(session) if session.generation == generation => {}
                _ => {
                    debug!("stale session finished");
                    return;
                }
            }
            link.session = None;

            let code = end.close_code();
            match &end {
                SessionEnd::Failed(error) => {
                    warn!(%error, "notification channel failed");
                    changes.push(self.transition(ConnectionStatus::Error));
                }
                SessionEnd::Unresponsive => {
                    changes.push(self.transition(ConnectionStatus::Error));
                }
                SessionEnd::Closed(_) => {}
            }
            info!(code, "notification channel closed");
            changes.push(self.transition(ConnectionStatus::Disconnected));

            if code != NORMAL_CLOSURE && !link.manual_close {
                changes.extend(self.schedule_reconnect(&mut link));
            }
        }
        self.emit_status(changes);
    }
}

async fn wait_until(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}
