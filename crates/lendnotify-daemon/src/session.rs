//! One signed-in client: a connection manager feeding a shared store.

use crate::config::DaemonConfig;
use lendnotify_client::{ConnectError, ConnectionManager, Connector, ListenerId};
use lendnotify_core::{ConnectionStatus, Message, now_millis};
use lendnotify_store::{LocalNotification, NotificationStore, PersistError};
use std::future::Future;
use std::path::PathBuf;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::time::{self, MissedTickBehavior};
use tracing::{info, warn};

pub type SharedStore = Arc<Mutex<NotificationStore>>;

const DEV_NOTIFICATION_DELAY: Duration = Duration::from_secs(3);

pub struct NotificationSession<C: Connector = lendnotify_client::TungsteniteConnector> {
    manager: ConnectionManager<C>,
    store: SharedStore,
    state_file: PathBuf,
    message_listener: ListenerId,
    status_listener: ListenerId,
}

impl NotificationSession {
    /// Load the saved store and build the manager described by `config`.
    pub fn from_config(config: &DaemonConfig) -> Result<Self, PersistError> {
        let store = NotificationStore::load_from(&config.state_file)?;
        let manager = ConnectionManager::new(config.client.clone(), config.identity.provider());
        Ok(Self::new(manager, store, config.state_file.clone()))
    }
}

impl<C: Connector> NotificationSession<C> {
    pub fn new(
        manager: ConnectionManager<C>,
        store: NotificationStore,
        state_file: PathBuf,
    ) -> Self {
        let store = Arc::new(Mutex::new(store));

        let sink = Arc::clone(&store);
        let message_listener = manager.on_message(move |message| {
            lock(&sink).ingest(message.clone());
            announce(message);
        });
        let status_listener = manager.on_status_change(|status| match status {
            ConnectionStatus::Error => warn!(%status, "connection status changed"),
            _ => info!(%status, "connection status changed"),
        });

        Self {
            manager,
            store,
            state_file,
            message_listener,
            status_listener,
        }
    }

    pub fn manager(&self) -> &ConnectionManager<C> {
        &self.manager
    }

    pub fn store(&self) -> SharedStore {
        Arc::clone(&self.store)
    }

    pub async fn start(&self) -> Result<(), ConnectError> {
        self.manager.connect().await
    }

    pub fn persist(&self) -> Result<(), PersistError> {
        lock(&self.store).save_to(&self.state_file)
    }

    /// Raise the local test notification shown after a development login.
    pub fn raise_dev_notification(&self) -> String {
        lock(&self.store).add_notification(LocalNotification {
            title: Some("Test notification".into()),
            message: Some("A test notification over the push channel".into()),
            timestamp: Some(now_millis()),
            ..LocalNotification::default()
        })
    }

    /// Persist every `interval` until `shutdown` resolves, then close the
    /// connection and save once more. In development mode a local test
    /// notification is raised shortly after start.
    pub async fn run_until(
        self,
        shutdown: impl Future<Output = ()>,
        interval: Duration,
        development: bool,
    ) -> Result<(), PersistError> {
        let mut ticker = time::interval_at(time::Instant::now() + interval, interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let dev_notice = time::sleep(DEV_NOTIFICATION_DELAY);
        tokio::pin!(shutdown, dev_notice);
        let mut dev_pending = development;

        loop {
            tokio::select! {
                _ = &mut shutdown => break,
                _ = ticker.tick() => {
                    if let Err(e) = self.persist() {
                        warn!(
                            error = %e,
                            path = %self.state_file.display(),
                            "periodic save failed"
                        );
                    }
                }
                _ = &mut dev_notice, if dev_pending => {
                    dev_pending = false;
                    let id = self.raise_dev_notification();
                    info!(%id, "raised development test notification");
                }
            }
        }

        self.shutdown()
    }

    /// Unregister listeners, close cleanly and save.
    pub fn shutdown(self) -> Result<(), PersistError> {
        self.manager.off_message(self.message_listener);
        self.manager.off_status_change(self.status_listener);
        self.manager.disconnect();
        self.persist()?;
        info!(path = %self.state_file.display(), "session closed, store saved");
        Ok(())
    }
}

fn lock(store: &SharedStore) -> MutexGuard<'_, NotificationStore> {
    store.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Log the toast a UI would show for `message`.
fn announce(message: &Message) {
    let toast = message.priority.toast_kind();
    match message.priority.toast_duration() {
        Some(duration) => info!(
            id = %message.id,
            kind = %message.kind,
            %toast,
            duration_ms = duration.as_millis() as u64,
            "{}", message.title
        ),
        None => info!(
            id = %message.id,
            kind = %message.kind,
            %toast,
            sticky = true,
            "{}", message.title
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use lendnotify_client::ClientConfig;
    use lendnotify_core::{NotificationType, StaticIdentity};
    use std::future;
    use std::io;
    use tokio::io::DuplexStream;
    use tokio_tungstenite::WebSocketStream;
    use tokio_tungstenite::tungstenite;

    /// Never opens, so sessions under test run without a server.
    struct RefusingConnector;

    impl Connector for RefusingConnector {
        type Io = DuplexStream;

        async fn open(
            &self,
            _url: &str,
        ) -> Result<WebSocketStream<DuplexStream>, tungstenite::Error> {
            Err(tungstenite::Error::Io(io::Error::new(
                io::ErrorKind::ConnectionRefused,
                "refused",
            )))
        }
    }

    fn session(dir: &tempfile::TempDir) -> NotificationSession<RefusingConnector> {
        let manager = ConnectionManager::with_connector(
            ClientConfig::default(),
            Arc::new(StaticIdentity::new("1024".parse().unwrap())),
            RefusingConnector,
        );
        NotificationSession::new(
            manager,
            NotificationStore::new(),
            dir.path().join("state.json"),
        )
    }

    #[tokio::test]
    async fn open_failure_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        let session = session(&dir);
        assert!(matches!(session.start().await, Err(ConnectError::Transport(_))));
        assert_eq!(session.manager().status(), ConnectionStatus::Disconnected);
    }

    #[tokio::test]
    async fn shutdown_saves_the_store() {
        let dir = tempfile::tempdir().unwrap();
        let session = session(&dir);
        lock(&session.store()).ingest(Message::new("m1", NotificationType::System, "Hi", "", 1));
        session.shutdown().unwrap();

        let saved = NotificationStore::load_from(&dir.path().join("state.json")).unwrap();
        assert_eq!(saved.get("m1").unwrap().title, "Hi");
        assert_eq!(saved.unread_total(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn dev_notification_after_three_seconds() {
        let dir = tempfile::tempdir().unwrap();
        let session = session(&dir);
        let store = session.store();
        let shutdown = time::sleep(Duration::from_secs(5));
        session
            .run_until(shutdown, Duration::from_secs(60), true)
            .await
            .unwrap();

        let store = lock(&store);
        assert_eq!(store.len(), 1);
        let m = &store.messages()[0];
        assert_eq!(m.title, "Test notification");
        assert!(!m.read);
        assert!(dir.path().join("state.json").exists());
    }

    #[tokio::test(start_paused = true)]
    async fn periodic_save() {
        let dir = tempfile::tempdir().unwrap();
        let session = session(&dir);
        let path = dir.path().join("state.json");
        let store = session.store();
        let handle = tokio::spawn(session.run_until(
            future::pending(),
            Duration::from_secs(10),
            false,
        ));

        time::sleep(Duration::from_secs(11)).await;
        assert!(path.exists());
        assert!(lock(&store).is_empty());
        handle.abort();
    }
}
