//! On-disk snapshot of the store.

use crate::store::NotificationStore;
use lendnotify_core::Message;
use serde::{Deserialize, Serialize};
use std::fs;
use std::io;
use std::path::Path;
use tracing::{debug, info};

#[derive(Debug, thiserror::Error)]
pub enum PersistError {
    #[error("state file I/O failed: {0}")]
    Io(#[from] io::Error),
    #[error("state file is not valid JSON: {0}")]
    Json(#[from] serde_json::Error),
}

/// The fields that survive a restart.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct PersistedState {
    pub messages: Vec<Message>,
    pub notifications: Vec<Message>,
    pub last_message_time: i64,
    pub unread_total: usize,
}

impl NotificationStore {
    /// Write a snapshot to `path`, replacing it atomically.
    pub fn save_to(&self, path: &Path) -> Result<(), PersistError> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)?;
        }
        let json = serde_json::to_vec_pretty(&self.snapshot())?;
        let tmp = path.with_extension("json.tmp");
        fs::write(&tmp, json)?;
        fs::rename(&tmp, path)?;
        debug!(path = %path.display(), entries = self.len(), "store saved");
        Ok(())
    }

    /// Load a snapshot from `path`. A missing file yields an empty store.
    pub fn load_from(path: &Path) -> Result<Self, PersistError> {
        let bytes = match fs::read(path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                info!(path = %path.display(), "no saved state, starting empty");
                return Ok(Self::new());
            }
            Err(e) => return Err(e.into()),
        };
        let state: PersistedState = serde_json::from_slice(&bytes)?;
        let store = Self::restore(state);
        info!(
            path = %path.display(),
            entries = store.len(),
            unread = store.unread_total(),
            "store loaded"
        );
        Ok(store)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use lendnotify_core::{NotificationType, Priority};

    #[test]
    fn save_and_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("state.json");

        let mut store = NotificationStore::new();
        store.ingest(
            Message::new("a", NotificationType::BorrowUpdate, "Due", "Tomorrow", 10)
                .with_priority(Priority::High),
        );
        store.ingest(Message::new("b", NotificationType::System, "Ok", "", 20).with_read(true));
        store.save_to(&path).unwrap();

        let loaded = NotificationStore::load_from(&path).unwrap();
        assert_eq!(loaded.messages(), store.messages());
        assert_eq!(loaded.unread_total(), 1);
        assert_eq!(loaded.last_message_time(), 20);
        assert!(!path.with_extension("json.tmp").exists());
    }

    #[test]
    fn missing_file_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let store = NotificationStore::load_from(&dir.path().join("absent.json")).unwrap();
        assert!(store.is_empty());
        assert_eq!(store.unread_total(), 0);
    }

    #[test]
    fn reads_the_persisted_shape() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("state.json");
        fs::write(
            &path,
            r#"{
                "messages": [
                    {"id": "m1", "type": "device_update", "title": "Moved", "content": "",
                     "timestamp": 5, "priority": "normal", "read": false,
                     "data": {"type": "notification"}}
                ],
                "notifications": [],
                "lastMessageTime": 5,
                "unreadTotal": 1
            }"#,
        )
        .unwrap();
        let store = NotificationStore::load_from(&path).unwrap();
        assert_eq!(store.get("m1").unwrap().kind, NotificationType::DeviceUpdate);
        assert_eq!(store.unread_total(), 1);

        let json: serde_json::Value = serde_json::to_value(store.snapshot()).unwrap();
        assert_eq!(json["lastMessageTime"], 5);
        assert_eq!(json["notifications"][0]["id"], "m1");
    }

    #[test]
    fn corrupt_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("state.json");
        fs::write(&path, "not json").unwrap();
        assert!(matches!(
            NotificationStore::load_from(&path),
            Err(PersistError::Json(_))
        ));
    }
}
