use crate::filter::MessageFilter;
use crate::persist::PersistedState;
use chrono::{DateTime, NaiveDate};
use lendnotify_core::{Message, NotificationType, Priority, now_millis};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet, VecDeque};
use tracing::{debug, info};

/// Upper bound on stored entries. Inserting past it evicts the
/// least-recently-inserted entry.
pub const MAX_ENTRIES: usize = 1000;

const LOCAL_TITLE: &str = "New notification";

/// What `ingest` did with a message.
#[derive(Debug, Clone, PartialEq)]
pub enum Ingest {
    /// New id, placed at the head. Carries the entry pushed out by the cap.
    Inserted { evicted: Option<Message> },
    /// Known id, replaced in place.
    Updated { previous: Message },
}

/// Per-category counts over the stored entries.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageStats {
    pub total: usize,
    pub unread: usize,
    pub by_type: BTreeMap<NotificationType, usize>,
    pub by_priority: BTreeMap<Priority, usize>,
}

/// Loose fields for a locally raised notification. Missing fields get
/// defaults in [`NotificationStore::add_notification`].
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct LocalNotification {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(rename = "type", skip_serializing_if = "Option::is_none")]
    pub kind: Option<NotificationType>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub priority: Option<Priority>,
}

/// Most-recent-first message collection with a reconciled unread counter.
#[derive(Debug, Clone, Default)]
pub struct NotificationStore {
    entries: VecDeque<Message>,
    unread_total: usize,
    last_message_time: i64,
}

impl NotificationStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// The single entry point for inbound and locally raised messages.
    pub fn ingest(&mut self, message: Message) -> Ingest {
        self.last_message_time = message.timestamp;

        if let Some(pos) = self.position(&message.id) {
            let now_unread = !message.read;
            let previous = std::mem::replace(&mut self.entries[pos], message);
            match (previous.read, now_unread) {
                (true, true) => self.unread_total += 1,
                (false, false) => self.unread_total = self.unread_total.saturating_sub(1),
                _ => {}
            }
            debug!(id = %previous.id, unread_total = self.unread_total, "message updated in place");
            return Ingest::Updated { previous };
        }

        if !message.read {
            self.unread_total += 1;
        }
        debug!(id = %message.id, unread_total = self.unread_total, "message stored");
        self.entries.push_front(message);

        let evicted = if self.entries.len() > MAX_ENTRIES {
            self.entries.pop_back()
        } else {
            None
        };
        if let Some(old) = &evicted {
            if !old.read {
                self.unread_total = self.unread_total.saturating_sub(1);
            }
            debug!(id = %old.id, "evicted oldest message");
        }
        Ingest::Inserted { evicted }
    }

    fn position(&self, id: &str) -> Option<usize> {
        self.entries.iter().position(|m| m.id == id)
    }

    pub fn get(&self, id: &str) -> Option<&Message> {
        self.entries.iter().find(|m| m.id == id)
    }

    /// All entries, most recently inserted first.
    pub fn messages(&self) -> &VecDeque<Message> {
        &self.entries
    }

    /// The notification view. Same entries, same order as [`messages`](Self::messages).
    pub fn notifications(&self) -> &VecDeque<Message> {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn unread_total(&self) -> usize {
        self.unread_total
    }

    /// Override the counter with an authoritative value. Negative input
    /// clamps to zero.
    pub fn set_unread_total(&mut self, count: i64) {
        self.unread_total = usize::try_from(count).unwrap_or(0);
        debug!(unread_total = self.unread_total, "unread total overridden");
    }

    /// Timestamp of the most recently ingested message, 0 if none.
    pub fn last_message_time(&self) -> i64 {
        self.last_message_time
    }

    /// Returns `true` if the entry was unread.
    pub fn mark_as_read(&mut self, id: &str) -> bool {
        match self.entries.iter_mut().find(|m| m.id == id) {
            Some(m) if !m.read => {
                m.read = true;
                self.unread_total = self.unread_total.saturating_sub(1);
                true
            }
            _ => false,
        }
    }

    pub fn mark_notification_as_read(&mut self, id: &str) -> bool {
        self.mark_as_read(id)
    }

    pub fn mark_all_as_read(&mut self) {
        for m in &mut self.entries {
            m.read = true;
        }
        self.unread_total = 0;
    }

    pub fn mark_all_notifications_as_read(&mut self) {
        self.mark_all_as_read();
    }

    pub fn remove(&mut self, id: &str) -> Option<Message> {
        let pos = self.position(id)?;
        let removed = self.entries.remove(pos)?;
        if !removed.read {
            self.unread_total = self.unread_total.saturating_sub(1);
        }
        Some(removed)
    }

    pub fn clear_all(&mut self) {
        info!(cleared = self.entries.len(), "clearing all messages");
        self.entries.clear();
        self.unread_total = 0;
    }

    pub fn clear_notifications(&mut self) {
        self.clear_all();
    }

    /// Drop every read entry. Returns how many were removed.
    pub fn clear_read(&mut self) -> usize {
        let before = self.entries.len();
        self.entries.retain(|m| !m.read);
        before - self.entries.len()
    }

    pub fn filter(&self, filter: &MessageFilter) -> Vec<&Message> {
        self.entries.iter().filter(|m| filter.matches(m)).collect()
    }

    /// Case-insensitive substring match on title or content.
    pub fn search(&self, text: &str) -> Vec<&Message> {
        let needle = text.to_lowercase();
        self.entries
            .iter()
            .filter(|m| {
                m.title.to_lowercase().contains(&needle)
                    || m.content.to_lowercase().contains(&needle)
            })
            .collect()
    }

    /// Unread entries counted directly, independent of the stored total.
    pub fn unread_count(&self) -> usize {
        self.entries.iter().filter(|m| !m.read).count()
    }

    pub fn unread(&self) -> Vec<&Message> {
        self.filter(&MessageFilter::new().read(false))
    }

    pub fn by_type(&self, kind: NotificationType) -> Vec<&Message> {
        self.filter(&MessageFilter::new().kind(kind))
    }

    pub fn by_priority(&self, priority: Priority) -> Vec<&Message> {
        self.filter(&MessageFilter::new().priority(priority))
    }

    pub fn urgent(&self) -> Vec<&Message> {
        self.by_priority(Priority::Urgent)
    }

    pub fn high_priority(&self) -> Vec<&Message> {
        self.by_priority(Priority::High)
    }

    /// Newest timestamp first. Ties keep insertion order.
    pub fn sorted_by_time(&self) -> Vec<&Message> {
        let mut sorted: Vec<&Message> = self.entries.iter().collect();
        sorted.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));
        sorted
    }

    pub fn recent(&self, limit: usize) -> Vec<&Message> {
        let mut sorted = self.sorted_by_time();
        sorted.truncate(limit);
        sorted
    }

    /// Entries keyed by UTC calendar day of their timestamp.
    pub fn grouped_by_date(&self) -> BTreeMap<NaiveDate, Vec<&Message>> {
        let mut groups: BTreeMap<NaiveDate, Vec<&Message>> = BTreeMap::new();
        for m in &self.entries {
            if let Some(day) = DateTime::from_timestamp_millis(m.timestamp) {
                groups.entry(day.date_naive()).or_default().push(m);
            }
        }
        groups
    }

    pub fn stats(&self) -> MessageStats {
        let mut stats = MessageStats {
            total: self.entries.len(),
            unread: self.unread_count(),
            ..MessageStats::default()
        };
        for m in &self.entries {
            *stats.by_type.entry(m.kind).or_default() += 1;
            *stats.by_priority.entry(m.priority).or_default() += 1;
        }
        stats
    }

    /// Raise a local notification. Always stored unread. Returns its id.
    pub fn add_notification(&mut self, notification: LocalNotification) -> String {
        let now = now_millis();
        let data = serde_json::to_value(&notification).unwrap_or_default();
        let non_empty = |s: Option<String>| s.filter(|s| !s.is_empty());

        let id = non_empty(notification.id).unwrap_or_else(|| format!("notif_{now}"));
        let title = non_empty(notification.title).unwrap_or_else(|| LOCAL_TITLE.to_string());
        let content = non_empty(notification.message)
            .or(non_empty(notification.content))
            .unwrap_or_default();
        let message = Message::new(
            id.clone(),
            notification.kind.unwrap_or_default(),
            title,
            content,
            notification.timestamp.filter(|t| *t != 0).unwrap_or(now),
        )
        .with_priority(notification.priority.unwrap_or_default())
        .with_data(data);

        self.ingest(message);
        id
    }

    /// Store a diagnostic message. Returns its id.
    pub fn test_message(&mut self, kind: NotificationType, priority: Priority) -> String {
        let now = now_millis();
        let sent_at = DateTime::from_timestamp_millis(now)
            .map(|t| t.format("%Y-%m-%d %H:%M:%S").to_string())
            .unwrap_or_default();
        let id = format!("test_{now}");
        let message = Message::new(
            id.clone(),
            kind,
            format!("Test message - {kind}"),
            format!("A {priority} priority test message, sent at {sent_at}"),
            now,
        )
        .with_priority(priority);
        self.ingest(message);
        id
    }

    pub fn snapshot(&self) -> PersistedState {
        let messages: Vec<Message> = self.entries.iter().cloned().collect();
        PersistedState {
            notifications: messages.clone(),
            messages,
            last_message_time: self.last_message_time,
            unread_total: self.unread_total,
        }
    }

    /// Rebuild from a snapshot. `messages` is canonical; duplicate ids keep
    /// their first occurrence and the cap is applied. The saved unread total
    /// is kept unless entries had to be dropped, in which case it is
    /// recounted.
    pub fn restore(state: PersistedState) -> Self {
        let saved = state.messages.len();
        let mut seen = HashSet::new();
        let entries: VecDeque<Message> = state
            .messages
            .into_iter()
            .filter(|m| seen.insert(m.id.clone()))
            .take(MAX_ENTRIES)
            .collect();

        let unread_total = if entries.len() == saved {
            state.unread_total
        } else {
            debug!(saved, kept = entries.len(), "dropped duplicate or excess entries on restore");
            entries.iter().filter(|m| !m.read).count()
        };

        Self {
            entries,
            unread_total,
            last_message_time: state.last_message_time,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn msg(id: &str, read: bool, ts: i64) -> Message {
        Message::new(id, NotificationType::Notification, id, "body", ts).with_read(read)
    }

    fn ids(found: Vec<&Message>) -> Vec<String> {
        found.into_iter().map(|m| m.id.clone()).collect()
    }

    fn assert_consistent(store: &NotificationStore) {
        assert_eq!(store.unread_total(), store.unread_count());
        let ids: HashSet<&str> = store.messages().iter().map(|m| m.id.as_str()).collect();
        assert_eq!(ids.len(), store.len());
        assert_eq!(store.messages(), store.notifications());
    }

    #[test]
    fn fresh_unread_then_read() {
        let mut store = NotificationStore::new();
        store.ingest(msg("m1", false, 100));
        assert_eq!(store.unread_total(), 1);
        assert!(store.mark_as_read("m1"));
        assert_eq!(store.unread_total(), 0);
        assert!(!store.mark_as_read("m1"));
        assert!(!store.mark_as_read("missing"));
        assert_eq!(store.unread_total(), 0);
    }

    #[test]
    fn read_to_unread_via_reingest() {
        let mut store = NotificationStore::new();
        store.ingest(msg("m2", true, 100));
        assert_eq!(store.unread_total(), 0);
        let outcome = store.ingest(msg("m2", false, 100));
        assert!(matches!(outcome, Ingest::Updated { previous } if previous.read));
        assert_eq!(store.unread_total(), 1);

        store.ingest(msg("m2", true, 100));
        assert_eq!(store.unread_total(), 0);
        assert_consistent(&store);
    }

    #[test]
    fn reingest_keeps_position_and_length() {
        let mut store = NotificationStore::new();
        store.ingest(msg("a", false, 1));
        store.ingest(msg("b", false, 2));
        store.ingest(msg("c", false, 3));

        let mut updated = msg("b", false, 2);
        updated.title = "edited".into();
        store.ingest(updated);

        let ids: Vec<&str> = store.messages().iter().map(|m| m.id.as_str()).collect();
        assert_eq!(ids, ["c", "b", "a"]);
        assert_eq!(store.get("b").unwrap().title, "edited");
        assert_eq!(store.unread_total(), 3);
    }

    #[test]
    fn cap_evicts_least_recently_inserted() {
        let mut store = NotificationStore::new();
        // Timestamps run backwards so eviction can't be by timestamp.
        for i in 0..MAX_ENTRIES {
            store.ingest(msg(&format!("m{i}"), false, 10_000 - i as i64));
        }
        assert_eq!(store.len(), MAX_ENTRIES);

        let outcome = store.ingest(msg("overflow", false, 0));
        match outcome {
            Ingest::Inserted { evicted: Some(old) } => assert_eq!(old.id, "m0"),
            other => panic!("expected an eviction, got {other:?}"),
        }
        assert_eq!(store.len(), MAX_ENTRIES);
        assert_eq!(store.notifications().len(), MAX_ENTRIES);
        assert_eq!(store.messages().front().unwrap().id, "overflow");
        assert!(store.get("m0").is_none());
        assert_consistent(&store);
    }

    #[test]
    fn mark_all_remove_and_clear() {
        let mut store = NotificationStore::new();
        store.ingest(msg("a", false, 1));
        store.ingest(msg("b", true, 2));
        store.ingest(msg("c", false, 3));

        assert_eq!(store.remove("a").unwrap().id, "a");
        assert_eq!(store.unread_total(), 1);
        assert!(store.remove("a").is_none());
        assert_eq!(store.remove("b").map(|m| m.read), Some(true));
        assert_eq!(store.unread_total(), 1);

        store.ingest(msg("d", false, 4));
        store.mark_all_notifications_as_read();
        assert_eq!(store.unread_total(), 0);
        assert!(store.messages().iter().all(|m| m.read));

        store.clear_notifications();
        assert!(store.is_empty());
        assert_eq!(store.unread_total(), 0);
    }

    #[test]
    fn clear_read_keeps_unread() {
        let mut store = NotificationStore::new();
        store.ingest(msg("a", true, 1));
        store.ingest(msg("b", false, 2));
        store.ingest(msg("c", true, 3));
        assert_eq!(store.clear_read(), 2);
        assert_eq!(store.len(), 1);
        assert_eq!(store.unread_total(), 1);
        assert_consistent(&store);
    }

    #[test]
    fn unread_total_tracks_entries_over_mixed_operations() {
        let mut store = NotificationStore::new();
        // Small LCG so the sequence is fixed but not hand-picked.
        let mut seed: u64 = 0x5eed;
        let mut next = move || {
            seed = seed.wrapping_mul(6364136223846793005).wrapping_add(1442695040888963407);
            (seed >> 33) as usize
        };
        for step in 0..5_000 {
            let id = format!("m{}", next() % 40);
            match next() % 10 {
                0..=4 => {
                    store.ingest(msg(&id, next() % 2 == 0, step));
                }
                5 | 6 => {
                    store.mark_as_read(&id);
                }
                7 => {
                    store.remove(&id);
                }
                8 if next() % 20 == 0 => store.mark_all_as_read(),
                9 if next() % 50 == 0 => store.clear_all(),
                _ => {}
            }
            assert_consistent(&store);
        }
    }

    #[test]
    fn set_unread_total_clamps() {
        let mut store = NotificationStore::new();
        store.set_unread_total(12);
        assert_eq!(store.unread_total(), 12);
        store.set_unread_total(-3);
        assert_eq!(store.unread_total(), 0);

        store.ingest(msg("a", false, 1));
        store.mark_all_as_read();
        store.mark_as_read("a");
        store.remove("a");
        assert_eq!(store.unread_total(), 0);
    }

    #[test]
    fn queries() {
        let mut store = NotificationStore::new();
        store.ingest(
            Message::new("u", NotificationType::SecurityAlert, "Badge misuse", "Lab 3", 300)
                .with_priority(Priority::Urgent),
        );
        store.ingest(
            Message::new("h", NotificationType::SystemMaintenance, "Downtime", "Tonight", 100)
                .with_priority(Priority::High)
                .with_read(true),
        );
        store.ingest(Message::new(
            "n",
            NotificationType::BorrowUpdate,
            "Loan due",
            "Return the LAB camera",
            200,
        ));

        assert_eq!(ids(store.search("lab")), ["n", "u"]);
        assert_eq!(ids(store.search("DOWN")), ["h"]);
        assert_eq!(ids(store.urgent()), ["u"]);
        assert_eq!(ids(store.high_priority()), ["h"]);
        assert_eq!(ids(store.unread()), ["n", "u"]);
        assert_eq!(ids(store.by_type(NotificationType::BorrowUpdate)), ["n"]);
        assert_eq!(ids(store.sorted_by_time()), ["u", "n", "h"]);
        assert_eq!(ids(store.recent(2)), ["u", "n"]);
        assert_eq!(
            ids(store.filter(&MessageFilter::new().between(100, 200))),
            ["n", "h"]
        );
        assert_eq!(store.last_message_time(), 200);

        let stats = store.stats();
        assert_eq!(stats.total, 3);
        assert_eq!(stats.unread, 2);
        assert_eq!(stats.by_priority[&Priority::Urgent], 1);
        assert_eq!(stats.by_type[&NotificationType::SystemMaintenance], 1);
        let json = serde_json::to_value(&stats).unwrap();
        assert_eq!(json["byType"]["security_alert"], 1);
    }

    #[test]
    fn groups_by_utc_day() {
        let mut store = NotificationStore::new();
        let day = 86_400_000;
        store.ingest(msg("a", false, 0));
        store.ingest(msg("b", false, day - 1));
        store.ingest(msg("c", false, day));
        let groups = store.grouped_by_date();
        let first = NaiveDate::from_ymd_opt(1970, 1, 1).unwrap();
        let second = NaiveDate::from_ymd_opt(1970, 1, 2).unwrap();
        assert_eq!(groups[&first].len(), 2);
        assert_eq!(groups[&second][0].id, "c");
    }

    #[test]
    fn local_notifications_get_defaults() {
        let mut store = NotificationStore::new();
        let id = store.add_notification(LocalNotification {
            message: Some("Projector returned".into()),
            ..LocalNotification::default()
        });
        assert!(id.starts_with("notif_"));
        let m = store.get(&id).unwrap();
        assert_eq!(m.title, LOCAL_TITLE);
        assert_eq!(m.content, "Projector returned");
        assert_eq!(m.kind, NotificationType::Notification);
        assert_eq!(m.priority, Priority::Normal);
        assert!(!m.read);
        assert_eq!(m.data["message"], "Projector returned");

        let id = store.add_notification(LocalNotification {
            id: Some("local-1".into()),
            kind: Some(NotificationType::DeviceUpdate),
            title: Some("Device moved".into()),
            content: Some("Shelf B".into()),
            timestamp: Some(42),
            priority: Some(Priority::Low),
            ..LocalNotification::default()
        });
        assert_eq!(id, "local-1");
        let m = store.get("local-1").unwrap();
        assert_eq!((m.timestamp, m.priority), (42, Priority::Low));
        assert_eq!(m.content, "Shelf B");
        assert_eq!(store.unread_total(), 2);
    }

    #[test]
    fn test_messages_are_unread() {
        let mut store = NotificationStore::new();
        let id = store.test_message(NotificationType::System, Priority::High);
        assert!(id.starts_with("test_"));
        let m = store.get(&id).unwrap();
        assert_eq!(m.title, "Test message - system");
        assert_eq!(m.priority, Priority::High);
        assert_eq!(store.unread_total(), 1);
    }

    #[test]
    fn restore_dedupes_and_recounts() {
        let state = PersistedState {
            messages: vec![msg("a", false, 2), msg("a", true, 1), msg("b", true, 0)],
            notifications: Vec::new(),
            last_message_time: 2,
            unread_total: 9,
        };
        let store = NotificationStore::restore(state);
        assert_eq!(store.len(), 2);
        assert!(!store.get("a").unwrap().read);
        assert_eq!(store.unread_total(), 1);
        assert_eq!(store.last_message_time(), 2);
    }

    #[test]
    fn restore_keeps_saved_total_when_nothing_dropped() {
        let mut store = NotificationStore::new();
        store.ingest(msg("a", false, 1));
        store.set_unread_total(7);
        let restored = NotificationStore::restore(store.snapshot());
        assert_eq!(restored.unread_total(), 7);
        assert_eq!(restored.messages(), store.messages());
    }
}
