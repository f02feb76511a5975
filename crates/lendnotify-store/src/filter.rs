use lendnotify_core::{Message, NotificationType, Priority};

/// Conjunction of optional constraints. An empty filter matches everything.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MessageFilter {
    pub kind: Option<NotificationType>,
    pub priority: Option<Priority>,
    pub read: Option<bool>,
    /// Inclusive lower bound, epoch millis.
    pub since: Option<i64>,
    /// Inclusive upper bound, epoch millis.
    pub until: Option<i64>,
}

impl MessageFilter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn kind(mut self, kind: NotificationType) -> Self {
        self.kind = Some(kind);
        self
    }

    pub fn priority(mut self, priority: Priority) -> Self {
        self.priority = Some(priority);
        self
    }

    pub fn read(mut self, read: bool) -> Self {
        self.read = Some(read);
        self
    }

    pub fn between(mut self, since: i64, until: i64) -> Self {
        self.since = Some(since);
        self.until = Some(until);
        self
    }

    pub fn matches(&self, message: &Message) -> bool {
        self.kind.is_none_or(|k| message.kind == k)
            && self.priority.is_none_or(|p| message.priority == p)
            && self.read.is_none_or(|r| message.read == r)
            && self.since.is_none_or(|t| message.timestamp >= t)
            && self.until.is_none_or(|t| message.timestamp <= t)
    }
}
