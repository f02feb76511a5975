//! The canonical message value.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// Current wall-clock time in epoch milliseconds.
pub fn now_millis() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or_default()
}

/// Semantic category of a message.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum NotificationType {
    #[default]
    Notification,
    System,
    DeviceUpdate,
    MaintenanceUpdate,
    BorrowUpdate,
    UserUpdate,
    SecurityAlert,
    SystemMaintenance,
}

impl NotificationType {
    pub const ALL: [NotificationType; 8] = [
        NotificationType::Notification,
        NotificationType::System,
        NotificationType::DeviceUpdate,
        NotificationType::MaintenanceUpdate,
        NotificationType::BorrowUpdate,
        NotificationType::UserUpdate,
        NotificationType::SecurityAlert,
        NotificationType::SystemMaintenance,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            NotificationType::Notification => "notification",
            NotificationType::System => "system",
            NotificationType::DeviceUpdate => "device_update",
            NotificationType::MaintenanceUpdate => "maintenance_update",
            NotificationType::BorrowUpdate => "borrow_update",
            NotificationType::UserUpdate => "user_update",
            NotificationType::SecurityAlert => "security_alert",
            NotificationType::SystemMaintenance => "system_maintenance",
        }
    }

    /// Map a server-side sub-type tag (`DEVICE_UPDATE`, ...) to a category.
    pub fn from_server_tag(tag: &str) -> Option<Self> {
        match tag {
            "DEVICE_UPDATE" => Some(NotificationType::DeviceUpdate),
            "MAINTENANCE_UPDATE" => Some(NotificationType::MaintenanceUpdate),
            "BORROW_UPDATE" => Some(NotificationType::BorrowUpdate),
            "USER_UPDATE" => Some(NotificationType::UserUpdate),
            "SECURITY_ALERT" => Some(NotificationType::SecurityAlert),
            "SYSTEM_MAINTENANCE" => Some(NotificationType::SystemMaintenance),
            _ => None,
        }
    }
}

impl fmt::Display for NotificationType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for NotificationType {
    type Err = ParseEnumError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        NotificationType::ALL
            .into_iter()
            .find(|t| t.as_str() == s)
            .ok_or_else(|| ParseEnumError::NotificationType(s.to_string()))
    }
}

/// Display urgency.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum Priority {
    Low,
    #[default]
    Normal,
    High,
    Urgent,
}

/// Presentation style a UI should use for a toast.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ToastKind {
    Success,
    Info,
    Warning,
    Error,
}

impl fmt::Display for ToastKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            ToastKind::Success => "success",
            ToastKind::Info => "info",
            ToastKind::Warning => "warning",
            ToastKind::Error => "error",
        })
    }
}

impl Priority {
    pub const ALL: [Priority; 4] = [
        Priority::Low,
        Priority::Normal,
        Priority::High,
        Priority::Urgent,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Priority::Low => "low",
            Priority::Normal => "normal",
            Priority::High => "high",
            Priority::Urgent => "urgent",
        }
    }

    pub fn toast_kind(&self) -> ToastKind {
        match self {
            Priority::Urgent => ToastKind::Error,
            Priority::High => ToastKind::Warning,
            Priority::Normal => ToastKind::Info,
            Priority::Low => ToastKind::Success,
        }
    }

    /// How long a toast stays up. `None` means it stays until dismissed.
    pub fn toast_duration(&self) -> Option<Duration> {
        match self {
            Priority::Urgent => None,
            Priority::High => Some(Duration::from_millis(5000)),
            Priority::Normal => Some(Duration::from_millis(3000)),
            Priority::Low => Some(Duration::from_millis(2000)),
        }
    }
}

impl fmt::Display for Priority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Priority {
    type Err = ParseEnumError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Priority::ALL
            .into_iter()
            .find(|p| p.as_str() == s)
            .ok_or_else(|| ParseEnumError::Priority(s.to_string()))
    }
}

#[derive(Debug, Clone, thiserror::Error)]
pub enum ParseEnumError {
    #[error("unknown notification type: {0}")]
    NotificationType(String),
    #[error("unknown priority: {0}")]
    Priority(String),
}

/// A notification or event in its adapted, wire-independent form.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    pub id: String,
    #[serde(rename = "type")]
    pub kind: NotificationType,
    pub title: String,
    pub content: String,
    /// Epoch milliseconds.
    pub timestamp: i64,
    pub priority: Priority,
    pub read: bool,
    /// Original server payload, passed through untouched.
    #[serde(default, skip_serializing_if = "serde_json::Value::is_null")]
    pub data: serde_json::Value,
}

impl Message {
    /// An unread message with normal priority and no payload.
    pub fn new(
        id: impl Into<String>,
        kind: NotificationType,
        title: impl Into<String>,
        content: impl Into<String>,
        timestamp: i64,
    ) -> Self {
        Self {
            id: id.into(),
            kind,
            title: title.into(),
            content: content.into(),
            timestamp,
            priority: Priority::Normal,
            read: false,
            data: serde_json::Value::Null,
        }
    }

    pub fn with_priority(mut self, priority: Priority) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_read(mut self, read: bool) -> Self {
        self.read = read;
        self
    }

    pub fn with_data(mut self, data: serde_json::Value) -> Self {
        self.data = data;
        self
    }
}
