//! The notification store.
//!
//! One owned, most-recent-first collection of messages with an unread
//! counter that is reconciled on every mutation. The "notifications" view
//! has the same membership as "messages"; it exists for callers that still
//! read both.

mod filter;
mod persist;
mod store;

pub use filter::MessageFilter;
pub use persist::{PersistError, PersistedState};
pub use store::{Ingest, LocalNotification, MAX_ENTRIES, MessageStats, NotificationStore};
