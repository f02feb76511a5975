//! Session wiring shared by the `lendnotify-daemon` and `lendnotify` binaries.

pub mod config;
pub mod session;

pub use config::{CliConfig, DaemonConfig, FileConfig, IdentitySource, SessionFileIdentity};
pub use session::{NotificationSession, SharedStore};
