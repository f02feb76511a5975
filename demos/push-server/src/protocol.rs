//! Frames this server speaks, and the operator's command language.

use lendnotify_core::{NotificationType, now_millis};
use serde::{Deserialize, Serialize};

/// Frames clients send. Anything but `ping` is an application event that is
/// only logged.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientFrame {
    Ping,
    #[serde(other)]
    Event,
}

/// Frames pushed to clients.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerFrame {
    Pong {
        timestamp: i64,
    },
    #[serde(rename_all = "camelCase")]
    Notification {
        #[serde(skip_serializing_if = "Option::is_none")]
        notification_type: Option<String>,
        subject: String,
        content: String,
        /// UTC wall time, `YYYY-mm-dd HH:MM:SS`.
        timestamp: String,
        id: String,
    },
    System {
        title: String,
        content: String,
        timestamp: i64,
        id: String,
    },
}

impl ServerFrame {
    pub fn pong() -> Self {
        ServerFrame::Pong {
            timestamp: now_millis(),
        }
    }
}

/// One parsed operator line.
#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    Push {
        target: Option<String>,
        kind: PushKind,
        subject: String,
        content: String,
    },
    Close {
        code: u16,
    },
}

#[derive(Debug, Clone, PartialEq)]
pub enum PushKind {
    Notification(Option<String>),
    System,
}

const GOING_AWAY: u16 = 1001;

pub fn parse_command(line: &str) -> Result<Command, String> {
    let line = line.trim();
    if line.is_empty() {
        return Err("empty line".into());
    }
    if let Some(rest) = line.strip_prefix("close") {
        if rest.is_empty() || rest.starts_with(' ') {
            let rest = rest.trim();
            let code = if rest.is_empty() {
                GOING_AWAY
            } else {
                rest.parse().map_err(|_| format!("bad close code: {rest}"))?
            };
            return Ok(Command::Close { code });
        }
    }

    let mut rest = line;
    let mut target = None;
    let mut kind = PushKind::Notification(None);
    loop {
        let (word, tail) = rest.split_once(' ').unwrap_or((rest, ""));
        if let Some(user) = word.strip_prefix('@') {
            target = Some(user.to_string());
        } else if let Some(tag) = word.strip_prefix('!') {
            kind = if tag == "SYSTEM" {
                PushKind::System
            } else if NotificationType::from_server_tag(tag).is_some() {
                PushKind::Notification(Some(tag.to_string()))
            } else {
                return Err(format!("unknown sub-type: {tag}"));
            };
        } else {
            break;
        }
        rest = tail.trim_start();
    }

    let (subject, content) = rest.split_once('|').unwrap_or((rest, ""));
    let subject = subject.trim();
    if subject.is_empty() {
        return Err("missing subject".into());
    }
    Ok(Command::Push {
        target,
        kind,
        subject: subject.to_string(),
        content: content.trim().to_string(),
    })
}

/// The `userId` query parameter, percent-decoded.
pub fn user_id_from_query(query: Option<&str>) -> Option<String> {
    query?
        .split('&')
        .filter_map(|pair| pair.split_once('='))
        .find(|(key, _)| *key == "userId")
        .and_then(|(_, value)| urlencoding::decode(value).ok())
        .map(|value| value.into_owned())
        .filter(|value| !value.is_empty())
}
