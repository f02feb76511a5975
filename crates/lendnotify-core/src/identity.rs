//! User identity used to address the push endpoint.
//!
//! The session layer owns who is logged in; this module only defines the
//! accessor the connection manager calls before every attempt.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::str::FromStr;

/// A stable per-user identifier.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct UserId(String);

impl UserId {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for UserId {
    type Err = IdentityError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        if trimmed.is_empty() {
            return Err(IdentityError::Empty);
        }
        Ok(Self(trimmed.to_string()))
    }
}

impl TryFrom<String> for UserId {
    type Error = IdentityError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        s.parse()
    }
}

impl From<UserId> for String {
    fn from(id: UserId) -> Self {
        id.0
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum IdentityError {
    #[error("no user identity available")]
    NoIdentity,
    #[error("user id cannot be empty")]
    Empty,
}

/// Synchronous source of the current user's identifier.
pub trait IdentityProvider: Send + Sync {
    fn user_id(&self) -> Option<UserId>;

    fn resolve(&self) -> Result<UserId, IdentityError> {
        self.user_id().ok_or(IdentityError::NoIdentity)
    }
}

impl<F> IdentityProvider for F
where
    F: Fn() -> Option<UserId> + Send + Sync,
{
    fn user_id(&self) -> Option<UserId> {
        self()
    }
}

/// A fixed identity, or none at all.
#[derive(Debug, Clone, Default)]
pub struct StaticIdentity(Option<UserId>);

impl StaticIdentity {
    pub fn new(id: UserId) -> Self {
        Self(Some(id))
    }

    pub fn none() -> Self {
        Self(None)
    }
}

impl IdentityProvider for StaticIdentity {
    fn user_id(&self) -> Option<UserId> {
        self.0.clone()
    }
}

/// Identity read from the session store's persisted record.
///
/// The id is looked up at `userInfo.id`, `userInfo.userId`, `info.userId`,
/// then `info.id`. Numeric ids are accepted.
#[derive(Debug, Clone, Default)]
pub struct SessionRecordIdentity {
    record: Value,
}

impl SessionRecordIdentity {
    pub fn from_value(record: Value) -> Self {
        Self { record }
    }

    pub fn from_json(text: &str) -> Result<Self, serde_json::Error> {
        Ok(Self::from_value(serde_json::from_str(text)?))
    }
}

const RECORD_ID_PATHS: [(&str, &str); 4] = [
    ("userInfo", "id"),
    ("userInfo", "userId"),
    ("info", "userId"),
    ("info", "id"),
];

impl IdentityProvider for SessionRecordIdentity {
    fn user_id(&self) -> Option<UserId> {
        RECORD_ID_PATHS.iter().find_map(|(section, field)| {
            let value = self.record.get(section)?.get(field)?;
            let text = match value {
                Value::String(s) => s.clone(),
                Value::Number(n) => n.to_string(),
                _ => return None,
            };
            text.parse().ok()
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn parse_user_id() {
        let id: UserId = " 1024 ".parse().unwrap();
        assert_eq!(id.as_str(), "1024");
        assert_eq!("".parse::<UserId>(), Err(IdentityError::Empty));
    }

    #[test]
    fn static_identity() {
        assert_eq!(StaticIdentity::none().resolve(), Err(IdentityError::NoIdentity));
        let id: UserId = "7".parse().unwrap();
        assert_eq!(StaticIdentity::new(id.clone()).resolve(), Ok(id));
    }

    #[test]
    fn closures_are_providers() {
        let provider = || -> Option<UserId> { "u-1".parse().ok() };
        assert_eq!(provider.resolve().unwrap().as_str(), "u-1");
    }

    #[test]
    fn session_record_lookup_order() {
        let record = SessionRecordIdentity::from_value(json!({
            "userInfo": { "userId": "from-user-info" },
            "info": { "id": "from-info" }
        }));
        assert_eq!(record.resolve().unwrap().as_str(), "from-user-info");

        let record = SessionRecordIdentity::from_value(json!({ "info": { "id": 88 } }));
        assert_eq!(record.resolve().unwrap().as_str(), "88");

        let record = SessionRecordIdentity::from_json(r#"{"userInfo": {"id": ""}}"#).unwrap();
        assert_eq!(record.resolve(), Err(IdentityError::NoIdentity));
    }
}
