//! Identifiers and the free-form context map shared by every crate.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Free-form key/value data handed to content resolvers, placeholders and
/// event handlers. Handlers read the keys they care about and ignore the rest.
pub type Context = serde_json::Map<String, serde_json::Value>;

/// Destination of a broadcast (a Telegram chat or user id).
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct RecipientId(pub i64);

impl fmt::Display for RecipientId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<i64> for RecipientId {
    fn from(value: i64) -> Self {
        Self(value)
    }
}

/// Identity of one mailer, used as the registry and storage key.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct MailerId(pub i64);

impl fmt::Display for MailerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<i64> for MailerId {
    fn from(value: i64) -> Self {
        Self(value)
    }
}

impl std::str::FromStr for MailerId {
    type Err = std::num::ParseIntError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        s.trim().parse::<i64>().map(Self)
    }
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ids_serialize_as_plain_integers() {
        assert_eq!(serde_json::to_string(&RecipientId(42)).unwrap(), "42");
        let id: MailerId = serde_json::from_str("-7").unwrap();
        assert_eq!(id, MailerId(-7));
    }

    #[test]
    fn mailer_id_parses_from_str() {
        assert_eq!(" 123 ".parse::<MailerId>().unwrap(), MailerId(123));
        assert!("abc".parse::<MailerId>().is_err());
    }
}
