//! Identifier newtypes.
//!
//! Participant and channel ids are supplied by callers at upgrade time and
//! are treated as opaque strings. Connection ids are minted by the server,
//! one per accepted connection.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

macro_rules! string_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Clone, Debug, Hash, Eq, PartialEq, Ord, PartialOrd, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(String);

        impl $name {
            /// Wrap an existing string without validation.
            pub fn from_raw(s: impl Into<String>) -> Self {
                Self(s.into())
            }

            /// Borrow the underlying string.
            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl FromStr for $name {
            type Err = std::convert::Infallible;
            fn from_str(s: &str) -> Result<Self, Self::Err> {
                Ok(Self(s.to_owned()))
            }
        }

        impl AsRef<str> for $name {
            fn as_ref(&self) -> &str {
                &self.0
            }
        }

        impl From<&str> for $name {
            fn from(s: &str) -> Self {
                Self(s.to_owned())
            }
        }
    };
}

string_id!(
    /// Caller-supplied identity of a participant.
    ParticipantId
);
string_id!(
    /// Name of a stream that clients attach to.
    ChannelId
);
string_id!(
    /// Server-assigned id of one accepted connection.
    ConnectionId
);

impl ConnectionId {
    /// Mint a fresh, time-ordered connection id (`conn_<uuid v7>`).
    pub fn new() -> Self {
        Self(format!("conn_{}", Uuid::now_v7()))
    }
}

impl Default for ConnectionId {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn connection_id_has_prefix() {
        let id = ConnectionId::new();
        assert!(id.as_str().starts_with("conn_"), "got: {id}");
    }

    #[test]
    fn connection_ids_are_unique() {
        assert_ne!(ConnectionId::new(), ConnectionId::new());
    }

    #[test]
    fn participant_id_is_opaque() {
        let id = ParticipantId::from_raw("user 42/α");
        assert_eq!(id.as_str(), "user 42/α");
        assert_eq!(id.to_string(), "user 42/α");
    }

    #[test]
    fn serde_transparent() {
        let id = ChannelId::from_raw("stream-1");
        let json = serde_json::to_string(&id).unwrap();
        assert_eq!(json, "\"stream-1\"");
        let back: ChannelId = serde_json::from_str(&json).unwrap();
        assert_eq!(back, id);
    }

    #[test]
    fn from_str_roundtrip() {
        let id: ParticipantId = "p1".parse().unwrap();
        assert_eq!(id, ParticipantId::from("p1"));
    }
}
