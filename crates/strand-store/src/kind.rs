//! The [`EventKind`] enum — known event type tags plus an explicit `Unknown`.
//!
//! Type tags arrive as free-form strings from the remote protocol. Parsing is
//! total: anything not listed here becomes [`EventKind::Unknown`] and is still
//! persisted, so callers match on the enum instead of probing a lookup table.

use std::convert::Infallible;
use std::fmt;
use std::str::FromStr;

/// Event kinds the cache knows how to interpret.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum EventKind {
    /// Chat message (`m.room.message`).
    RoomMessage,
    /// Membership change (`m.room.member`).
    RoomMember,
    /// Room display name (`m.room.name`).
    RoomName,
    /// Room topic (`m.room.topic`).
    RoomTopic,
    /// Room creation (`m.room.create`).
    RoomCreate,
    /// Redaction of another event (`m.room.redaction`).
    Redaction,
    /// Annotation on another event (`m.reaction`).
    Reaction,
    /// Any tag not listed above.
    Unknown(String),
}

impl EventKind {
    /// Parse a type tag. Never fails.
    pub fn parse(tag: &str) -> Self {
        match tag {
            "m.room.message" => Self::RoomMessage,
            "m.room.member" => Self::RoomMember,
            "m.room.name" => Self::RoomName,
            "m.room.topic" => Self::RoomTopic,
            "m.room.create" => Self::RoomCreate,
            "m.room.redaction" => Self::Redaction,
            "m.reaction" => Self::Reaction,
            other => Self::Unknown(other.to_owned()),
        }
    }

    /// The wire tag for this kind.
    pub fn as_str(&self) -> &str {
        match self {
            Self::RoomMessage => "m.room.message",
            Self::RoomMember => "m.room.member",
            Self::RoomName => "m.room.name",
            Self::RoomTopic => "m.room.topic",
            Self::RoomCreate => "m.room.create",
            Self::Redaction => "m.room.redaction",
            Self::Reaction => "m.reaction",
            Self::Unknown(tag) => tag,
        }
    }

    /// Whether events of this kind mutate room state.
    pub fn is_state(&self) -> bool {
        matches!(
            self,
            Self::RoomMember | Self::RoomName | Self::RoomTopic | Self::RoomCreate
        )
    }

    /// Whether this kind is outside the known set.
    pub fn is_unknown(&self) -> bool {
        matches!(self, Self::Unknown(_))
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EventKind {
    type Err = Infallible;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        Ok(Self::parse(s))
    }
}
