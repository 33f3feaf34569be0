//! Event records and their merge rules.
//!
//! An [`EventRecord`] is the durable unit of the cache: one protocol event
//! normalized into a flat shape, keyed by `event_id`. Records arrive either
//! from the remote feed (via [`ProtocolEvent::into_record`]) or from this
//! client as an optimistic local echo ([`EventRecord::local_echo`]).
//!
//! Duplicates are reconciled with [`merge_by_presence`]: the stored copy wins
//! for every field it has, and only fields it lacks are taken from the newer
//! copy. The function is pure; callers replace their copy with the result.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::errors::{Result, StoreError};
use crate::kind::EventKind;

/// Delivery state of a locally originated event.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LocalStatus {
    /// Sent by this client, not yet confirmed by the remote source.
    Pending,
    /// Confirmed: the remote source assigned a permanent id.
    Sent,
    /// The send failed; the echo stays visible with an error flag.
    Failed,
}

impl LocalStatus {
    /// Column value.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Sent => "sent",
            Self::Failed => "failed",
        }
    }

    /// Parse a column value.
    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "pending" => Some(Self::Pending),
            "sent" => Some(Self::Sent),
            "failed" => Some(Self::Failed),
            _ => None,
        }
    }
}

/// One persisted event.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct EventRecord {
    /// Globally unique id. Local echoes use [`local_echo_id`] until confirmed.
    pub event_id: String,
    /// Conversation the event belongs to.
    pub room_id: String,
    /// Event type tag.
    #[serde(rename = "type")]
    pub event_type: String,
    /// Structured payload.
    pub content: Value,
    /// Server timestamp in milliseconds.
    pub origin_server_ts: i64,
    /// Actor that sent the event.
    pub sender: String,
    /// Present only on state events.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub state_key: Option<String>,
    /// Client transaction id, present on events this client originated.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub txn_id: Option<String>,
    /// Membership value for member events.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub membership: Option<String>,
    /// Side-channel metadata.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub unsigned: Option<Value>,
    /// Event this one redacts.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub redacts: Option<String>,
    /// Delivery state, only on local echoes.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub local_status: Option<LocalStatus>,
}

impl EventRecord {
    /// Build an optimistic echo for an event this client is about to send.
    pub fn local_echo(
        room_id: &str,
        txn_id: &str,
        event_type: &str,
        content: Value,
        sender: &str,
    ) -> Self {
        Self {
            event_id: local_echo_id(room_id, txn_id),
            room_id: room_id.to_owned(),
            event_type: event_type.to_owned(),
            content,
            origin_server_ts: chrono::Utc::now().timestamp_millis(),
            sender: sender.to_owned(),
            state_key: None,
            txn_id: Some(txn_id.to_owned()),
            membership: None,
            unsigned: None,
            redacts: None,
            local_status: Some(LocalStatus::Pending),
        }
    }

    /// The parsed event kind.
    pub fn kind(&self) -> EventKind {
        EventKind::parse(&self.event_type)
    }

    /// Originated here and still waiting for the remote source.
    pub fn is_pending_echo(&self) -> bool {
        self.txn_id.is_some() && self.local_status == Some(LocalStatus::Pending)
    }

    /// Whether the id is still a client-generated placeholder.
    pub fn has_local_id(&self) -> bool {
        self.event_id.starts_with(LOCAL_ID_PREFIX)
    }
}

const LOCAL_ID_PREFIX: &str = "~";

/// Placeholder id for a local echo: `~{room_id}:{txn_id}`.
pub fn local_echo_id(room_id: &str, txn_id: &str) -> String {
    format!("{LOCAL_ID_PREFIX}{room_id}:{txn_id}")
}

/// Fresh client transaction id.
pub fn new_txn_id() -> String {
    format!("txn{}", Uuid::now_v7().simple())
}

/// Merge two copies of the same event.
///
/// Every field present on `stored` is kept; fields absent there (`None`, or a
/// null `content`) are taken from `incoming`. Identity fields always come
/// from `stored`.
pub fn merge_by_presence(stored: &EventRecord, incoming: EventRecord) -> EventRecord {
    EventRecord {
        event_id: stored.event_id.clone(),
        room_id: stored.room_id.clone(),
        event_type: stored.event_type.clone(),
        content: if stored.content.is_null() {
            incoming.content
        } else {
            stored.content.clone()
        },
        origin_server_ts: stored.origin_server_ts,
        sender: stored.sender.clone(),
        state_key: stored.state_key.clone().or(incoming.state_key),
        txn_id: stored.txn_id.clone().or(incoming.txn_id),
        membership: stored.membership.clone().or(incoming.membership),
        unsigned: stored.unsigned.clone().or(incoming.unsigned),
        redacts: stored.redacts.clone().or(incoming.redacts),
        local_status: stored.local_status.or(incoming.local_status),
    }
}

/// An event as delivered by the remote protocol's client API.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ProtocolEvent {
    /// Remote-assigned id.
    pub event_id: String,
    /// Type tag.
    #[serde(rename = "type")]
    pub event_type: String,
    /// Payload.
    #[serde(default)]
    pub content: Value,
    /// Server timestamp in milliseconds.
    pub origin_server_ts: i64,
    /// Sender id.
    pub sender: String,
    /// State key for state events.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub state_key: Option<String>,
    /// Unsigned metadata; `transaction_id` marks this client's own echoes.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub unsigned: Option<Value>,
    /// Redaction target.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub redacts: Option<String>,
}

impl ProtocolEvent {
    /// Decode a raw JSON event.
    pub fn from_json(raw: &Value) -> Result<Self> {
        let event: Self = serde_json::from_value(raw.clone())?;
        if event.event_id.is_empty() {
            return Err(StoreError::InvalidEvent("missing event_id".into()));
        }
        Ok(event)
    }

    /// Normalize into a record for `room_id`.
    pub fn into_record(self, room_id: &str) -> EventRecord {
        let txn_id = self
            .unsigned
            .as_ref()
            .and_then(|u| u.get("transaction_id"))
            .and_then(Value::as_str)
            .map(str::to_owned);
        let membership = match EventKind::parse(&self.event_type) {
            EventKind::RoomMember => self
                .content
                .get("membership")
                .and_then(Value::as_str)
                .map(str::to_owned),
            _ => None,
        };

        EventRecord {
            event_id: self.event_id,
            room_id: room_id.to_owned(),
            event_type: self.event_type,
            content: self.content,
            origin_server_ts: self.origin_server_ts,
            sender: self.sender,
            state_key: self.state_key,
            txn_id,
            membership,
            unsigned: self.unsigned,
            redacts: self.redacts,
            local_status: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use serde_json::json;

    fn remote(id: &str, content: Value) -> EventRecord {
        EventRecord {
            event_id: id.into(),
            room_id: "!r1".into(),
            event_type: "m.room.message".into(),
            content,
            origin_server_ts: 1_000,
            sender: "@alice:example.org".into(),
            state_key: None,
            txn_id: None,
            membership: None,
            unsigned: None,
            redacts: None,
            local_status: None,
        }
    }

    #[test]
    fn merge_keeps_stored_content() {
        let stored = remote("$a", json!({"body": "first"}));
        let incoming = remote("$a", json!({"body": "second"}));
        let merged = merge_by_presence(&stored, incoming);
        assert_eq!(merged.content, json!({"body": "first"}));
    }

    #[test]
    fn merge_fills_absent_fields() {
        let stored = remote("$a", json!({"body": "hi"}));
        let mut incoming = remote("$a", json!({"body": "hi"}));
        incoming.txn_id = Some("txn1".into());
        incoming.unsigned = Some(json!({"age": 5}));
        let merged = merge_by_presence(&stored, incoming);
        assert_eq!(merged.txn_id.as_deref(), Some("txn1"));
        assert_eq!(merged.unsigned, Some(json!({"age": 5})));
    }

    #[test]
    fn merge_takes_content_when_stored_is_null() {
        let stored = remote("$a", Value::Null);
        let merged = merge_by_presence(&stored, remote("$a", json!({"body": "late"})));
        assert_eq!(merged.content["body"], "late");
    }

    #[test]
    fn local_echo_is_pending() {
        let echo = EventRecord::local_echo("!r1", "txn9", "m.room.message", json!({}), "@me:x");
        assert_eq!(echo.event_id, "~!r1:txn9");
        assert!(echo.is_pending_echo());
        assert!(echo.has_local_id());
    }

    #[test]
    fn new_txn_ids_are_unique() {
        assert_ne!(new_txn_id(), new_txn_id());
    }

    #[test]
    fn protocol_event_extracts_txn_and_membership() {
        let raw = json!({
            "event_id": "$m1",
            "type": "m.room.member",
            "content": {"membership": "join", "displayname": "Bob"},
            "origin_server_ts": 42,
            "sender": "@bob:x",
            "state_key": "@bob:x",
            "unsigned": {"transaction_id": "txn5"}
        });
        let record = ProtocolEvent::from_json(&raw).unwrap().into_record("!r1");
        assert_eq!(record.room_id, "!r1");
        assert_eq!(record.membership.as_deref(), Some("join"));
        assert_eq!(record.txn_id.as_deref(), Some("txn5"));
        assert_eq!(record.local_status, None);
        assert!(!record.is_pending_echo());
    }

    #[test]
    fn protocol_event_without_content_decodes() {
        let raw = json!({
            "event_id": "$x",
            "type": "org.example.custom",
            "origin_server_ts": 1,
            "sender": "@a:x"
        });
        let record = ProtocolEvent::from_json(&raw).unwrap().into_record("!r");
        assert!(record.content.is_null());
        assert!(record.kind().is_unknown());
    }

    #[test]
    fn protocol_event_rejects_empty_id() {
        let raw = json!({"event_id": "", "type": "m.room.message", "origin_server_ts": 1, "sender": "@a:x"});
        assert!(matches!(
            ProtocolEvent::from_json(&raw),
            Err(StoreError::InvalidEvent(_))
        ));
    }

    #[test]
    fn local_status_round_trip() {
        for status in [LocalStatus::Pending, LocalStatus::Sent, LocalStatus::Failed] {
            assert_eq!(LocalStatus::parse(status.as_str()), Some(status));
        }
        assert_eq!(LocalStatus::parse("bogus"), None);
    }

    fn opt_string() -> impl Strategy<Value = Option<String>> {
        proptest::option::of("[a-z]{1,6}")
    }

    proptest! {
        #[test]
        fn merge_never_overwrites_present_fields(
            stored_key in opt_string(),
            incoming_key in opt_string(),
            stored_body in "[a-z]{1,8}",
            incoming_body in "[a-z]{1,8}",
        ) {
            let mut stored = remote("$p", json!({"body": stored_body}));
            stored.state_key = stored_key.clone();
            let mut incoming = remote("$p", json!({"body": incoming_body}));
            incoming.state_key = incoming_key.clone();

            let merged = merge_by_presence(&stored, incoming);
            prop_assert_eq!(&merged.content, &stored.content);
            prop_assert_eq!(merged.state_key, stored_key.or(incoming_key));
        }

        #[test]
        fn merge_is_idempotent(body in "[a-z]{0,8}") {
            let stored = remote("$q", json!({"body": body}));
            let once = merge_by_presence(&stored, stored.clone());
            prop_assert_eq!(once, stored);
        }
    }
}
