//! Chat message projection.
//!
//! A [`ChatMessage`] is computed from an [`EventRecord`] on read; nothing here
//! is persisted. Every event kind, including unknown ones, projects to some
//! message so a timeline never fails to render.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use strand_store::{EventKind, EventRecord, LocalStatus};
use tracing::debug;

/// Delivery state shown next to a message.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DeliveryStatus {
    /// Sent locally, not yet confirmed.
    Pending,
    /// Confirmed by the remote, or received from it.
    Sent,
    /// Sending failed.
    Failed,
}

impl From<Option<LocalStatus>> for DeliveryStatus {
    fn from(status: Option<LocalStatus>) -> Self {
        match status {
            Some(LocalStatus::Pending) => Self::Pending,
            Some(LocalStatus::Failed) => Self::Failed,
            Some(LocalStatus::Sent) | None => Self::Sent,
        }
    }
}

/// Who sent a message.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageSender {
    /// Sender id.
    #[serde(default)]
    pub id: String,
    /// Display name.
    #[serde(default, alias = "displayname", skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    /// Avatar URL.
    #[serde(default, alias = "avatar_url", skip_serializing_if = "Option::is_none")]
    pub avatar: Option<String>,
}

/// One tappable reply suggestion.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuickReply {
    /// Label.
    pub title: String,
    /// Value sent when chosen.
    #[serde(default)]
    pub value: Option<String>,
}

/// Reply suggestions attached to a message.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QuickReplies {
    /// `radio` or `checkbox`.
    #[serde(rename = "type")]
    pub kind: String,
    /// Choices.
    pub values: Vec<QuickReply>,
    /// Keep the suggestions visible after one is chosen.
    #[serde(default)]
    pub keep_it: Option<bool>,
}

/// UI-facing message.
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatMessage {
    /// Event id (a local placeholder until confirmed).
    pub id: String,
    /// Room.
    pub room_id: String,
    /// Rendered text.
    pub text: String,
    /// Server timestamp in milliseconds.
    pub created_at: i64,
    /// Sender.
    pub user: MessageSender,
    /// Image URL for image messages.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub image: Option<String>,
    /// Video URL for video messages.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub video: Option<String>,
    /// Room-level notice rather than something a person said.
    pub system: bool,
    /// Reply suggestions.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub quick_replies: Option<QuickReplies>,
    /// Delivery state.
    pub status: DeliveryStatus,
}

impl ChatMessage {
    /// Project a record.
    pub fn from_record(record: &EventRecord) -> Self {
        let user = sender_of(record);
        let name = user.name.clone().unwrap_or_else(|| record.sender.clone());

        let mut message = Self {
            id: record.event_id.clone(),
            room_id: record.room_id.clone(),
            text: String::new(),
            created_at: record.origin_server_ts,
            user,
            image: None,
            video: None,
            system: true,
            quick_replies: None,
            status: DeliveryStatus::from(record.local_status),
        };

        let content = &record.content;
        match record.kind() {
            EventKind::RoomMessage => {
                message.system = false;
                message.text = str_field(content, "body").unwrap_or_default().to_owned();
                let url = str_field(content, "url").map(str::to_owned);
                match str_field(content, "msgtype") {
                    Some("m.image") => message.image = url,
                    Some("m.video") => message.video = url,
                    _ => {}
                }
                message.quick_replies = content.get("quick_replies").and_then(decode_embedded);
            }
            EventKind::RoomMember => {
                message.text = membership_text(record, &name);
            }
            EventKind::RoomName => {
                message.text = match str_field(content, "name") {
                    Some(room_name) => format!("{name} renamed the room to {room_name}"),
                    None => format!("{name} removed the room name"),
                };
            }
            EventKind::RoomTopic => {
                message.text = match str_field(content, "topic") {
                    Some(topic) => format!("{name} changed the topic to {topic}"),
                    None => format!("{name} removed the topic"),
                };
            }
            EventKind::RoomCreate => {
                message.text = format!("{name} created the room");
            }
            EventKind::Redaction => {
                message.text = "Message deleted".to_owned();
            }
            EventKind::Reaction => {
                let key = content
                    .get("m.relates_to")
                    .and_then(|r| str_field(r, "key"))
                    .unwrap_or("?");
                message.text = format!("{name} reacted with {key}");
            }
            EventKind::Unknown(tag) => {
                debug!(event_id = %record.event_id, %tag, "unsupported event type");
                message.text = format!("Unsupported event: {tag}");
            }
        }
        message
    }
}

fn str_field<'a>(value: &'a Value, key: &str) -> Option<&'a str> {
    value.get(key).and_then(Value::as_str)
}

/// Decode a structured field stored either inline or as a JSON-encoded string.
fn decode_embedded<T: DeserializeOwned>(raw: &Value) -> Option<T> {
    let decoded = match raw {
        Value::Null => return None,
        Value::String(s) => serde_json::from_str(s),
        other => serde_json::from_value(other.clone()),
    };
    decoded
        .map_err(|e| debug!(error = %e, "ignoring malformed embedded field"))
        .ok()
}

fn sender_of(record: &EventRecord) -> MessageSender {
    let profile = record
        .unsigned
        .as_ref()
        .and_then(|u| u.get("sender_profile"))
        .and_then(decode_embedded::<MessageSender>)
        .unwrap_or_default();
    MessageSender {
        id: record.sender.clone(),
        ..profile
    }
}

fn membership_text(record: &EventRecord, sender_name: &str) -> String {
    let target = str_field(&record.content, "displayname")
        .or(record.state_key.as_deref())
        .unwrap_or(sender_name);
    let membership = record
        .membership
        .as_deref()
        .or_else(|| str_field(&record.content, "membership"));
    match membership {
        Some("join") => format!("{target} joined"),
        Some("leave") if record.state_key.as_deref() == Some(record.sender.as_str()) => {
            format!("{target} left")
        }
        Some("leave") => format!("{target} was removed"),
        Some("invite") => format!("{sender_name} invited {target}"),
        Some("ban") => format!("{target} was banned"),
        Some(other) => format!("{target} membership changed to {other}"),
        None => format!("{target} membership changed"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn record(event_type: &str, content: Value) -> EventRecord {
        EventRecord {
            event_id: "$e".into(),
            room_id: "!r".into(),
            event_type: event_type.into(),
            content,
            origin_server_ts: 42,
            sender: "@alice:x".into(),
            state_key: None,
            txn_id: None,
            membership: None,
            unsigned: None,
            redacts: None,
            local_status: None,
        }
    }

    #[test]
    fn text_message() {
        let msg = ChatMessage::from_record(&record(
            "m.room.message",
            json!({"msgtype": "m.text", "body": "hello"}),
        ));
        assert_eq!(msg.text, "hello");
        assert!(!msg.system);
        assert_eq!(msg.created_at, 42);
        assert_eq!(msg.user.id, "@alice:x");
        assert_eq!(msg.status, DeliveryStatus::Sent);
    }

    #[test]
    fn image_and_video_urls() {
        let image = ChatMessage::from_record(&record(
            "m.room.message",
            json!({"msgtype": "m.image", "body": "pic", "url": "mxc://x/1"}),
        ));
        assert_eq!(image.image.as_deref(), Some("mxc://x/1"));
        assert!(image.video.is_none());

        let video = ChatMessage::from_record(&record(
            "m.room.message",
            json!({"msgtype": "m.video", "url": "mxc://x/2"}),
        ));
        assert_eq!(video.video.as_deref(), Some("mxc://x/2"));
    }

    #[test]
    fn sender_profile_from_unsigned() {
        let mut rec = record("m.room.message", json!({"body": "hi"}));
        rec.unsigned = Some(json!({
            "sender_profile": {"displayname": "Alice", "avatar_url": "mxc://a"}
        }));
        let msg = ChatMessage::from_record(&rec);
        assert_eq!(msg.user.name.as_deref(), Some("Alice"));
        assert_eq!(msg.user.avatar.as_deref(), Some("mxc://a"));
        assert_eq!(msg.user.id, "@alice:x");
    }

    #[test]
    fn sender_profile_encoded_as_string() {
        let mut rec = record("m.room.message", json!({"body": "hi"}));
        rec.unsigned = Some(json!({"sender_profile": "{\"displayname\":\"Al\"}"}));
        assert_eq!(ChatMessage::from_record(&rec).user.name.as_deref(), Some("Al"));
    }

    #[test]
    fn quick_replies_parsed() {
        let msg = ChatMessage::from_record(&record(
            "m.room.message",
            json!({
                "body": "pick",
                "quick_replies": {"type": "radio", "keepIt": true, "values": [{"title": "Yes", "value": "y"}]}
            }),
        ));
        let replies = msg.quick_replies.unwrap();
        assert_eq!(replies.kind, "radio");
        assert_eq!(replies.keep_it, Some(true));
        assert_eq!(replies.values[0].title, "Yes");
    }

    #[test]
    fn malformed_quick_replies_ignored() {
        let msg = ChatMessage::from_record(&record(
            "m.room.message",
            json!({"body": "pick", "quick_replies": "not json"}),
        ));
        assert!(msg.quick_replies.is_none());
        assert_eq!(msg.text, "pick");
    }

    #[test]
    fn membership_is_system_text() {
        let mut rec = record("m.room.member", json!({"membership": "join", "displayname": "Bob"}));
        rec.state_key = Some("@bob:x".into());
        rec.membership = Some("join".into());
        let msg = ChatMessage::from_record(&rec);
        assert!(msg.system);
        assert_eq!(msg.text, "Bob joined");
    }

    #[test]
    fn unknown_kind_renders_placeholder() {
        let msg = ChatMessage::from_record(&record("com.example.widget", json!({})));
        assert!(msg.system);
        assert_eq!(msg.text, "Unsupported event: com.example.widget");
    }

    #[test]
    fn pending_echo_status() {
        let echo = EventRecord::local_echo("!r", "t1", "m.room.message", json!({"body": "yo"}), "@me:x");
        let msg = ChatMessage::from_record(&echo);
        assert_eq!(msg.status, DeliveryStatus::Pending);
        assert_eq!(msg.id, "~!r:t1");
    }

    #[test]
    fn serializes_camel_case() {
        let msg = ChatMessage::from_record(&record("m.room.message", json!({"body": "x"})));
        let value = serde_json::to_value(&msg).unwrap();
        assert_eq!(value["roomId"], "!r");
        assert_eq!(value["createdAt"], 42);
        assert_eq!(value["status"], "sent");
        assert!(value.get("image").is_none());
    }
}
