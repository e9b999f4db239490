//! Messages and their wire representation
//!
//! A [`Message`] is immutable after creation except for its read flag. The
//! store exchanges [`MessageDocument`]s; every document is validated into a
//! `Message` at the boundary and rejected with
//! [`SyncError::MalformedResponse`] when a required field is missing or
//! invalid.
//!
//! ## Document shape
//!
//! ```json
//! {
//!     "_id": "6a1f...",
//!     "senderId": "doctor-7",
//!     "receiverId": "patient-42",
//!     "content": "Please take the new dose with food.",
//!     "createdAt": 1700000000000,
//!     "read": false
//! }
//! ```

use crate::{Result, SyncError};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A single message between two participants
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    id: String,
    sender_id: String,
    receiver_id: String,
    body: String,
    /// UNIX epoch timestamp in milliseconds
    created_at: i64,
    read: bool,
}

impl Message {
    /// Create an unread message with an explicit id and timestamp
    pub fn new(
        id: impl Into<String>,
        sender_id: impl Into<String>,
        receiver_id: impl Into<String>,
        body: impl Into<String>,
        created_at: i64,
    ) -> Self {
        Self {
            id: id.into(),
            sender_id: sender_id.into(),
            receiver_id: receiver_id.into(),
            body: body.into(),
            created_at,
            read: false,
        }
    }

    /// Create a message as a store would: fresh id, current time
    pub fn compose(
        sender_id: impl Into<String>,
        receiver_id: impl Into<String>,
        body: impl Into<String>,
    ) -> Self {
        Self::new(
            Uuid::new_v4().to_string(),
            sender_id,
            receiver_id,
            body,
            Utc::now().timestamp_millis(),
        )
    }

    /// Builder-style read flag
    pub fn with_read(mut self, read: bool) -> Self {
        self.read = read;
        self
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn sender_id(&self) -> &str {
        &self.sender_id
    }

    pub fn receiver_id(&self) -> &str {
        &self.receiver_id
    }

    pub fn body(&self) -> &str {
        &self.body
    }

    pub fn created_at(&self) -> i64 {
        self.created_at
    }

    pub fn is_read(&self) -> bool {
        self.read
    }

    /// Flip the read flag. This is the only mutation a message allows.
    pub fn set_read(&mut self, read: bool) {
        self.read = read;
    }

    /// Whether this message was exchanged between `a` and `b`, in either direction
    pub fn is_between(&self, a: &str, b: &str) -> bool {
        (self.sender_id == a && self.receiver_id == b)
            || (self.sender_id == b && self.receiver_id == a)
    }

    /// The other participant from `user_id`'s point of view
    pub fn counterpart_of(&self, user_id: &str) -> Option<&str> {
        if self.receiver_id == user_id {
            Some(&self.sender_id)
        } else if self.sender_id == user_id {
            Some(&self.receiver_id)
        } else {
            None
        }
    }

    /// Unread and addressed to `user_id`
    pub fn is_unread_for(&self, user_id: &str) -> bool {
        !self.read && self.receiver_id == user_id
    }

    /// Convert into the store's document shape
    pub fn to_document(&self) -> MessageDocument {
        MessageDocument {
            id: Some(self.id.clone()),
            sender_id: Some(self.sender_id.clone()),
            receiver_id: Some(self.receiver_id.clone()),
            content: Some(self.body.clone()),
            created_at: Some(self.created_at),
            read: Some(self.read),
        }
    }
}

/// Message as stored and transferred by the message store
///
/// All fields are optional so that a missing field is reported as a
/// malformed document instead of a generic deserialization error.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageDocument {
    #[serde(rename = "_id", default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sender_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub receiver_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub read: Option<bool>,
}

impl MessageDocument {
    /// Parse a raw JSON value into a validated message
    pub fn parse_value(value: serde_json::Value) -> Result<Message> {
        let document: MessageDocument = serde_json::from_value(value)
            .map_err(|e| SyncError::malformed(format!("message document: {}", e)))?;
        Message::try_from(document)
    }
}

fn required(field: Option<String>, name: &str) -> Result<String> {
    match field {
        Some(value) if !value.trim().is_empty() => Ok(value),
        Some(_) => Err(SyncError::malformed(format!("empty field '{}'", name))),
        None => Err(SyncError::malformed(format!("missing field '{}'", name))),
    }
}

impl TryFrom<MessageDocument> for Message {
    type Error = SyncError;

    fn try_from(document: MessageDocument) -> Result<Self> {
        let id = required(document.id, "_id")?;
        let sender_id = required(document.sender_id, "senderId")?;
        let receiver_id = required(document.receiver_id, "receiverId")?;
        let body = document
            .content
            .ok_or_else(|| SyncError::malformed(format!("message {} has no content", id)))?;
        let created_at = document
            .created_at
            .ok_or_else(|| SyncError::malformed(format!("message {} has no createdAt", id)))?;
        if created_at < 0 {
            return Err(SyncError::malformed(format!(
                "message {} has negative createdAt {}",
                id, created_at
            )));
        }

        Ok(Self {
            id,
            sender_id,
            receiver_id,
            body,
            created_at,
            read: document.read.unwrap_or(false),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_compose_assigns_id_and_timestamp() {
        let before = Utc::now().timestamp_millis();
        let msg = Message::compose("doctor-1", "patient-1", "Hello");
        assert!(!msg.id().is_empty());
        assert!(msg.created_at() >= before);
        assert!(!msg.is_read());
    }

    #[test]
    fn test_counterpart() {
        let msg = Message::new("1", "doctor-1", "patient-1", "hi", 100);
        assert_eq!(msg.counterpart_of("doctor-1"), Some("patient-1"));
        assert_eq!(msg.counterpart_of("patient-1"), Some("doctor-1"));
        assert_eq!(msg.counterpart_of("nurse-1"), None);
        assert!(msg.is_between("patient-1", "doctor-1"));
        assert!(!msg.is_between("patient-1", "nurse-1"));
    }

    #[test]
    fn test_unread_for() {
        let mut msg = Message::new("1", "doctor-1", "patient-1", "hi", 100);
        assert!(msg.is_unread_for("patient-1"));
        assert!(!msg.is_unread_for("doctor-1"));

        msg.set_read(true);
        assert!(!msg.is_unread_for("patient-1"));
    }

    #[test]
    fn test_parse_valid_document() {
        let msg = MessageDocument::parse_value(json!({
            "_id": "abc",
            "senderId": "doctor-1",
            "receiverId": "patient-1",
            "content": "Take two tablets",
            "createdAt": 1700000000000i64,
            "read": true
        }))
        .unwrap();

        assert_eq!(msg.id(), "abc");
        assert_eq!(msg.body(), "Take two tablets");
        assert!(msg.is_read());
    }

    #[test]
    fn test_parse_defaults_read_to_false() {
        let msg = MessageDocument::parse_value(json!({
            "_id": "abc",
            "senderId": "doctor-1",
            "receiverId": "patient-1",
            "content": "",
            "createdAt": 5
        }))
        .unwrap();
        assert!(!msg.is_read());
        assert_eq!(msg.body(), "");
    }

    #[test]
    fn test_parse_rejects_missing_fields() {
        let err = MessageDocument::parse_value(json!({
            "senderId": "doctor-1",
            "receiverId": "patient-1",
            "content": "x",
            "createdAt": 5
        }))
        .unwrap_err();
        assert!(matches!(err, SyncError::MalformedResponse(_)));
        assert!(err.to_string().contains("_id"));

        let err = MessageDocument::parse_value(json!({
            "_id": "abc",
            "senderId": "doctor-1",
            "receiverId": "patient-1",
            "content": "x"
        }))
        .unwrap_err();
        assert!(err.to_string().contains("createdAt"));
    }

    #[test]
    fn test_parse_rejects_wrong_shape() {
        let err = MessageDocument::parse_value(json!(["not", "an", "object"])).unwrap_err();
        assert!(matches!(err, SyncError::MalformedResponse(_)));

        let err = MessageDocument::parse_value(json!({
            "_id": "abc",
            "senderId": "doctor-1",
            "receiverId": "patient-1",
            "content": "x",
            "createdAt": "yesterday"
        }))
        .unwrap_err();
        assert!(matches!(err, SyncError::MalformedResponse(_)));
    }

    #[test]
    fn test_parse_rejects_negative_timestamp() {
        let err = MessageDocument::parse_value(json!({
            "_id": "abc",
            "senderId": "doctor-1",
            "receiverId": "patient-1",
            "content": "x",
            "createdAt": -1
        }))
        .unwrap_err();
        assert!(matches!(err, SyncError::MalformedResponse(_)));
    }

    #[test]
    fn test_document_conversion_preserves_fields() {
        let msg = Message::new("7", "a", "b", "body", 42).with_read(true);
        let parsed = Message::try_from(msg.to_document()).unwrap();
        assert_eq!(parsed, msg);
    }
}
