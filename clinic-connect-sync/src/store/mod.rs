//! Message Store collaborator
//!
//! The store owns the message set; sessions hold a read-through copy. A store
//! handle is passed into each [`ConversationSession`](crate::ConversationSession)
//! explicitly, there is no process-wide client.
//!
//! Implementations:
//! - [`MemoryMessageStore`]: in-process store with failure injection
//! - [`JsonFileStore`]: JSON document store on disk

mod json_file;
mod memory;

pub use json_file::JsonFileStore;
pub use memory::MemoryMessageStore;

use crate::auth::AuthContext;
use crate::message::Message;
use crate::{Result, SyncError};
use async_trait::async_trait;

/// Operations the sync subsystem needs from a message store
///
/// Every call is authorized with the [`AuthContext`]; a logged-out context
/// fails with [`SyncError::Unauthorized`].
#[async_trait]
pub trait MessageStore: Send + Sync {
    /// Messages between the current user and `counterpart_id`, ascending by
    /// creation time, optionally only those created strictly after `since`
    async fn fetch_messages(
        &self,
        auth: &AuthContext,
        counterpart_id: &str,
        since: Option<i64>,
    ) -> Result<Vec<Message>>;

    /// Every message sent or received by the current user
    async fn fetch_all_messages(&self, auth: &AuthContext) -> Result<Vec<Message>>;

    /// Persist a new message and return it with its assigned id and timestamp
    async fn send_message(
        &self,
        auth: &AuthContext,
        receiver_id: &str,
        body: &str,
    ) -> Result<Message>;

    /// Flip the read flag of every message from `counterpart_id` to the current user
    async fn mark_read(&self, auth: &AuthContext, counterpart_id: &str) -> Result<()>;
}

pub(crate) fn authorize(auth: &AuthContext) -> Result<()> {
    if auth.is_authenticated() {
        Ok(())
    } else {
        Err(SyncError::Unauthorized(format!(
            "user {} is logged out",
            auth.user_id()
        )))
    }
}

/// Messages of one conversation after `since`, sorted ascending
pub(crate) fn select_conversation<'a>(
    messages: impl IntoIterator<Item = &'a Message>,
    user_id: &str,
    counterpart_id: &str,
    since: Option<i64>,
) -> Vec<Message> {
    let mut selected: Vec<Message> = messages
        .into_iter()
        .filter(|msg| msg.is_between(user_id, counterpart_id))
        .filter(|msg| since.map_or(true, |since| msg.created_at() > since))
        .cloned()
        .collect();
    selected.sort_by_key(Message::created_at);
    selected
}

/// Flip read flags in place, returning how many changed
pub(crate) fn apply_mark_read<'a>(
    messages: impl IntoIterator<Item = &'a mut Message>,
    user_id: &str,
    counterpart_id: &str,
) -> usize {
    let mut changed = 0;
    for msg in messages {
        if msg.sender_id() == counterpart_id && msg.is_unread_for(user_id) {
            msg.set_read(true);
            changed += 1;
        }
    }
    changed
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_select_conversation_filters_and_sorts() {
        let messages = vec![
            Message::new("3", "a", "b", "x", 300),
            Message::new("1", "b", "a", "x", 100),
            Message::new("2", "a", "c", "x", 200),
            Message::new("4", "b", "a", "x", 50),
        ];

        let all = select_conversation(&messages, "a", "b", None);
        let ids: Vec<&str> = all.iter().map(Message::id).collect();
        assert_eq!(ids, vec!["4", "1", "3"]);

        let delta = select_conversation(&messages, "a", "b", Some(100));
        let ids: Vec<&str> = delta.iter().map(Message::id).collect();
        assert_eq!(ids, vec!["3"]);
    }

    #[test]
    fn test_apply_mark_read_only_touches_incoming() {
        let mut messages = vec![
            Message::new("1", "b", "a", "x", 100),
            Message::new("2", "a", "b", "x", 200),
            Message::new("3", "c", "a", "x", 300),
        ];
        assert_eq!(apply_mark_read(messages.iter_mut(), "a", "b"), 1);
        assert!(messages[0].is_read());
        assert!(!messages[1].is_read());
        assert!(!messages[2].is_read());
    }

    #[test]
    fn test_authorize() {
        let auth = AuthContext::new("a");
        assert!(authorize(&auth).is_ok());
        auth.logout();
        assert!(matches!(authorize(&auth), Err(SyncError::Unauthorized(_))));
    }
}
