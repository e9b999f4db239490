//! Message Reconciler
//!
//! Merges delta-fetch results into the locally held conversation:
//! - de-duplication is by message id only, never by content
//! - the merged set is sorted by creation timestamp ascending, with ties kept
//!   in arrival order so a repeated merge never reorders anything
//! - the local array is replaced as a whole, so a reader holding a snapshot
//!   never observes a half-applied merge
//!
//! Merging the same fetch result twice is a no-op the second time.
//!
//! The delta-fetch watermark is the newest creation time a fetch has
//! returned. Locally sent messages never move it, and the next fetch starts
//! one millisecond before it so messages sharing the boundary timestamp are
//! fetched again and dropped by id.

use crate::message::Message;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::debug;

/// Result of merging one fetch into a conversation
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MergeOutcome {
    /// Messages that were not known before
    pub added: usize,
    /// Newly added messages addressed to the current user and unread
    pub new_incoming: usize,
    /// Known messages whose read flag changed to match the store
    pub read_updates: usize,
    /// Fetched messages that do not belong to this conversation
    pub rejected: usize,
}

impl MergeOutcome {
    pub fn changed(&self) -> bool {
        self.added > 0 || self.read_updates > 0
    }
}

/// Merge `incoming` into `existing`
///
/// Messages whose id is already present only contribute their read flag,
/// the one field that may change after creation.
pub fn merge_messages(
    existing: &[Message],
    incoming: Vec<Message>,
    current_user: &str,
) -> (Vec<Message>, MergeOutcome) {
    let mut merged = existing.to_vec();
    let mut index: HashMap<String, usize> = merged
        .iter()
        .enumerate()
        .map(|(i, msg)| (msg.id().to_string(), i))
        .collect();
    let mut outcome = MergeOutcome::default();

    for message in incoming {
        if let Some(&i) = index.get(message.id()) {
            if merged[i].is_read() != message.is_read() {
                merged[i].set_read(message.is_read());
                outcome.read_updates += 1;
            }
            continue;
        }

        outcome.added += 1;
        if message.is_unread_for(current_user) {
            outcome.new_incoming += 1;
        }
        index.insert(message.id().to_string(), merged.len());
        merged.push(message);
    }

    if outcome.added > 0 {
        // Stable: equal timestamps keep arrival order
        merged.sort_by_key(|msg| msg.created_at());
    }

    (merged, outcome)
}

/// Locally held, eventually-consistent copy of one conversation
#[derive(Debug, Clone)]
pub struct Conversation {
    current_user: String,
    counterpart: String,
    messages: Arc<Vec<Message>>,
    /// Newest `created_at` returned by a fetch
    watermark: Option<i64>,
}

impl Conversation {
    pub fn new(current_user: impl Into<String>, counterpart: impl Into<String>) -> Self {
        Self {
            current_user: current_user.into(),
            counterpart: counterpart.into(),
            messages: Arc::new(Vec::new()),
            watermark: None,
        }
    }

    pub fn current_user(&self) -> &str {
        &self.current_user
    }

    pub fn counterpart(&self) -> &str {
        &self.counterpart
    }

    /// Immutable snapshot of the ordered message list
    pub fn messages(&self) -> Arc<Vec<Message>> {
        Arc::clone(&self.messages)
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    /// Creation time of the newest local message
    pub fn newest_timestamp(&self) -> Option<i64> {
        self.messages.last().map(Message::created_at)
    }

    /// Newest creation time any fetch has returned
    pub fn watermark(&self) -> Option<i64> {
        self.watermark
    }

    /// `since` for the next delta fetch
    ///
    /// The store answers with messages created strictly after `since`, so
    /// this is one below the watermark and the boundary millisecond is
    /// fetched again.
    pub fn fetch_since(&self) -> Option<i64> {
        self.watermark.map(|t| t.saturating_sub(1))
    }

    /// Merge the result of a fetch and advance the watermark
    pub fn merge_fetched(&mut self, fetched: Vec<Message>) -> MergeOutcome {
        let newest = fetched
            .iter()
            .filter(|msg| msg.is_between(&self.current_user, &self.counterpart))
            .map(Message::created_at)
            .max();
        if let Some(newest) = newest {
            if self.watermark.map_or(true, |t| newest > t) {
                self.watermark = Some(newest);
            }
        }
        self.merge(fetched)
    }

    /// Merge messages that did not come from a fetch, e.g. a sent message
    ///
    /// Messages that are not between the two participants are dropped. The
    /// watermark is left alone.
    pub fn merge(&mut self, incoming: Vec<Message>) -> MergeOutcome {
        let total = incoming.len();
        let incoming: Vec<Message> = incoming
            .into_iter()
            .filter(|msg| msg.is_between(&self.current_user, &self.counterpart))
            .collect();
        let rejected = total - incoming.len();
        if rejected > 0 {
            debug!(
                "Dropped {} fetched messages outside conversation with {}",
                rejected, self.counterpart
            );
        }

        let (merged, mut outcome) = merge_messages(&self.messages, incoming, &self.current_user);
        outcome.rejected = rejected;
        if outcome.changed() {
            self.messages = Arc::new(merged);
        }

        debug!(
            "Merged {} fetched messages with {}: {} new, {} read updates",
            total, self.counterpart, outcome.added, outcome.read_updates
        );
        outcome
    }

    /// Mark every unread message addressed to the current user as read
    ///
    /// Returns how many messages changed.
    pub(crate) fn mark_incoming_read(&mut self) -> usize {
        let unread = self
            .messages
            .iter()
            .filter(|msg| msg.is_unread_for(&self.current_user))
            .count();
        if unread == 0 {
            return 0;
        }

        let updated: Vec<Message> = self
            .messages
            .iter()
            .cloned()
            .map(|mut msg| {
                if msg.is_unread_for(&self.current_user) {
                    msg.set_read(true);
                }
                msg
            })
            .collect();
        self.messages = Arc::new(updated);
        unread
    }

    /// Unread messages addressed to the current user
    pub fn unread_count(&self) -> usize {
        self.messages
            .iter()
            .filter(|msg| msg.is_unread_for(&self.current_user))
            .count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const ME: &str = "doctor-1";
    const THEM: &str = "patient-1";

    fn incoming(id: &str, t: i64) -> Message {
        Message::new(id, THEM, ME, format!("message {}", id), t)
    }

    fn outgoing(id: &str, t: i64) -> Message {
        Message::new(id, ME, THEM, format!("message {}", id), t)
    }

    fn ids(conversation: &Conversation) -> Vec<String> {
        conversation
            .messages()
            .iter()
            .map(|m| m.id().to_string())
            .collect()
    }

    #[test]
    fn test_merge_inserts_in_order_without_duplicates() {
        let mut conversation = Conversation::new(ME, THEM);
        conversation.merge(vec![incoming("1", 100), incoming("3", 300)]);

        let outcome = conversation.merge(vec![incoming("2", 200), incoming("3", 300)]);
        assert_eq!(outcome.added, 1);
        assert_eq!(ids(&conversation), vec!["1", "2", "3"]);
        assert_eq!(conversation.newest_timestamp(), Some(300));
    }

    #[test]
    fn test_merge_is_idempotent() {
        let batch = vec![incoming("5", 500), outgoing("4", 400), incoming("6", 400)];

        let mut once = Conversation::new(ME, THEM);
        once.merge(batch.clone());

        let mut twice = Conversation::new(ME, THEM);
        twice.merge(batch.clone());
        let second = twice.merge(batch);

        assert_eq!(second, MergeOutcome::default());
        assert_eq!(*once.messages(), *twice.messages());
        // Equal timestamps keep arrival order
        assert_eq!(ids(&twice), vec!["4", "6", "5"]);
    }

    #[test]
    fn test_dedup_is_by_id_not_content() {
        let a = Message::new("a", THEM, ME, "same text", 100);
        let b = Message::new("b", THEM, ME, "same text", 100);

        let mut conversation = Conversation::new(ME, THEM);
        let outcome = conversation.merge(vec![a, b]);
        assert_eq!(outcome.added, 2);
        assert_eq!(conversation.len(), 2);
    }

    #[test]
    fn test_duplicate_ids_within_one_batch() {
        let mut conversation = Conversation::new(ME, THEM);
        let outcome = conversation.merge(vec![incoming("1", 100), incoming("1", 100)]);
        assert_eq!(outcome.added, 1);
        assert_eq!(conversation.len(), 1);
    }

    #[test]
    fn test_new_incoming_counts_only_unread_addressed_to_me() {
        let mut conversation = Conversation::new(ME, THEM);
        let outcome = conversation.merge(vec![
            incoming("1", 100),
            incoming("2", 200).with_read(true),
            outgoing("3", 300),
        ]);
        assert_eq!(outcome.added, 3);
        assert_eq!(outcome.new_incoming, 1);
    }

    #[test]
    fn test_read_flag_adopted_from_store() {
        let mut conversation = Conversation::new(ME, THEM);
        conversation.merge(vec![incoming("1", 100)]);
        assert_eq!(conversation.unread_count(), 1);

        let outcome = conversation.merge(vec![incoming("1", 100).with_read(true)]);
        assert_eq!(outcome.added, 0);
        assert_eq!(outcome.read_updates, 1);
        assert_eq!(conversation.unread_count(), 0);
    }

    #[test]
    fn test_foreign_messages_rejected() {
        let mut conversation = Conversation::new(ME, THEM);
        let outcome = conversation.merge(vec![
            incoming("1", 100),
            Message::new("2", "patient-9", ME, "wrong thread", 200),
        ]);
        assert_eq!(outcome.added, 1);
        assert_eq!(outcome.rejected, 1);
        assert_eq!(ids(&conversation), vec!["1"]);
    }

    #[test]
    fn test_merge_replaces_snapshot() {
        let mut conversation = Conversation::new(ME, THEM);
        conversation.merge(vec![incoming("1", 100)]);
        let before = conversation.messages();

        conversation.merge(vec![incoming("2", 200)]);
        // The old snapshot is untouched
        assert_eq!(before.len(), 1);
        assert_eq!(conversation.len(), 2);

        // A no-op merge keeps the same allocation
        let current = conversation.messages();
        conversation.merge(vec![incoming("2", 200)]);
        assert!(Arc::ptr_eq(&current, &conversation.messages()));
    }

    #[test]
    fn test_sent_message_does_not_move_watermark() {
        let mut conversation = Conversation::new(ME, THEM);
        conversation.merge_fetched(vec![incoming("1", 100)]);
        assert_eq!(conversation.watermark(), Some(100));

        conversation.merge(vec![outgoing("2", 500)]);
        assert_eq!(conversation.newest_timestamp(), Some(500));
        assert_eq!(conversation.watermark(), Some(100));
        assert_eq!(conversation.fetch_since(), Some(99));
    }

    #[test]
    fn test_watermark_ignores_foreign_and_older_messages() {
        let mut conversation = Conversation::new(ME, THEM);
        assert_eq!(conversation.fetch_since(), None);

        conversation.merge_fetched(vec![
            incoming("1", 300),
            Message::new("x", "patient-9", ME, "wrong thread", 900),
        ]);
        assert_eq!(conversation.watermark(), Some(300));

        conversation.merge_fetched(vec![incoming("0", 200)]);
        assert_eq!(conversation.watermark(), Some(300));
    }

    #[test]
    fn test_boundary_refetch_keeps_same_millisecond_messages() {
        let mut conversation = Conversation::new(ME, THEM);
        conversation.merge_fetched(vec![incoming("a", 1_000)]);

        // Next delta starts below the boundary: "a" comes back with "b"
        let outcome = conversation.merge_fetched(vec![incoming("a", 1_000), incoming("b", 1_000)]);
        assert_eq!(outcome.added, 1);
        assert_eq!(ids(&conversation), vec!["a", "b"]);
    }

    #[test]
    fn test_mark_incoming_read() {
        let mut conversation = Conversation::new(ME, THEM);
        conversation.merge(vec![incoming("1", 100), incoming("2", 200), outgoing("3", 300)]);

        assert_eq!(conversation.mark_incoming_read(), 2);
        assert_eq!(conversation.unread_count(), 0);
        // Outgoing messages are untouched
        assert!(!conversation.messages()[2].is_read());
        assert_eq!(conversation.mark_incoming_read(), 0);
    }
}
