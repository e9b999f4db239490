//! Read-State Synchronizer
//!
//! Keeps per-conversation unread counters for the current user and flips
//! read flags when a conversation is viewed. The local update is optimistic:
//! if persisting it fails, nothing is rolled back and a later fetch brings the
//! store's read flags back in.

use crate::auth::AuthContext;
use crate::message::Message;
use crate::reconciler::Conversation;
use crate::store::MessageStore;
use crate::Result;
use std::collections::HashMap;
use tracing::{debug, warn};

/// Unread counters keyed by counterpart id
#[derive(Debug, Clone, Default)]
pub struct ReadStateSynchronizer {
    current_user: String,
    unread: HashMap<String, usize>,
}

impl ReadStateSynchronizer {
    pub fn new(current_user: impl Into<String>) -> Self {
        Self {
            current_user: current_user.into(),
            unread: HashMap::new(),
        }
    }

    pub fn current_user(&self) -> &str {
        &self.current_user
    }

    /// Unread messages from `counterpart` addressed to the current user
    pub fn unread_for(&self, counterpart: &str) -> usize {
        self.unread.get(counterpart).copied().unwrap_or(0)
    }

    pub fn total_unread(&self) -> usize {
        self.unread.values().sum()
    }

    pub fn counters(&self) -> &HashMap<String, usize> {
        &self.unread
    }

    /// Rebuild every counter from the full message set
    ///
    /// Returns `true` if any counter changed.
    pub fn recompute_unread(&mut self, messages: &[Message]) -> bool {
        let mut unread: HashMap<String, usize> = HashMap::new();
        for msg in messages
            .iter()
            .filter(|msg| msg.is_unread_for(&self.current_user))
        {
            *unread.entry(msg.sender_id().to_string()).or_insert(0) += 1;
        }

        let changed = unread != self.unread;
        self.unread = unread;
        changed
    }

    /// Rebuild the counter of a single conversation
    ///
    /// Returns the new count.
    pub fn recompute_conversation(&mut self, conversation: &Conversation) -> usize {
        let count = conversation.unread_count();
        if count == 0 {
            self.unread.remove(conversation.counterpart());
        } else {
            self.unread
                .insert(conversation.counterpart().to_string(), count);
        }
        count
    }

    /// Flip read flags and reset the counter without touching the store
    pub fn mark_local(&mut self, conversation: &mut Conversation) -> usize {
        let marked = conversation.mark_incoming_read();
        self.unread.remove(conversation.counterpart());
        debug!(
            "Marked {} messages from {} as read",
            marked,
            conversation.counterpart()
        );
        marked
    }

    /// Mark a conversation read, locally first, then in the store
    ///
    /// On success returns the number of messages flipped locally. On error
    /// the local flags and the counter have already been updated and stay
    /// that way.
    pub async fn mark_conversation_read(
        &mut self,
        conversation: &mut Conversation,
        store: &dyn MessageStore,
        auth: &AuthContext,
    ) -> Result<usize> {
        let marked = self.mark_local(conversation);
        Self::persist_read(store, auth, conversation.counterpart()).await?;
        Ok(marked)
    }

    /// Write the read flags of a conversation to the store
    ///
    /// Failures are logged here and returned; callers decide whether they
    /// matter.
    pub async fn persist_read(
        store: &dyn MessageStore,
        auth: &AuthContext,
        counterpart: &str,
    ) -> Result<()> {
        store.mark_read(auth, counterpart).await.map_err(|e| {
            warn!("Failed to persist read state for {}: {}", counterpart, e);
            e
        })
    }
}
