//! Sync Event System
//!
//! Events emitted by a [`ConversationSession`](crate::ConversationSession)
//! so a UI can re-render and show a disconnected badge.

use crate::message::Message;
use crate::mode::PollingMode;
use std::sync::Arc;

/// Events emitted while a conversation is polled
#[derive(Debug, Clone)]
pub enum SyncEvent {
    /// The poll loop started (or restarted)
    PollingStarted {
        counterpart: String,
        mode: PollingMode,
    },

    /// The mode used for the next interval changed
    ModeChanged {
        counterpart: String,
        mode: PollingMode,
    },

    /// The local message list changed
    MessagesMerged {
        counterpart: String,
        /// Number of messages that were not known before
        added: usize,
        /// Snapshot of the full, ordered conversation after the merge
        messages: Arc<Vec<Message>>,
    },

    /// The unread counter of the conversation changed
    UnreadChanged { counterpart: String, unread: usize },

    /// A fetch failed and will be retried
    PollFailed {
        counterpart: String,
        consecutive_failures: u32,
        error: String,
    },

    /// Too many consecutive failures; polling halted until the next activity
    Disconnected { counterpart: String, reason: String },

    /// A fetch succeeded again after a disconnect
    Reconnected { counterpart: String },

    /// The poll loop stopped because its guard no longer holds
    PollingStopped { counterpart: String },
}

impl SyncEvent {
    /// Conversation this event belongs to
    pub fn counterpart(&self) -> &str {
        match self {
            SyncEvent::PollingStarted { counterpart, .. }
            | SyncEvent::ModeChanged { counterpart, .. }
            | SyncEvent::MessagesMerged { counterpart, .. }
            | SyncEvent::UnreadChanged { counterpart, .. }
            | SyncEvent::PollFailed { counterpart, .. }
            | SyncEvent::Disconnected { counterpart, .. }
            | SyncEvent::Reconnected { counterpart }
            | SyncEvent::PollingStopped { counterpart } => counterpart,
        }
    }

    pub fn is_disconnected(&self) -> bool {
        matches!(self, SyncEvent::Disconnected { .. })
    }
}
