//! Conversation list for the current user
//!
//! Groups every message involving the current user by counterpart and keeps
//! one summary row per conversation, newest first.

use crate::auth::AuthContext;
use crate::message::Message;
use crate::read_state::ReadStateSynchronizer;
use crate::store::MessageStore;
use crate::Result;
use serde::Serialize;
use std::collections::HashMap;
use tracing::debug;

/// Length of the preview text, in characters
const PREVIEW_CHARS: usize = 80;

/// Summary of a conversation for list display
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ConversationSummary {
    /// The other participant
    pub counterpart: String,
    /// Preview of the latest message
    pub preview: String,
    /// Timestamp of the latest message (ms since epoch)
    pub last_timestamp: i64,
    /// Unread messages from the counterpart
    pub unread_count: usize,
}

#[derive(Debug, Clone)]
pub struct Inbox {
    read_state: ReadStateSynchronizer,
    latest: HashMap<String, Message>,
}

impl Inbox {
    pub fn new(current_user: impl Into<String>) -> Self {
        Self {
            read_state: ReadStateSynchronizer::new(current_user),
            latest: HashMap::new(),
        }
    }

    /// Load every conversation of the authenticated user from `store`
    pub async fn load(store: &dyn MessageStore, auth: &AuthContext) -> Result<Self> {
        let messages = store.fetch_all_messages(auth).await?;
        let mut inbox = Self::new(auth.user_id());
        inbox.ingest(&messages);
        Ok(inbox)
    }

    pub fn current_user(&self) -> &str {
        self.read_state.current_user()
    }

    /// Rebuild the inbox from the full message set
    ///
    /// Messages not involving the current user are ignored.
    pub fn ingest(&mut self, messages: &[Message]) {
        let current_user = self.read_state.current_user().to_string();
        self.latest.clear();

        for msg in messages {
            let Some(counterpart) = msg.counterpart_of(&current_user) else {
                continue;
            };
            // Ties go to the later message in the input
            let is_latest = self
                .latest
                .get(counterpart)
                .map_or(true, |existing| msg.created_at() >= existing.created_at());
            if is_latest {
                self.latest.insert(counterpart.to_string(), msg.clone());
            }
        }

        self.read_state.recompute_unread(messages);
        debug!(
            "Inbox for {} has {} conversations, {} unread",
            current_user,
            self.latest.len(),
            self.total_unread()
        );
    }

    /// One row per conversation, most recent first
    pub fn summaries(&self) -> Vec<ConversationSummary> {
        let mut summaries: Vec<ConversationSummary> = self
            .latest
            .iter()
            .map(|(counterpart, msg)| ConversationSummary {
                counterpart: counterpart.clone(),
                preview: preview(msg.body()),
                last_timestamp: msg.created_at(),
                unread_count: self.read_state.unread_for(counterpart),
            })
            .collect();

        summaries.sort_by(|a, b| {
            b.last_timestamp
                .cmp(&a.last_timestamp)
                .then_with(|| a.counterpart.cmp(&b.counterpart))
        });
        summaries
    }

    pub fn unread_for(&self, counterpart: &str) -> usize {
        self.read_state.unread_for(counterpart)
    }

    pub fn total_unread(&self) -> usize {
        self.read_state.total_unread()
    }

    pub fn len(&self) -> usize {
        self.latest.len()
    }

    pub fn is_empty(&self) -> bool {
        self.latest.is_empty()
    }
}

fn preview(body: &str) -> String {
    let first_line = body.lines().next().unwrap_or("");
    if first_line.chars().count() > PREVIEW_CHARS {
        let truncated: String = first_line.chars().take(PREVIEW_CHARS).collect();
        format!("{}...", truncated)
    } else {
        first_line.to_string()
    }
}
