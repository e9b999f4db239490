//! Clinic Connect message synchronization
//!
//! Keeps an open conversation between two users near-real-time by polling a
//! message store. The polling rate adapts to user activity: a fast interval
//! while the user is active, a slower one once they have been idle, and a
//! halted, disconnected state after repeated failures until activity resumes.

pub mod activity;
pub mod auth;
pub mod clock;
pub mod config;
pub mod events;
pub mod inbox;
pub mod message;
pub mod mode;
pub mod read_state;
pub mod reconciler;
pub mod scheduler;
pub mod session;
pub mod store;

mod error;

pub use activity::ActivityTracker;
pub use auth::AuthContext;
pub use clock::{Clock, ManualClock, SystemClock};
pub use config::PollingConfig;
pub use error::{Result, SyncError};
pub use events::SyncEvent;
pub use inbox::{ConversationSummary, Inbox};
pub use message::{Message, MessageDocument};
pub use mode::{select_mode, PollingMode};
pub use read_state::ReadStateSynchronizer;
pub use reconciler::{merge_messages, Conversation, MergeOutcome};
pub use scheduler::{CycleDecision, PollScheduler, PollStats, PollerState, PollingState};
pub use session::ConversationSession;
pub use store::{JsonFileStore, MemoryMessageStore, MessageStore};
