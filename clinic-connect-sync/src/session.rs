//! Conversation Session
//!
//! Owns everything needed to keep one open conversation near-real-time:
//! the injected store handle, the activity tracker, the poll scheduler, the
//! reconciled message list and the unread counter.
//!
//! ## Poll loop
//!
//! One cooperative task per session. Each cycle:
//! 1. delta-fetch from the fetch watermark on (see [`Conversation::fetch_since`])
//! 2. discard the result if the guard stopped holding while the fetch was in flight
//! 3. merge, mark new incoming messages read, recompute unread
//! 4. ask the scheduler for the next delay (mode evaluated now, after the fetch)
//! 5. sleep, unless the session is closed first
//!
//! Steps 1 to 4 run under the session's cycle lock, so a new fetch is never
//! issued before the previous one settled, even when close and reopen spawn a
//! new task while the old one is still waiting on the store. There is no
//! request timeout: a hung fetch delays the next cycle indefinitely.
//!
//! The guard is "conversation selected AND user authenticated". Closing the
//! session cancels a pending sleep immediately; an in-flight fetch is allowed
//! to finish and its result is dropped.
//!
//! ## Example
//!
//! ```rust,ignore
//! let store = Arc::new(JsonFileStore::open(data_dir).await?);
//! let mut session = ConversationSession::new(
//!     "patient-42",
//!     AuthContext::new("doctor-7"),
//!     store,
//!     PollingConfig::default(),
//!     Arc::new(SystemClock),
//! )?;
//! let mut events = session.subscribe();
//! session.open().await;
//! session.send_message("Your results are in.").await?;
//! ```

use crate::activity::ActivityTracker;
use crate::auth::AuthContext;
use crate::clock::Clock;
use crate::config::PollingConfig;
use crate::events::SyncEvent;
use crate::message::Message;
use crate::read_state::ReadStateSynchronizer;
use crate::reconciler::Conversation;
use crate::scheduler::{CycleDecision, PollScheduler, PollStats, PollerState, PollingState};
use crate::store::MessageStore;
use crate::{Result, SyncError};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::{mpsc, oneshot, RwLock};
use tracing::{debug, info, warn};

/// State shared between the session handle and its poll task
struct Shared {
    conversation: RwLock<Conversation>,
    read_state: RwLock<ReadStateSynchronizer>,
    scheduler: RwLock<PollScheduler>,
    /// Held by a poll task from its fetch until the result is applied
    cycle_lock: tokio::sync::Mutex<()>,
    /// Conversation is selected in the UI
    selected: AtomicBool,
    /// Bumped on every start and stop; a task only acts while it matches
    generation: AtomicU64,
    subscribers: Mutex<Vec<mpsc::UnboundedSender<SyncEvent>>>,
}

impl Shared {
    fn emit(&self, event: SyncEvent) {
        let mut subscribers = self
            .subscribers
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        subscribers.retain(|tx| tx.send(event.clone()).is_ok());
    }
}

/// Everything the poll task needs, cloned out of the session
#[derive(Clone)]
struct PollContext {
    counterpart: String,
    auth: AuthContext,
    store: Arc<dyn MessageStore>,
    shared: Arc<Shared>,
    generation: u64,
}

impl PollContext {
    fn is_current(&self) -> bool {
        self.shared.generation.load(Ordering::SeqCst) == self.generation
    }

    fn guard_holds(&self) -> bool {
        self.is_current()
            && self.shared.selected.load(Ordering::SeqCst)
            && self.auth.is_authenticated()
    }

    /// Events of a task that has been superseded are dropped
    fn emit(&self, event: SyncEvent) {
        if self.is_current() {
            self.shared.emit(event);
        }
    }

    /// Merge a fetch result and sync read state
    ///
    /// Returns the number of new messages, or `None` if the guard stopped
    /// holding before the result could be applied.
    async fn apply_fetch(&self, fetched: Vec<Message>) -> Option<usize> {
        let (outcome, marked, unread_before, unread_after, snapshot) = {
            let mut conversation = self.shared.conversation.write().await;
            let mut read_state = self.shared.read_state.write().await;
            if !self.guard_holds() {
                return None;
            }
            let unread_before = read_state.unread_for(&self.counterpart);

            let outcome = conversation.merge_fetched(fetched);
            // The conversation is open, so new incoming messages are read on arrival
            let marked = if outcome.new_incoming > 0 {
                read_state.mark_local(&mut conversation)
            } else {
                0
            };
            let unread_after = read_state.recompute_conversation(&conversation);
            (
                outcome,
                marked,
                unread_before,
                unread_after,
                conversation.messages(),
            )
        };

        if outcome.changed() || marked > 0 {
            self.emit(SyncEvent::MessagesMerged {
                counterpart: self.counterpart.clone(),
                added: outcome.added,
                messages: snapshot,
            });
        }
        if unread_before != unread_after {
            self.emit(SyncEvent::UnreadChanged {
                counterpart: self.counterpart.clone(),
                unread: unread_after,
            });
        }

        if marked > 0 {
            // Logged by persist_read; the local flags stay flipped
            let _ =
                ReadStateSynchronizer::persist_read(&*self.store, &self.auth, &self.counterpart)
                    .await;
        }

        Some(outcome.added)
    }

    /// Fetch, apply and record one cycle
    ///
    /// Returns `None` once the guard stopped holding. Scheduler state is only
    /// written while this task is still the current one.
    async fn run_cycle(
        &self,
        recovering: &mut bool,
        last_error: &mut Option<String>,
    ) -> Option<CycleDecision> {
        let _cycle = self.shared.cycle_lock.lock().await;
        if !self.guard_holds() {
            return None;
        }

        let since = self.shared.conversation.read().await.fetch_since();
        let result = self
            .store
            .fetch_messages(&self.auth, &self.counterpart, since)
            .await;

        if !self.guard_holds() {
            debug!(
                "Discarding fetch result for {}: polling stopped while in flight",
                self.counterpart
            );
            return None;
        }

        match result {
            Ok(fetched) => {
                let added = self.apply_fetch(fetched).await?;
                if *recovering {
                    info!("Reconnected to message store for {}", self.counterpart);
                    self.emit(SyncEvent::Reconnected {
                        counterpart: self.counterpart.clone(),
                    });
                    *recovering = false;
                }

                let mut scheduler = self.shared.scheduler.write().await;
                if !self.guard_holds() {
                    return None;
                }
                Some(scheduler.record_success(added))
            }
            Err(e) => {
                let (decision, failures) = {
                    let mut scheduler = self.shared.scheduler.write().await;
                    if !self.guard_holds() {
                        return None;
                    }
                    let decision = scheduler.record_failure(&e);
                    (decision, scheduler.consecutive_failures())
                };
                self.emit(SyncEvent::PollFailed {
                    counterpart: self.counterpart.clone(),
                    consecutive_failures: failures,
                    error: e.to_string(),
                });
                *last_error = Some(e.user_message());
                Some(decision)
            }
        }
    }
}

async fn poll_loop(ctx: PollContext, mut shutdown_rx: oneshot::Receiver<()>, mut recovering: bool) {
    debug!("Poll loop for {} started", ctx.counterpart);
    let mut last_error: Option<String> = None;

    loop {
        let Some(decision) = ctx.run_cycle(&mut recovering, &mut last_error).await else {
            break;
        };

        match decision {
            CycleDecision::Continue {
                delay,
                mode,
                mode_changed,
            } => {
                if mode_changed {
                    ctx.emit(SyncEvent::ModeChanged {
                        counterpart: ctx.counterpart.clone(),
                        mode,
                    });
                }

                tokio::select! {
                    _ = tokio::time::sleep(delay) => {}
                    _ = &mut shutdown_rx => {
                        debug!("Poll loop for {} cancelled while waiting", ctx.counterpart);
                        return;
                    }
                }
            }
            CycleDecision::Halt => {
                let state = ctx.shared.scheduler.read().await.state();
                if state == PollerState::Disconnected {
                    let reason = last_error
                        .take()
                        .unwrap_or_else(|| "too many failed fetches".to_string());
                    warn!("Polling for {} halted: {}", ctx.counterpart, reason);
                    ctx.emit(SyncEvent::Disconnected {
                        counterpart: ctx.counterpart.clone(),
                        reason,
                    });
                }
                return;
            }
        }
    }

    // Guard dropped. Only the current generation owns the scheduler state.
    if ctx.is_current() {
        ctx.shared.scheduler.write().await.stop();
        info!("Polling for {} stopped", ctx.counterpart);
        ctx.shared.emit(SyncEvent::PollingStopped {
            counterpart: ctx.counterpart.clone(),
        });
    }
}

/// Handle to the currently spawned poll task
struct PollTask {
    shutdown_tx: Option<oneshot::Sender<()>>,
}

impl PollTask {
    fn cancel(&mut self) {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }
    }
}

/// One open conversation kept in sync with the message store
pub struct ConversationSession {
    counterpart: String,
    auth: AuthContext,
    store: Arc<dyn MessageStore>,
    activity: ActivityTracker,
    shared: Arc<Shared>,
    poll_task: Option<PollTask>,
}

impl ConversationSession {
    /// Create a session for the conversation with `counterpart`
    ///
    /// Creating the session counts as activity. Polling starts with [`open`](Self::open).
    pub fn new(
        counterpart: impl Into<String>,
        auth: AuthContext,
        store: Arc<dyn MessageStore>,
        config: PollingConfig,
        clock: Arc<dyn Clock>,
    ) -> Result<Self> {
        config.validate()?;
        let counterpart = counterpart.into();
        let activity = ActivityTracker::new(clock);
        let scheduler = PollScheduler::new(config, activity.clone());

        let shared = Arc::new(Shared {
            conversation: RwLock::new(Conversation::new(auth.user_id(), counterpart.as_str())),
            read_state: RwLock::new(ReadStateSynchronizer::new(auth.user_id())),
            scheduler: RwLock::new(scheduler),
            cycle_lock: tokio::sync::Mutex::new(()),
            selected: AtomicBool::new(false),
            generation: AtomicU64::new(0),
            subscribers: Mutex::new(Vec::new()),
        });

        Ok(Self {
            counterpart,
            auth,
            store,
            activity,
            shared,
            poll_task: None,
        })
    }

    pub fn counterpart(&self) -> &str {
        &self.counterpart
    }

    pub fn auth(&self) -> &AuthContext {
        &self.auth
    }

    /// Receive events for this conversation
    pub fn subscribe(&self) -> mpsc::UnboundedReceiver<SyncEvent> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.shared
            .subscribers
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .push(tx);
        rx
    }

    /// Select the conversation: mark it read and start polling
    ///
    /// A failure to persist the read state is logged. The local counter is
    /// reset regardless.
    pub async fn open(&mut self) {
        let already_open = self.shared.selected.swap(true, Ordering::SeqCst);
        if !already_open {
            info!("Opening conversation with {}", self.counterpart);
        }

        if let Err(e) = self.mark_read().await {
            debug!(
                "Opened conversation with {} before read state was stored: {}",
                self.counterpart, e
            );
        }

        if already_open {
            self.mark_activity().await;
        } else {
            self.activity.mark_activity();
            self.start_polling(false).await;
        }
    }

    /// Deselect the conversation and stop polling
    ///
    /// A pending timer is cancelled right away. A fetch already in flight
    /// finishes in the background and its result is discarded.
    pub async fn close(&mut self) {
        if !self.shared.selected.swap(false, Ordering::SeqCst) {
            return;
        }
        self.cancel_task();
        self.shared.scheduler.write().await.stop();
        info!("Closed conversation with {}", self.counterpart);
        self.shared.emit(SyncEvent::PollingStopped {
            counterpart: self.counterpart.clone(),
        });
    }

    /// Record user activity (typing, sending, selecting)
    ///
    /// Restarts polling if the conversation is open but the loop is not
    /// running, e.g. after a disconnect.
    pub async fn mark_activity(&mut self) {
        self.activity.mark_activity();

        if !self.shared.selected.load(Ordering::SeqCst) || !self.auth.is_authenticated() {
            return;
        }

        let state = self.shared.scheduler.read().await.state();
        match state {
            PollerState::Disconnected => {
                info!(
                    "Activity in disconnected conversation with {}, restarting polling",
                    self.counterpart
                );
                self.start_polling(true).await;
            }
            PollerState::Idle => self.start_polling(false).await,
            PollerState::IntensivePolling | PollerState::NormalPolling => {}
        }
    }

    /// Send a message to the counterpart
    ///
    /// On success the stored message is merged right away; on failure nothing
    /// is appended and the error is returned. The sent message does not move
    /// the fetch watermark, so incoming messages stored before it are still
    /// fetched.
    pub async fn send_message(&mut self, body: &str) -> Result<Message> {
        if body.trim().is_empty() {
            return Err(SyncError::invalid_state("cannot send an empty message"));
        }
        self.mark_activity().await;

        let message = match self
            .store
            .send_message(&self.auth, &self.counterpart, body)
            .await
        {
            Ok(message) => message,
            Err(e) => {
                warn!("Failed to send message to {}: {}", self.counterpart, e);
                return Err(e);
            }
        };

        let (outcome, snapshot) = {
            let mut conversation = self.shared.conversation.write().await;
            let outcome = conversation.merge(vec![message.clone()]);
            (outcome, conversation.messages())
        };
        if outcome.changed() {
            self.shared.emit(SyncEvent::MessagesMerged {
                counterpart: self.counterpart.clone(),
                added: outcome.added,
                messages: snapshot,
            });
        }

        Ok(message)
    }

    /// Mark every message from the counterpart read, locally and in the store
    pub async fn mark_read(&self) -> Result<usize> {
        let (unread_before, marked, snapshot) = {
            let mut conversation = self.shared.conversation.write().await;
            let mut read_state = self.shared.read_state.write().await;
            let unread_before = read_state.unread_for(&self.counterpart);
            let marked = read_state.mark_local(&mut conversation);
            (unread_before, marked, conversation.messages())
        };

        if marked > 0 {
            self.shared.emit(SyncEvent::MessagesMerged {
                counterpart: self.counterpart.clone(),
                added: 0,
                messages: snapshot,
            });
        }
        if unread_before != 0 {
            self.shared.emit(SyncEvent::UnreadChanged {
                counterpart: self.counterpart.clone(),
                unread: 0,
            });
        }

        // Optimistic: the local flags stay flipped even if this fails
        ReadStateSynchronizer::persist_read(&*self.store, &self.auth, &self.counterpart).await?;
        Ok(marked)
    }

    /// Snapshot of the ordered conversation
    pub async fn messages(&self) -> Arc<Vec<Message>> {
        self.shared.conversation.read().await.messages()
    }

    pub async fn unread_count(&self) -> usize {
        self.shared.read_state.read().await.unread_for(&self.counterpart)
    }

    pub async fn status(&self) -> PollerState {
        self.shared.scheduler.read().await.state()
    }

    pub async fn is_disconnected(&self) -> bool {
        self.status().await == PollerState::Disconnected
    }

    pub async fn polling_state(&self) -> PollingState {
        self.shared.scheduler.read().await.polling_state()
    }

    pub async fn stats(&self) -> PollStats {
        self.shared.scheduler.read().await.stats()
    }

    fn cancel_task(&mut self) {
        self.shared.generation.fetch_add(1, Ordering::SeqCst);
        if let Some(mut task) = self.poll_task.take() {
            task.cancel();
        }
    }

    async fn start_polling(&mut self, recovering: bool) {
        if !self.auth.is_authenticated() {
            warn!(
                "Not polling conversation with {}: user is logged out",
                self.counterpart
            );
            return;
        }

        self.cancel_task();
        let generation = self.shared.generation.load(Ordering::SeqCst);

        let mode = {
            let mut scheduler = self.shared.scheduler.write().await;
            scheduler.start();
            scheduler.mode()
        };

        let (shutdown_tx, shutdown_rx) = oneshot::channel();
        let ctx = PollContext {
            counterpart: self.counterpart.clone(),
            auth: self.auth.clone(),
            store: Arc::clone(&self.store),
            shared: Arc::clone(&self.shared),
            generation,
        };
        tokio::spawn(poll_loop(ctx, shutdown_rx, recovering));
        self.poll_task = Some(PollTask {
            shutdown_tx: Some(shutdown_tx),
        });

        self.shared.emit(SyncEvent::PollingStarted {
            counterpart: self.counterpart.clone(),
            mode,
        });
    }
}

impl Drop for ConversationSession {
    fn drop(&mut self) {
        self.shared.selected.store(false, Ordering::SeqCst);
        self.cancel_task();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::store::MemoryMessageStore;

    const ME: &str = "doctor-1";
    const THEM: &str = "patient-1";

    fn session(store: &MemoryMessageStore, clock: &ManualClock) -> ConversationSession {
        ConversationSession::new(
            THEM,
            AuthContext::new(ME),
            Arc::new(store.clone()),
            PollingConfig::default(),
            Arc::new(clock.clone()),
        )
        .unwrap()
    }

    #[test]
    fn test_invalid_config_is_rejected() {
        let store = MemoryMessageStore::new();
        let result = ConversationSession::new(
            THEM,
            AuthContext::new(ME),
            Arc::new(store),
            PollingConfig {
                max_retries: 0,
                ..Default::default()
            },
            Arc::new(ManualClock::new(0)),
        );
        assert!(matches!(result, Err(SyncError::Configuration(_))));
    }

    #[tokio::test(start_paused = true)]
    async fn test_open_starts_in_intensive_mode() {
        let store = MemoryMessageStore::new();
        let clock = ManualClock::new(0);
        let mut session = session(&store, &clock);
        assert_eq!(session.status().await, PollerState::Idle);

        session.open().await;
        assert_eq!(session.status().await, PollerState::IntensivePolling);

        session.close().await;
        assert_eq!(session.status().await, PollerState::Idle);
    }

    #[tokio::test(start_paused = true)]
    async fn test_empty_message_is_rejected() {
        let store = MemoryMessageStore::new();
        let clock = ManualClock::new(0);
        let mut session = session(&store, &clock);

        let err = session.send_message("   ").await.unwrap_err();
        assert!(matches!(err, SyncError::InvalidState(_)));
        assert!(store.messages().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_send_merges_stored_message() {
        let store = MemoryMessageStore::new();
        let clock = ManualClock::new(1_000);
        let mut session = session(&store, &clock);

        let sent = session.send_message("Please book a follow-up").await.unwrap();
        let messages = session.messages().await;
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0].id(), sent.id());
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_send_appends_nothing() {
        let store = MemoryMessageStore::new();
        store.push_send_failure(SyncError::Server {
            status: 500,
            message: "boom".into(),
        });
        let clock = ManualClock::new(0);
        let mut session = session(&store, &clock);

        assert!(session.send_message("hello").await.is_err());
        assert!(session.messages().await.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_logged_out_session_does_not_poll() {
        let store = MemoryMessageStore::new();
        let clock = ManualClock::new(0);
        let mut session = session(&store, &clock);
        session.auth().logout();

        session.open().await;
        assert_eq!(session.status().await, PollerState::Idle);
        tokio::time::sleep(std::time::Duration::from_secs(10)).await;
        assert_eq!(store.fetch_calls(), 0);
    }
}
