//! In-memory message store
//!
//! Used by tests and demos. Failures can be queued per operation so retry
//! and disconnect behavior can be exercised deterministically.

use super::{apply_mark_read, authorize, select_conversation, MessageStore};
use crate::auth::AuthContext;
use crate::clock::{Clock, SystemClock};
use crate::message::Message;
use crate::{Result, SyncError};
use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tracing::debug;
use uuid::Uuid;

#[derive(Debug, Default)]
struct Inner {
    messages: Vec<Message>,
    fetch_failures: VecDeque<SyncError>,
    send_failures: VecDeque<SyncError>,
    mark_read_failures: VecDeque<SyncError>,
    fetch_delay: Option<Duration>,
}

/// Message store held entirely in memory
#[derive(Debug, Clone)]
pub struct MemoryMessageStore {
    inner: Arc<Mutex<Inner>>,
    clock: Arc<dyn Clock>,
    fetch_calls: Arc<AtomicUsize>,
    mark_read_calls: Arc<AtomicUsize>,
    in_flight: Arc<AtomicUsize>,
    max_in_flight: Arc<AtomicUsize>,
}

impl Default for MemoryMessageStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryMessageStore {
    pub fn new() -> Self {
        Self::with_clock(Arc::new(SystemClock))
    }

    /// Timestamps of sent messages come from `clock`
    pub fn with_clock(clock: Arc<dyn Clock>) -> Self {
        Self {
            inner: Arc::new(Mutex::new(Inner::default())),
            clock,
            fetch_calls: Arc::new(AtomicUsize::new(0)),
            mark_read_calls: Arc::new(AtomicUsize::new(0)),
            in_flight: Arc::new(AtomicUsize::new(0)),
            max_in_flight: Arc::new(AtomicUsize::new(0)),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Add a message as if another client had stored it
    pub fn insert(&self, message: Message) {
        self.lock().messages.push(message);
    }

    /// Every stored message
    pub fn messages(&self) -> Vec<Message> {
        self.lock().messages.clone()
    }

    /// Fail the next fetch with `error`. Queued failures are consumed in order.
    pub fn push_fetch_failure(&self, error: SyncError) {
        self.lock().fetch_failures.push_back(error);
    }

    pub fn push_send_failure(&self, error: SyncError) {
        self.lock().send_failures.push_back(error);
    }

    pub fn push_mark_read_failure(&self, error: SyncError) {
        self.lock().mark_read_failures.push_back(error);
    }

    /// Make every fetch take `delay` before answering
    pub fn set_fetch_delay(&self, delay: Option<Duration>) {
        self.lock().fetch_delay = delay;
    }

    /// Number of fetch calls received, including failed ones
    pub fn fetch_calls(&self) -> usize {
        self.fetch_calls.load(Ordering::SeqCst)
    }

    pub fn mark_read_calls(&self) -> usize {
        self.mark_read_calls.load(Ordering::SeqCst)
    }

    /// Highest number of fetches that were in flight at the same time
    pub fn max_concurrent_fetches(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl MessageStore for MemoryMessageStore {
    async fn fetch_messages(
        &self,
        auth: &AuthContext,
        counterpart_id: &str,
        since: Option<i64>,
    ) -> Result<Vec<Message>> {
        self.fetch_calls.fetch_add(1, Ordering::SeqCst);
        let in_flight = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(in_flight, Ordering::SeqCst);

        let delay = self.lock().fetch_delay;
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        self.in_flight.fetch_sub(1, Ordering::SeqCst);

        authorize(auth)?;
        let inner = &mut *self.lock();
        if let Some(error) = inner.fetch_failures.pop_front() {
            return Err(error);
        }

        let selected =
            select_conversation(&inner.messages, auth.user_id(), counterpart_id, since);
        debug!(
            "Memory store: {} messages with {} since {:?}",
            selected.len(),
            counterpart_id,
            since
        );
        Ok(selected)
    }

    async fn fetch_all_messages(&self, auth: &AuthContext) -> Result<Vec<Message>> {
        authorize(auth)?;
        let inner = self.lock();
        let mut messages: Vec<Message> = inner
            .messages
            .iter()
            .filter(|msg| msg.counterpart_of(auth.user_id()).is_some())
            .cloned()
            .collect();
        messages.sort_by_key(Message::created_at);
        Ok(messages)
    }

    async fn send_message(
        &self,
        auth: &AuthContext,
        receiver_id: &str,
        body: &str,
    ) -> Result<Message> {
        authorize(auth)?;
        let inner = &mut *self.lock();
        if let Some(error) = inner.send_failures.pop_front() {
            return Err(error);
        }

        let message = Message::new(
            Uuid::new_v4().to_string(),
            auth.user_id(),
            receiver_id,
            body,
            self.clock.now_millis(),
        );
        inner.messages.push(message.clone());
        Ok(message)
    }

    async fn mark_read(&self, auth: &AuthContext, counterpart_id: &str) -> Result<()> {
        self.mark_read_calls.fetch_add(1, Ordering::SeqCst);
        authorize(auth)?;
        let inner = &mut *self.lock();
        if let Some(error) = inner.mark_read_failures.pop_front() {
            return Err(error);
        }

        let changed = apply_mark_read(inner.messages.iter_mut(), auth.user_id(), counterpart_id);
        debug!("Memory store: marked {} messages read", changed);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use tokio_test::{assert_err, assert_ok};

    #[tokio::test]
    async fn test_send_then_fetch() {
        let clock = ManualClock::new(1_000);
        let store = MemoryMessageStore::with_clock(Arc::new(clock.clone()));
        let doctor = AuthContext::new("doctor-1");
        let patient = AuthContext::new("patient-1");

        let sent = assert_ok!(store.send_message(&doctor, "patient-1", "How are you?").await);
        assert_eq!(sent.created_at(), 1_000);
        assert_eq!(sent.sender_id(), "doctor-1");

        let fetched = assert_ok!(store.fetch_messages(&patient, "doctor-1", None).await);
        assert_eq!(fetched, vec![sent.clone()]);

        let none = assert_ok!(store.fetch_messages(&patient, "doctor-1", Some(1_000)).await);
        assert!(none.is_empty());
    }

    #[tokio::test]
    async fn test_injected_failures_are_consumed_in_order() {
        let store = MemoryMessageStore::new();
        let auth = AuthContext::new("doctor-1");
        store.push_fetch_failure(SyncError::Timeout("slow".into()));
        store.push_fetch_failure(SyncError::Unauthorized("expired".into()));

        assert!(matches!(
            store.fetch_messages(&auth, "p", None).await,
            Err(SyncError::Timeout(_))
        ));
        assert!(matches!(
            store.fetch_messages(&auth, "p", None).await,
            Err(SyncError::Unauthorized(_))
        ));
        assert_ok!(store.fetch_messages(&auth, "p", None).await);
        assert_eq!(store.fetch_calls(), 3);
    }

    #[tokio::test]
    async fn test_logged_out_calls_are_rejected() {
        let store = MemoryMessageStore::new();
        let auth = AuthContext::new("doctor-1");
        auth.logout();

        assert_err!(store.fetch_messages(&auth, "p", None).await);
        assert_err!(store.send_message(&auth, "p", "hi").await);
        assert_err!(store.mark_read(&auth, "p").await);
        assert_err!(store.fetch_all_messages(&auth).await);
    }

    #[tokio::test]
    async fn test_mark_read() {
        let store = MemoryMessageStore::new();
        store.insert(Message::new("1", "patient-1", "doctor-1", "a", 1));
        store.insert(Message::new("2", "patient-2", "doctor-1", "b", 2));
        let auth = AuthContext::new("doctor-1");

        assert_ok!(store.mark_read(&auth, "patient-1").await);
        let messages = store.messages();
        assert!(messages[0].is_read());
        assert!(!messages[1].is_read());
    }

    #[tokio::test]
    async fn test_fetch_all_only_includes_current_user() {
        let store = MemoryMessageStore::new();
        store.insert(Message::new("1", "patient-1", "doctor-1", "a", 2));
        store.insert(Message::new("2", "doctor-1", "patient-2", "b", 1));
        store.insert(Message::new("3", "patient-3", "doctor-9", "c", 3));
        let auth = AuthContext::new("doctor-1");

        let all = assert_ok!(store.fetch_all_messages(&auth).await);
        let ids: Vec<&str> = all.iter().map(Message::id).collect();
        assert_eq!(ids, vec!["2", "1"]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_concurrent_fetches_are_counted() {
        let store = MemoryMessageStore::new();
        store.set_fetch_delay(Some(Duration::from_secs(1)));
        let auth = AuthContext::new("doctor-1");

        assert_ok!(store.fetch_messages(&auth, "p", None).await);
        assert_eq!(store.max_concurrent_fetches(), 1);

        let (a, b) = tokio::join!(
            store.fetch_messages(&auth, "p", None),
            store.fetch_messages(&auth, "p", None)
        );
        assert_ok!(a);
        assert_ok!(b);
        assert_eq!(store.max_concurrent_fetches(), 2);
    }
}
