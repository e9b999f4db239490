//! Centralized error handling
//!
//! Logs sync errors at a level chosen from their classification and tells the
//! user when an error cannot be fixed by retrying.

use clinic_connect_sync::SyncError;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{error, warn};

/// Central error handler shared by the daemon's commands
#[derive(Debug, Clone, Default)]
pub struct ErrorHandler {
    handled: Arc<AtomicU64>,
}

impl ErrorHandler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Handle a sync error with appropriate logging and user notification
    ///
    /// Returns whether the error is recoverable, for retry logic.
    pub fn handle_error(&self, error: &SyncError, context: &str, counterpart: Option<&str>) -> bool {
        self.handled.fetch_add(1, Ordering::Relaxed);
        let conversation = counterpart.unwrap_or("-");

        if error.is_recoverable() {
            warn!(conversation, "Recoverable error {}: {}", context, error);
        } else if error.requires_user_action() {
            warn!(conversation, "User action required {}: {}", context, error);
        } else {
            error!(conversation, "Error {}: {}", context, error);
        }

        if error.requires_user_action() {
            eprintln!("{}", error.user_message());
        }

        error.is_recoverable()
    }

    /// Number of errors handled so far
    pub fn handled(&self) -> u64 {
        self.handled.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_handle_error_reports_recoverability() {
        let handler = ErrorHandler::new();

        assert!(handler.handle_error(
            &SyncError::Timeout("fetch".into()),
            "fetching messages",
            Some("patient-1"),
        ));
        assert!(!handler.handle_error(
            &SyncError::Unauthorized("token expired".into()),
            "sending message",
            None,
        ));
        assert!(!handler.handle_error(
            &SyncError::invalid_state("cannot send an empty message"),
            "sending message",
            None,
        ));
        assert_eq!(handler.handled(), 3);
    }
}
