//! Error handling for message synchronization
//!
//! Every operation against the message store, the scheduler, or the
//! configuration returns [`SyncError`]. Errors from underlying libraries are
//! converted automatically using `thiserror`.
//!
//! ## Error Categories
//!
//! ### Transport
//! `Network`, `Timeout`, `Server` and `Io` are transient. The poll scheduler
//! retries them at the current interval.
//!
//! ### Authorization
//! `Unauthorized` is a fetch failure like any other for retry accounting, but
//! it also requires the user to log in again.
//!
//! ### Malformed responses
//! `MalformedResponse` and `Json` are produced at the store boundary when a
//! payload does not match the typed message contract. They are discarded and
//! retried, never propagated as loosely-typed data.
//!
//! ```rust
//! use clinic_connect_sync::SyncError;
//!
//! let error = SyncError::Timeout("fetching messages".to_string());
//! assert!(error.is_recoverable());
//!
//! let error = SyncError::Unauthorized("token expired".to_string());
//! assert!(error.requires_user_action());
//! ```

use thiserror::Error;

/// Result type for sync operations
pub type Result<T> = std::result::Result<T, SyncError>;

/// Errors that can occur while polling, reconciling or persisting messages
#[derive(Error, Debug)]
pub enum SyncError {
    /// I/O error (file system, sockets)
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Network failure while talking to the message store
    #[error("Network error: {0}")]
    Network(String),

    /// The store did not answer in time
    #[error("Request timeout: {0}")]
    Timeout(String),

    /// The store answered with a server-side failure (5xx-equivalent)
    #[error("Server error {status}: {message}")]
    Server {
        /// Status code reported by the store
        status: u16,
        /// Error message reported by the store
        message: String,
    },

    /// The caller is not (or no longer) authorized (401-equivalent)
    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    /// The store returned a payload that does not match the message contract
    #[error("Malformed response: {0}")]
    MalformedResponse(String),

    /// Invalid or missing configuration
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// Operation attempted in an invalid state
    #[error("Invalid state: {0}")]
    InvalidState(String),

    /// Operation was cancelled before it completed
    #[error("Operation cancelled: {0}")]
    Cancelled(String),

    /// Requested entity does not exist
    #[error("Not found: {0}")]
    NotFound(String),
}

impl SyncError {
    /// Convert a generic I/O error into a more specific transport error
    ///
    /// ```rust
    /// use clinic_connect_sync::SyncError;
    /// use std::io::{Error, ErrorKind};
    ///
    /// let io_error = Error::new(ErrorKind::TimedOut, "no answer");
    /// let error = SyncError::from_io_error(io_error, "fetching messages");
    /// assert!(matches!(error, SyncError::Timeout(_)));
    /// ```
    pub fn from_io_error(error: std::io::Error, context: &str) -> Self {
        use std::io::ErrorKind;

        match error.kind() {
            ErrorKind::TimedOut => SyncError::Timeout(format!("{}: {}", context, error)),
            ErrorKind::ConnectionRefused
            | ErrorKind::ConnectionReset
            | ErrorKind::ConnectionAborted
            | ErrorKind::BrokenPipe => SyncError::Network(format!(
                "{}: connection interrupted ({})",
                context, error
            )),
            ErrorKind::PermissionDenied => {
                SyncError::Unauthorized(format!("{}: {}", context, error))
            }
            ErrorKind::InvalidData => {
                SyncError::MalformedResponse(format!("{}: {}", context, error))
            }
            _ => SyncError::Io(error),
        }
    }

    /// Check if this error is transient and the operation may succeed on retry
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            SyncError::Io(_)
                | SyncError::Network(_)
                | SyncError::Timeout(_)
                | SyncError::Server { .. }
                | SyncError::MalformedResponse(_)
                | SyncError::Json(_)
        )
    }

    /// Check if this error cannot be resolved without user intervention
    pub fn requires_user_action(&self) -> bool {
        matches!(
            self,
            SyncError::Unauthorized(_) | SyncError::Configuration(_)
        )
    }

    /// Get a short message suitable for a status badge or dialog
    pub fn user_message(&self) -> String {
        match self {
            SyncError::Unauthorized(_) => "Session expired. Please log in again.".to_string(),
            SyncError::Network(_) | SyncError::Io(_) => {
                "Connection lost. Retrying in the background.".to_string()
            }
            SyncError::Timeout(_) => "The server is not responding.".to_string(),
            SyncError::Server { status, .. } => {
                format!("Server error ({}). Retrying in the background.", status)
            }
            SyncError::MalformedResponse(_) | SyncError::Json(_) => {
                "Received unexpected data from the server.".to_string()
            }
            SyncError::Configuration(msg) => {
                format!("Configuration error: {}. Check your settings.", msg)
            }
            SyncError::InvalidState(msg) => format!("Invalid state: {}.", msg),
            SyncError::Cancelled(msg) => format!("Operation cancelled: {}.", msg),
            SyncError::NotFound(what) => format!("{} not found.", what),
        }
    }

    /// Create an invalid state error
    pub fn invalid_state(msg: impl Into<String>) -> Self {
        SyncError::InvalidState(msg.into())
    }

    /// Create a malformed response error
    pub fn malformed(msg: impl Into<String>) -> Self {
        SyncError::MalformedResponse(msg.into())
    }
}
