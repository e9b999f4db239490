//! JSON document store
//!
//! Keeps every message document in `messages.json` inside a data directory.
//! Writes go to a temporary file that is renamed over the original, so a
//! concurrent reader in another process sees either the old or the new
//! array. Reads validate every document; one malformed document fails the
//! whole read with [`SyncError::MalformedResponse`].

use super::{apply_mark_read, authorize, select_conversation, MessageStore};
use crate::auth::AuthContext;
use crate::message::{Message, MessageDocument};
use crate::{Result, SyncError};
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use tokio::fs;
use tokio::sync::Mutex;
use tracing::{debug, info};

const STORE_FILE_NAME: &str = "messages.json";

/// Message store backed by a JSON file
#[derive(Debug)]
pub struct JsonFileStore {
    path: PathBuf,
    /// Serializes read-modify-write cycles within this process
    write_lock: Mutex<()>,
}

impl JsonFileStore {
    /// Open (and create if needed) the store in `data_dir`
    pub async fn open(data_dir: impl AsRef<Path>) -> Result<Self> {
        let data_dir = data_dir.as_ref();
        fs::create_dir_all(data_dir).await.map_err(|e| {
            SyncError::from_io_error(
                e,
                &format!("creating message store directory {}", data_dir.display()),
            )
        })?;

        let path = data_dir.join(STORE_FILE_NAME);
        info!("Opened message store at {}", path.display());
        Ok(Self {
            path,
            write_lock: Mutex::new(()),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn load(&self) -> Result<Vec<Message>> {
        let contents = match fs::read_to_string(&self.path).await {
            Ok(contents) => contents,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!("No message store file yet, starting empty");
                return Ok(Vec::new());
            }
            Err(e) => {
                return Err(SyncError::from_io_error(
                    e,
                    &format!("reading message store {}", self.path.display()),
                ))
            }
        };

        if contents.trim().is_empty() {
            return Ok(Vec::new());
        }

        let value: serde_json::Value = serde_json::from_str(&contents)
            .map_err(|e| SyncError::malformed(format!("{}: {}", self.path.display(), e)))?;
        let serde_json::Value::Array(documents) = value else {
            return Err(SyncError::malformed(format!(
                "{}: expected an array of message documents",
                self.path.display()
            )));
        };

        documents
            .into_iter()
            .map(MessageDocument::parse_value)
            .collect()
    }

    async fn persist(&self, messages: &[Message]) -> Result<()> {
        let documents: Vec<MessageDocument> = messages.iter().map(Message::to_document).collect();
        let json = serde_json::to_string_pretty(&documents)?;

        let tmp_path = self.path.with_extension("json.tmp");
        fs::write(&tmp_path, json).await.map_err(|e| {
            SyncError::from_io_error(e, &format!("writing {}", tmp_path.display()))
        })?;
        fs::rename(&tmp_path, &self.path).await.map_err(|e| {
            SyncError::from_io_error(e, &format!("replacing {}", self.path.display()))
        })?;

        debug!("Persisted {} message documents", documents.len());
        Ok(())
    }
}

#[async_trait]
impl MessageStore for JsonFileStore {
    async fn fetch_messages(
        &self,
        auth: &AuthContext,
        counterpart_id: &str,
        since: Option<i64>,
    ) -> Result<Vec<Message>> {
        authorize(auth)?;
        let messages = self.load().await?;
        Ok(select_conversation(
            &messages,
            auth.user_id(),
            counterpart_id,
            since,
        ))
    }

    async fn fetch_all_messages(&self, auth: &AuthContext) -> Result<Vec<Message>> {
        authorize(auth)?;
        let mut messages: Vec<Message> = self
            .load()
            .await?
            .into_iter()
            .filter(|msg| msg.counterpart_of(auth.user_id()).is_some())
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
        let _guard = self.write_lock.lock().await;

        let mut messages = self.load().await?;
        let message = Message::compose(auth.user_id(), receiver_id, body);
        messages.push(message.clone());
        self.persist(&messages).await?;

        info!(
            "Stored message {} from {} to {}",
            message.id(),
            message.sender_id(),
            message.receiver_id()
        );
        Ok(message)
    }

    async fn mark_read(&self, auth: &AuthContext, counterpart_id: &str) -> Result<()> {
        authorize(auth)?;
        let _guard = self.write_lock.lock().await;

        let mut messages = self.load().await?;
        let changed = apply_mark_read(messages.iter_mut(), auth.user_id(), counterpart_id);
        if changed > 0 {
            self.persist(&messages).await?;
        }
        debug!(
            "Marked {} messages from {} read for {}",
            changed,
            counterpart_id,
            auth.user_id()
        );
        Ok(())
    }
}
