use std::path::{Path, PathBuf};

use async_trait::async_trait;
use serde_json::Value;
use tracing::info;

use crate::domains::downloadable::DownloadableItem;
use crate::error::{Result, TransportError};
use crate::interfaces::handlers::DownloadableHandler;

/// Saves downloaded patient messages into an inbox directory, one JSON file
/// per message named after the downloadable uuid.
pub struct MessageHandler {
    inbox: PathBuf,
}

impl MessageHandler {
    pub fn new(inbox: impl Into<PathBuf>) -> Self {
        Self {
            inbox: inbox.into(),
        }
    }

    pub fn inbox(&self) -> &Path {
        &self.inbox
    }

    fn message_path(&self, uuid: &str) -> Result<PathBuf> {
        let valid = !uuid.is_empty()
            && uuid
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_');
        if !valid {
            return Err(TransportError::Dispatch(format!(
                "invalid downloadable uuid: {uuid:?}"
            )));
        }
        Ok(self.inbox.join(format!("{uuid}.json")))
    }
}

#[async_trait]
impl DownloadableHandler for MessageHandler {
    fn name(&self) -> &str {
        "patient_message"
    }

    async fn handle(&self, item: &DownloadableItem) -> Result<()> {
        if item.data == Value::Null {
            return Err(TransportError::Dispatch(format!(
                "message {} has no content",
                item.downloadable_uuid
            )));
        }
        let path = self.message_path(&item.downloadable_uuid)?;
        tokio::fs::create_dir_all(&self.inbox)
            .await
            .map_err(|e| TransportError::Runtime(e.to_string()))?;
        let content = serde_json::to_vec_pretty(&item.data)
            .map_err(|e| TransportError::Serialization(e.to_string()))?;
        tokio::fs::write(&path, content)
            .await
            .map_err(|e| TransportError::Runtime(e.to_string()))?;
        info!(path = %path.display(), "patient message saved");
        Ok(())
    }
}

/// Accepts any item and only records it in the log. Used when no concrete
/// handler is configured for a type the operator still wants acknowledged.
pub struct LoggingHandler;

#[async_trait]
impl DownloadableHandler for LoggingHandler {
    fn name(&self) -> &str {
        "logging"
    }

    async fn handle(&self, item: &DownloadableItem) -> Result<()> {
        info!(
            downloadable = %item.downloadable_uuid,
            download_type = %item.download_type,
            "downloadable received"
        );
        Ok(())
    }
}
