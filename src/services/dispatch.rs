use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::RwLock;
use tracing::{debug, error, warn};

use crate::domains::downloadable::{DownloadType, DownloadableItem};
use crate::error::TransportError;
use crate::interfaces::handlers::DownloadableHandler;
use crate::interfaces::reporting::ErrorReporter;

const SOURCE: &str = "dispatch";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DispatchOutcome {
    Handled,
    HandlerFailed(String),
    Unroutable(DownloadType),
    RegistryUnavailable,
}

impl DispatchOutcome {
    pub fn is_handled(&self) -> bool {
        matches!(self, Self::Handled)
    }
}

/// Routes downloaded items to the handler registered for their type.
pub struct DispatchRegistry {
    handlers: RwLock<HashMap<DownloadType, Arc<dyn DownloadableHandler>>>,
    boot_error: Option<String>,
    reporter: Arc<dyn ErrorReporter>,
}

impl DispatchRegistry {
    pub fn new(reporter: Arc<dyn ErrorReporter>) -> Self {
        Self {
            handlers: RwLock::new(HashMap::new()),
            boot_error: None,
            reporter,
        }
    }

    /// Registry whose startup failed; every dispatch reports `boot_error`.
    pub fn failed(reporter: Arc<dyn ErrorReporter>, boot_error: TransportError) -> Self {
        Self {
            handlers: RwLock::new(HashMap::new()),
            boot_error: Some(boot_error.to_string()),
            reporter,
        }
    }

    /// Last registration for a type wins; the replaced handler is returned.
    pub async fn register(
        &self,
        download_type: DownloadType,
        handler: Arc<dyn DownloadableHandler>,
    ) -> Option<Arc<dyn DownloadableHandler>> {
        debug!(download_type = %download_type, handler = handler.name(), "registering handler");
        let mut handlers = self.handlers.write().await;
        handlers.insert(download_type, handler)
    }

    pub async fn handler_for(
        &self,
        download_type: &DownloadType,
    ) -> Option<Arc<dyn DownloadableHandler>> {
        let handlers = self.handlers.read().await;
        handlers.get(download_type).cloned()
    }

    pub async fn registered_types(&self) -> Vec<DownloadType> {
        let handlers = self.handlers.read().await;
        let mut types: Vec<DownloadType> = handlers.keys().cloned().collect();
        types.sort_by(|a, b| a.as_str().cmp(b.as_str()));
        types
    }

    pub async fn dispatch(&self, item: &DownloadableItem) -> DispatchOutcome {
        if let Some(boot_error) = &self.boot_error {
            let err = TransportError::Dispatch(boot_error.clone());
            error!(
                item = %item.downloadable_uuid,
                error = %err,
                "dispatch registry failed to start"
            );
            self.reporter.report_error(
                SOURCE,
                "There has been an issue starting the downloadable handler registry",
                Some(&err),
            );
            return DispatchOutcome::RegistryUnavailable;
        }

        let Some(handler) = self.handler_for(&item.download_type).await else {
            error!(
                item = %item.downloadable_uuid,
                download_type = %item.download_type,
                "no handler registered for download type"
            );
            self.reporter.report_error(
                SOURCE,
                &format!(
                    "An incoming update has failed: no handler found for {}",
                    item.download_type
                ),
                None,
            );
            return DispatchOutcome::Unroutable(item.download_type.clone());
        };

        let owned = item.clone();
        let task = tokio::spawn(async move { handler.handle(&owned).await });
        let failure = match task.await {
            Ok(Ok(())) => None,
            Ok(Err(err)) => Some(err),
            Err(join) => Some(TransportError::Runtime(format!("handler panicked: {join}"))),
        };
        match failure {
            None => {
                debug!(
                    item = %item.downloadable_uuid,
                    download_type = %item.download_type,
                    "item handled"
                );
                DispatchOutcome::Handled
            }
            Some(err) => {
                warn!(item = %item.downloadable_uuid, error = %err, "handler failed");
                self.reporter.report_error(
                    SOURCE,
                    "Error in attempting to download an incoming message/update",
                    Some(&err),
                );
                DispatchOutcome::HandlerFailed(err.to_string())
            }
        }
    }
}
