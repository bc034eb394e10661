use serde::Serialize;

use crate::error::TransportError;

/// User-facing error notification.
#[derive(Debug, Clone, Serialize)]
pub struct Notification {
    pub source: String,
    pub message: String,
    pub detail: Option<String>,
    pub timestamp: i64,
}

/// Collaborator that surfaces errors to whoever is watching the process.
pub trait ErrorReporter: Send + Sync {
    fn report_error(&self, source: &str, message: &str, error: Option<&TransportError>);
}
