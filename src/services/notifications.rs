use std::time::{SystemTime, UNIX_EPOCH};

use tokio::sync::broadcast;
use tracing::error;

use crate::error::TransportError;
use crate::interfaces::reporting::{ErrorReporter, Notification};

const TARGET: &str = "medipi_transport::notification";

/// Reporter for headless runs: notifications only go to the log.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogReporter;

impl ErrorReporter for LogReporter {
    fn report_error(&self, source: &str, message: &str, error: Option<&TransportError>) {
        match error {
            Some(err) => error!(target: TARGET, source, error = %err, "{message}"),
            None => error!(target: TARGET, source, "{message}"),
        }
    }
}

/// Fans notifications out to any subscribed user-facing stream.
#[derive(Debug, Clone)]
pub struct BroadcastReporter {
    tx: broadcast::Sender<Notification>,
}

impl BroadcastReporter {
    pub fn new(tx: broadcast::Sender<Notification>) -> Self {
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Notification> {
        self.tx.subscribe()
    }
}

impl ErrorReporter for BroadcastReporter {
    fn report_error(&self, source: &str, message: &str, error: Option<&TransportError>) {
        LogReporter.report_error(source, message, error);
        let notification = Notification {
            source: source.to_string(),
            message: message.to_string(),
            detail: error.map(|e| e.to_string()),
            timestamp: now_ts(),
        };
        // No subscribers is fine; the log entry above is the record.
        let _ = self.tx.send(notification);
    }
}

fn now_ts() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs() as i64
}
