//! User-facing notification sink
//!
//! The reconciliation services report the outcome of every mutation here.
//! What the sink does with it (a toast, a log line, a message queue) is not
//! part of the engine's contract.

use parking_lot::Mutex;
use std::sync::Arc;

/// Receives success and failure messages meant for the acting user
pub trait NotificationSink: Send + Sync {
    fn success(&self, message: &str);
    fn failure(&self, message: &str);
}

/// Sink that writes notifications to the tracing log
#[derive(Debug, Clone, Default)]
pub struct LogNotifier;

impl NotificationSink for LogNotifier {
    fn success(&self, message: &str) {
        tracing::info!(notification = "success", "{}", message);
    }

    fn failure(&self, message: &str) {
        tracing::warn!(notification = "failure", "{}", message);
    }
}

/// Outcome kind of a recorded notification
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NotificationLevel {
    Success,
    Failure,
}

/// Sink that keeps every notification in memory
#[derive(Debug, Clone, Default)]
pub struct RecordingNotifier {
    messages: Arc<Mutex<Vec<(NotificationLevel, String)>>>,
}

impl RecordingNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn messages(&self) -> Vec<(NotificationLevel, String)> {
        self.messages.lock().clone()
    }

    pub fn last(&self) -> Option<(NotificationLevel, String)> {
        self.messages.lock().last().cloned()
    }
}

impl NotificationSink for RecordingNotifier {
    fn success(&self, message: &str) {
        self.messages
            .lock()
            .push((NotificationLevel::Success, message.to_string()));
    }

    fn failure(&self, message: &str) {
        self.messages
            .lock()
            .push((NotificationLevel::Failure, message.to_string()));
    }
}
