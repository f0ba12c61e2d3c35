//! User-facing error notifications.
//!
//! The save pipeline reports failures through a [`Notifier`] in addition to
//! caching the message in the save status. Frontends plug in their own
//! (toast, status line); the default logs.

use std::sync::Mutex;

use tracing::error;

use crate::store::lock;

pub trait Notifier: Send + Sync {
    fn error(&self, message: &str);
}

/// Logs every notification at error level.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingNotifier;

impl Notifier for TracingNotifier {
    fn error(&self, message: &str) {
        error!(message, "edit session error");
    }
}

/// Keeps notifications in memory (for tests).
#[derive(Debug, Default)]
pub struct RecordingNotifier {
    messages: Mutex<Vec<String>>,
}

impl RecordingNotifier {
    pub fn new() -> Self {
        RecordingNotifier::default()
    }

    pub fn messages(&self) -> Vec<String> {
        lock(&self.messages).clone()
    }
}

impl Notifier for RecordingNotifier {
    fn error(&self, message: &str) {
        lock(&self.messages).push(message.to_string());
    }
}
