//! Operator-facing error notifications.
//!
//! One notice is shown at a time. A new notice takes the front and pushes
//! the one on display back onto the queue; dismissing reveals the most
//! recent queued notice.

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use crate::error::SpanwireError;

/// A user-visible error.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorNotice {
    pub description: String,
    pub reason: Option<String>,
}

impl ErrorNotice {
    pub fn new(description: impl Into<String>) -> Self {
        Self {
            description: description.into(),
            reason: None,
        }
    }

    pub fn with_reason(mut self, reason: impl Into<String>) -> Self {
        self.reason = Some(reason.into());
        self
    }
}

impl From<&SpanwireError> for ErrorNotice {
    fn from(err: &SpanwireError) -> Self {
        let description = match err {
            SpanwireError::Handshake(_) => "Handshake with debug server failed",
            SpanwireError::Decode(_) => "Received a malformed message",
            SpanwireError::FrameTooLarge { .. } => "Received an oversized frame",
            SpanwireError::Store(_) => "Failed to save data",
            SpanwireError::Io(_) | SpanwireError::ConnectionClosed => "Network error",
            SpanwireError::InvalidAddress(_) => "Failed to connect to debug server",
            SpanwireError::AlreadyConnected => return ErrorNotice::new(err.to_string()),
            _ => "Unexpected error",
        };
        ErrorNotice::new(description).with_reason(err.to_string())
    }
}

#[derive(Debug, Default)]
struct Inner {
    current: Option<ErrorNotice>,
    queued: Vec<ErrorNotice>,
}

/// Single-slot error display with a backlog.
#[derive(Debug, Default)]
pub struct ErrorQueue {
    inner: Mutex<Inner>,
}

impl ErrorQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&self, notice: ErrorNotice) {
        let mut inner = self.inner.lock();
        if let Some(previous) = inner.current.replace(notice) {
            inner.queued.push(previous);
        }
    }

    pub fn push_error(&self, err: &SpanwireError) {
        self.push(ErrorNotice::from(err));
    }

    /// The notice on display, if any.
    pub fn current(&self) -> Option<ErrorNotice> {
        self.inner.lock().current.clone()
    }

    /// Dismiss the notice on display and return the next one shown.
    pub fn dismiss(&self) -> Option<ErrorNotice> {
        let mut inner = self.inner.lock();
        inner.current = inner.queued.pop();
        inner.current.clone()
    }

    /// Total notices held, the displayed one included.
    pub fn len(&self) -> usize {
        let inner = self.inner.lock();
        inner.queued.len() + usize::from(inner.current.is_some())
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
