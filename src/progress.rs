//! Append-only progress log shown on the browser progress page.
//!
//! The producer (the hierarchy walk and the resilient caller) appends; consumers keep
//! their own read offset and call [`ProgressSink::drain_since`]. Events are never removed.

use serde::{Deserialize, Serialize};
use std::sync::{Arc, RwLock};

/// Marker for events that ask the user to choose an option
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    /// A choice prompt with buttons on the progress page
    Prompt,
}

/// One progress entry
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProgressEvent {
    /// Seconds since the Unix epoch (fractional)
    pub timestamp: f64,

    /// Human-readable message
    pub message: String,

    /// `"prompt"` for choice prompts, absent for plain messages
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub kind: Option<EventKind>,

    /// Choices offered by a prompt, in display order
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub options: Option<Vec<String>>,
}

impl ProgressEvent {
    fn now(message: String) -> Self {
        Self {
            timestamp: unix_timestamp(),
            message,
            kind: None,
            options: None,
        }
    }

    /// Whether this event is a choice prompt
    pub fn is_prompt(&self) -> bool {
        self.kind == Some(EventKind::Prompt)
    }
}

/// Shared, append-only event log (cheap to clone)
#[derive(Debug, Clone, Default)]
pub struct ProgressSink {
    events: Arc<RwLock<Vec<ProgressEvent>>>,
}

impl ProgressSink {
    /// Create an empty sink
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a plain message
    pub fn record(&self, message: impl Into<String>) {
        let message = message.into();
        tracing::info!("{message}");
        self.push(ProgressEvent::now(message));
    }

    /// Append a choice prompt
    pub fn record_prompt(&self, message: impl Into<String>, options: Vec<String>) {
        let message = message.into();
        tracing::info!(options = %options.join(", "), "User prompt: {message}");
        let mut event = ProgressEvent::now(message);
        event.kind = Some(EventKind::Prompt);
        event.options = Some(options);
        self.push(event);
    }

    /// Events appended at or after `offset`, plus the offset to pass next time.
    ///
    /// An offset past the end yields no events and the current length.
    pub fn drain_since(&self, offset: usize) -> (Vec<ProgressEvent>, usize) {
        let events = self.events.read().unwrap_or_else(|e| e.into_inner());
        let end = events.len();
        if offset >= end {
            return (Vec::new(), end);
        }
        (events[offset..].to_vec(), end)
    }

    /// Number of events recorded so far
    pub fn len(&self) -> usize {
        self.events.read().unwrap_or_else(|e| e.into_inner()).len()
    }

    /// Whether nothing has been recorded yet
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Copy of every event recorded so far
    pub fn snapshot(&self) -> Vec<ProgressEvent> {
        self.drain_since(0).0
    }

    fn push(&self, event: ProgressEvent) {
        self.events
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .push(event);
    }
}

fn unix_timestamp() -> f64 {
    let now = chrono::Utc::now();
    now.timestamp() as f64 + f64::from(now.timestamp_subsec_micros()) / 1_000_000.0
}
