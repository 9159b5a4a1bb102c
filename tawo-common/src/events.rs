//! Event types for the TAWO event system
//!
//! Provides shared event definitions and the EventBus that carries them from
//! the matching driver to SSE subscribers.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

/// Which rows a dispatch pass sends
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DispatchMode {
    /// Every orderable row
    Full,
    /// Only orderable rows that still lack a match result
    MissingOnly,
}

/// How a single row request settled
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RowOutcome {
    /// A match result was stored for the row
    Matched,
    /// HTTP error, timeout or unrecognized response; the row stays empty
    NoResult,
}

/// TAWO event types
///
/// Events are broadcast via EventBus and serialized for SSE transmission.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum TawoEvent {
    /// A converted GAEB file was stored as the current dataset
    DatasetUploaded {
        fingerprint: String,
        file_name: String,
        row_count: usize,
        timestamp: DateTime<Utc>,
    },

    /// A dispatch pass started
    DispatchStarted {
        fingerprint: String,
        batch_id: u64,
        mode: DispatchMode,
        row_count: usize,
        timestamp: DateTime<Utc>,
    },

    /// One row request settled (success or failure)
    ///
    /// Emitted per row as soon as its own request settles, so clients can
    /// update rows incrementally and in any order.
    RowSettled {
        fingerprint: String,
        batch_id: u64,
        row_index: usize,
        outcome: RowOutcome,
        remaining: usize,
        timestamp: DateTime<Utc>,
    },

    /// Every request of a pass settled
    DispatchCompleted {
        fingerprint: String,
        batch_id: u64,
        mode: DispatchMode,
        matched: usize,
        without_result: usize,
        timestamp: DateTime<Utc>,
    },

    /// A pass was aborted by an unexpected failure
    DispatchFailed {
        fingerprint: String,
        batch_id: u64,
        message: String,
        timestamp: DateTime<Utc>,
    },

    /// The operator picked another candidate for a row
    SelectionChanged {
        fingerprint: String,
        row_index: usize,
        old_rank: usize,
        new_rank: usize,
        timestamp: DateTime<Utc>,
    },

    /// All persisted matching state of a dataset was cleared
    MatchingReset {
        fingerprint: String,
        timestamp: DateTime<Utc>,
    },
}

impl TawoEvent {
    /// Event name used as SSE `event:` field
    pub fn event_type(&self) -> &'static str {
        match self {
            TawoEvent::DatasetUploaded { .. } => "DatasetUploaded",
            TawoEvent::DispatchStarted { .. } => "DispatchStarted",
            TawoEvent::RowSettled { .. } => "RowSettled",
            TawoEvent::DispatchCompleted { .. } => "DispatchCompleted",
            TawoEvent::DispatchFailed { .. } => "DispatchFailed",
            TawoEvent::SelectionChanged { .. } => "SelectionChanged",
            TawoEvent::MatchingReset { .. } => "MatchingReset",
        }
    }
}

/// Broadcast bus for TawoEvent
#[derive(Debug, Clone)]
pub struct EventBus {
    tx: broadcast::Sender<TawoEvent>,
}

impl EventBus {
    /// Creates a new EventBus with specified channel capacity
    ///
    /// Slow subscribers lag and lose the oldest events once `capacity` is
    /// exceeded.
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx }
    }

    /// Subscribe to all future events
    pub fn subscribe(&self) -> broadcast::Receiver<TawoEvent> {
        self.tx.subscribe()
    }

    /// Emit an event, ignoring if no subscribers are listening
    pub fn emit_lossy(&self, event: TawoEvent) {
        let _ = self.tx.send(event);
    }
}
