//! Structured progress events
//!
//! Every dispatch stage reports through a [`TraceSink`]. Emission is
//! fire-and-forget: a sink failure must never fail the dispatch itself, so
//! the trait is infallible and the default bus drops events nobody is
//! listening for.

use serde::{Deserialize, Serialize};
use std::sync::Mutex;
use tokio::sync::broadcast;

use crate::types::Platform;

/// Progress event for one content item.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TraceEvent {
    Queued { platform: Platform },
    Publishing { platform: Platform },
    Published { platform: Platform, published_id: String },
    Held { reason: String },
    Failed { error: String },
}

/// A traced event together with the content it concerns.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TraceRecord {
    pub content_id: String,
    pub event: TraceEvent,
}

pub trait TraceSink: Send + Sync {
    fn emit(&self, content_id: &str, event: TraceEvent);
}

/// Broadcast-backed sink for distributing events to any number of
/// subscribers without blocking emitters.
#[derive(Clone)]
pub struct EventBus {
    sender: broadcast::Sender<TraceRecord>,
}

pub type TraceReceiver = broadcast::Receiver<TraceRecord>;

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    pub fn subscribe(&self) -> TraceReceiver {
        self.sender.subscribe()
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl TraceSink for EventBus {
    fn emit(&self, content_id: &str, event: TraceEvent) {
        // send() errors when no receivers exist; that's fine, nobody is
        // listening and the event is dropped.
        let _ = self.sender.send(TraceRecord {
            content_id: content_id.to_string(),
            event,
        });
    }
}

/// Sink that discards everything.
pub struct NullSink;

impl TraceSink for NullSink {
    fn emit(&self, _content_id: &str, _event: TraceEvent) {}
}

/// Sink that records every event, for assertions in tests.
#[derive(Default)]
pub struct MemorySink {
    records: Mutex<Vec<(String, TraceEvent)>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn records(&self) -> Vec<(String, TraceEvent)> {
        self.records.lock().unwrap().clone()
    }

    pub fn events_for(&self, content_id: &str) -> Vec<TraceEvent> {
        self.records
            .lock()
            .unwrap()
            .iter()
            .filter(|(id, _)| id == content_id)
            .map(|(_, e)| e.clone())
            .collect()
    }
}

impl TraceSink for MemorySink {
    fn emit(&self, content_id: &str, event: TraceEvent) {
        self.records
            .lock()
            .unwrap()
            .push((content_id.to_string(), event));
    }
}
