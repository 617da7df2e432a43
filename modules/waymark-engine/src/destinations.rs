//! Reference destinations.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use async_trait::async_trait;
use tokio::sync::Mutex;
use tracing::info;
use waymark_events::{BufferRecord, DestinationId};

use crate::traits::Destination;

/// Keeps every accepted record in memory. Can be switched to reject sends,
/// which makes it the stand-in for a flaky remote service.
pub struct MemoryDestination {
    id: DestinationId,
    records: Mutex<Vec<BufferRecord>>,
    accepting: AtomicBool,
    attempts: AtomicUsize,
}

impl MemoryDestination {
    pub fn new(id: impl Into<DestinationId>) -> Self {
        Self {
            id: id.into(),
            records: Mutex::new(Vec::new()),
            accepting: AtomicBool::new(true),
            attempts: AtomicUsize::new(0),
        }
    }

    /// Starts out rejecting every send.
    pub fn rejecting(id: impl Into<DestinationId>) -> Self {
        let destination = Self::new(id);
        destination.set_accepting(false);
        destination
    }

    pub fn set_accepting(&self, accepting: bool) {
        self.accepting.store(accepting, Ordering::SeqCst);
    }

    /// Records accepted so far, in arrival order.
    pub async fn records(&self) -> Vec<BufferRecord> {
        self.records.lock().await.clone()
    }

    /// Number of `send` calls, accepted or not.
    pub fn attempts(&self) -> usize {
        self.attempts.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Destination for MemoryDestination {
    fn id(&self) -> &DestinationId {
        &self.id
    }

    async fn send(&self, records: &[BufferRecord]) -> bool {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        if !self.accepting.load(Ordering::SeqCst) {
            return false;
        }
        self.records.lock().await.extend_from_slice(records);
        true
    }
}

/// Writes each record to the `tracing` output. Never fails.
pub struct TracingDestination {
    id: DestinationId,
}

impl TracingDestination {
    pub fn new(id: impl Into<DestinationId>) -> Self {
        Self { id: id.into() }
    }
}

#[async_trait]
impl Destination for TracingDestination {
    fn id(&self) -> &DestinationId {
        &self.id
    }

    async fn send(&self, records: &[BufferRecord]) -> bool {
        for record in records {
            info!(
                destination = %self.id,
                event = record.event_name(),
                timestamp = %record.timestamp,
                parameters = record.event.parameters().len(),
                "event"
            );
        }
        true
    }
}
