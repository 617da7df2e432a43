//! In-memory buffer. Not durable; used by tests and short-lived processes.

use async_trait::async_trait;
use tokio::sync::Mutex;

use crate::error::BufferError;
use crate::store::BufferStore;
use crate::types::BufferRecord;

/// Vec-backed buffer. The mutex serializes saves against drains.
#[derive(Default)]
pub struct MemoryBuffer {
    records: Mutex<Vec<BufferRecord>>,
}

impl MemoryBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of the buffered records without draining them (for test assertions).
    pub async fn records(&self) -> Vec<BufferRecord> {
        self.records.lock().await.clone()
    }
}

#[async_trait]
impl BufferStore for MemoryBuffer {
    async fn save(&self, records: Vec<BufferRecord>) -> Result<(), BufferError> {
        for record in &records {
            record.check_storable()?;
        }
        self.records.lock().await.extend(records);
        Ok(())
    }

    async fn load(&self, limit: Option<usize>) -> Result<Vec<BufferRecord>, BufferError> {
        let mut records = self.records.lock().await;

        // Stable sort: equal timestamps stay in insertion order.
        records.sort_by_key(|r| r.timestamp);

        let take = limit.map_or(records.len(), |l| l.min(records.len()));
        Ok(records.drain(..take).collect())
    }

    async fn count(&self) -> Result<usize, BufferError> {
        Ok(self.records.lock().await.len())
    }
}
