//! The buffer contract shared by every store implementation.

use std::sync::Arc;

use async_trait::async_trait;

use crate::error::BufferError;
use crate::types::BufferRecord;

/// Durable append/drain storage for records awaiting delivery.
///
/// Implemented by `SqliteBuffer` (durable) and `MemoryBuffer` (tests).
/// Also implemented for `Arc<B>` so a store can be shared for assertions.
///
/// `save` and `load` may be called concurrently from producers and from the
/// flush scheduler. Implementations serialize them internally: no record is
/// returned by two `load` calls and none acknowledged by `save` is lost.
#[async_trait]
pub trait BufferStore: Send + Sync {
    /// Append every record, all or nothing.
    async fn save(&self, records: Vec<BufferRecord>) -> Result<(), BufferError>;

    /// Remove and return up to `limit` records (all when `None`),
    /// oldest timestamp first. Ties keep insertion order.
    async fn load(&self, limit: Option<usize>) -> Result<Vec<BufferRecord>, BufferError>;

    /// Number of records currently buffered.
    async fn count(&self) -> Result<usize, BufferError>;
}

#[async_trait]
impl<B: BufferStore + ?Sized> BufferStore for Arc<B> {
    async fn save(&self, records: Vec<BufferRecord>) -> Result<(), BufferError> {
        (**self).save(records).await
    }

    async fn load(&self, limit: Option<usize>) -> Result<Vec<BufferRecord>, BufferError> {
        (**self).load(limit).await
    }

    async fn count(&self) -> Result<usize, BufferError> {
        (**self).count().await
    }
}
