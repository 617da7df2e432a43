//! Event model and durable buffer for the waymark telemetry pipeline.
//!
//! Events are flat, named key/value facts. A `BufferRecord` tags an event with
//! the destination it is meant for and the moment it was captured. Records that
//! cannot (or should not) be delivered right away are parked in a `BufferStore`
//! until the flush scheduler drains them.

pub mod error;
pub mod memory;
pub mod sqlite;
pub mod store;
pub mod types;

pub use error::BufferError;
pub use memory::MemoryBuffer;
pub use sqlite::SqliteBuffer;
pub use store::BufferStore;
pub use types::{BufferRecord, DestinationId, Event, Parameters, Value};
