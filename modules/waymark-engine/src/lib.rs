//! Dispatch-and-buffering engine.
//!
//! A `Bundler` owns a set of destinations. Each `send` fans an event out to the
//! destinations in scope, rewrites it per destination through the mutation
//! pipeline, and either delivers it right away or parks it in a `BufferStore`.
//! A `FlushScheduler` drains the buffer on time/count thresholds and the bundler
//! re-sends what it drains, re-buffering anything that fails again.

pub mod bundler;
pub mod destinations;
pub mod error;
pub mod mutation;
pub mod option;
pub mod scheduler;
pub mod tracked;
pub mod traits;

pub use bundler::{Bundler, DispatchOutcome, DispatchReport, DropReason, LoggingHandle};
pub use destinations::{MemoryDestination, TracingDestination};
pub use error::EngineError;
pub use mutation::Mutations;
pub use option::{DestinationConfig, LoggerScope, LoggingOption, LoggingPolicy};
pub use scheduler::{FlushScheduler, FlushStream, FlushTrigger, PollingScheduler};
pub use tracked::Tracked;
pub use traits::{Destination, Mutation};

pub use waymark_events::{BufferRecord, BufferStore, DestinationId, Event, Value};
