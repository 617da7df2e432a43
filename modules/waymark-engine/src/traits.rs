//! Seams to the outside world: where events go, and how they get rewritten.

use std::sync::Arc;

use async_trait::async_trait;
use waymark_events::{BufferRecord, DestinationId, Event};

/// A sink that accepts batches of records.
///
/// `send` returning `false` is the only failure signal. The bundler does not
/// retry on its own; failed records are buffered and wait for the next flush.
#[async_trait]
pub trait Destination: Send + Sync {
    fn id(&self) -> &DestinationId;

    async fn send(&self, records: &[BufferRecord]) -> bool;
}

#[async_trait]
impl<D: Destination + ?Sized> Destination for Arc<D> {
    fn id(&self) -> &DestinationId {
        (**self).id()
    }

    async fn send(&self, records: &[BufferRecord]) -> bool {
        (**self).send(records).await
    }
}

/// Pure, per-destination rewrite of an event. No I/O, no side effects.
pub trait Mutation: Send + Sync {
    fn transform(&self, event: Event, destination: &DestinationId) -> Event;
}

impl<F> Mutation for F
where
    F: Fn(Event, &DestinationId) -> Event + Send + Sync,
{
    fn transform(&self, event: Event, destination: &DestinationId) -> Event {
        self(event, destination)
    }
}
