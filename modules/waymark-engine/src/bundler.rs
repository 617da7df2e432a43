//! The dispatch engine.
//!
//! scope filter → mutate → send now or buffer → (later) flush → re-send.
//! Registered destinations, their configuration and the mutation pipeline sit
//! behind one lock; the I/O those decisions trigger runs outside it.

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use futures::future::join_all;
use futures::StreamExt;
use tokio::sync::RwLock;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};
use waymark_events::{BufferError, BufferRecord, BufferStore, DestinationId, Event};

use crate::error::EngineError;
use crate::mutation::Mutations;
use crate::option::{DestinationConfig, LoggingOption, LoggingPolicy};
use crate::scheduler::FlushScheduler;
use crate::traits::{Destination, Mutation};

// ---------------------------------------------------------------------------
// Outcomes
// ---------------------------------------------------------------------------

/// What happened to one destination's records.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchOutcome {
    Delivered,
    Buffered,
    Dropped(DropReason),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DropReason {
    /// Policy outcome: the destination is configured not to buffer.
    BufferingDisallowed,
    /// Integrity violation: buffered records name a destination that is not registered.
    UnknownDestination,
}

/// Per-destination outcomes of one `send` or redelivery.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DispatchReport {
    pub outcomes: Vec<(DestinationId, DispatchOutcome)>,
}

impl DispatchReport {
    pub fn outcome(&self, id: &DestinationId) -> Option<DispatchOutcome> {
        self.outcomes
            .iter()
            .find(|(dest, _)| dest == id)
            .map(|(_, outcome)| *outcome)
    }

    pub fn destinations(&self) -> Vec<&DestinationId> {
        self.outcomes.iter().map(|(id, _)| id).collect()
    }

    pub fn count(&self, outcome: DispatchOutcome) -> usize {
        self.outcomes.iter().filter(|(_, o)| *o == outcome).count()
    }

    pub fn is_empty(&self) -> bool {
        self.outcomes.is_empty()
    }
}

// ---------------------------------------------------------------------------
// Bundler
// ---------------------------------------------------------------------------

/// Routes events to destinations and owns the buffer/redelivery cycle.
///
/// Cheap to clone; clones share the same state.
#[derive(Clone)]
pub struct Bundler {
    inner: Arc<Inner>,
}

struct Inner {
    state: RwLock<BundlerState>,
    buffer: Arc<dyn BufferStore>,
    scheduler: Arc<dyn FlushScheduler>,
    logging: AtomicBool,
}

#[derive(Default)]
struct BundlerState {
    destinations: Vec<Arc<dyn Destination>>,
    configs: HashMap<DestinationId, DestinationConfig>,
    mutations: Mutations,
}

impl Bundler {
    pub fn new<B, S>(buffer: B, scheduler: S) -> Self
    where
        B: BufferStore + 'static,
        S: FlushScheduler + 'static,
    {
        Self::with_destinations(Vec::new(), buffer, scheduler)
    }

    pub fn with_destinations<B, S>(
        destinations: Vec<Arc<dyn Destination>>,
        buffer: B,
        scheduler: S,
    ) -> Self
    where
        B: BufferStore + 'static,
        S: FlushScheduler + 'static,
    {
        Self {
            inner: Arc::new(Inner {
                state: RwLock::new(BundlerState {
                    destinations,
                    ..Default::default()
                }),
                buffer: Arc::new(buffer),
                scheduler: Arc::new(scheduler),
                logging: AtomicBool::new(false),
            }),
        }
    }

    /// Register a destination. Only sends that start afterwards see it.
    pub async fn add(&self, destination: impl Destination + 'static) {
        let id = destination.id().clone();
        self.inner
            .state
            .write()
            .await
            .destinations
            .push(Arc::new(destination));
        info!(destination = %id, "Registered destination");
    }

    pub async fn destination_ids(&self) -> Vec<DestinationId> {
        self.inner
            .state
            .read()
            .await
            .destinations
            .iter()
            .map(|d| d.id().clone())
            .collect()
    }

    pub async fn set_config(&self, id: impl Into<DestinationId>, config: DestinationConfig) {
        let id = id.into();
        debug!(destination = %id, allow_buffering = config.allow_buffering, "Destination configured");
        self.inner.state.write().await.configs.insert(id, config);
    }

    pub async fn remove_config(&self, id: &DestinationId) -> Option<DestinationConfig> {
        self.inner.state.write().await.configs.remove(id)
    }

    /// Effective configuration for a destination (default when unset).
    pub async fn config(&self, id: &DestinationId) -> DestinationConfig {
        self.inner.config(id).await
    }

    /// Append a step to the mutation pipeline.
    pub async fn add_mutation(&self, mutation: impl Mutation + 'static) {
        self.inner.state.write().await.mutations.push(mutation);
    }

    /// Fan `event` out to every destination in scope and wait for all of them.
    ///
    /// A destination rejecting the event is not an error: it is buffered or
    /// dropped per its configuration. A failing buffer write is returned, after
    /// every destination has been attempted.
    pub async fn send(
        &self,
        event: Event,
        option: &LoggingOption,
    ) -> Result<DispatchReport, EngineError> {
        let (targets, mutations) = {
            let state = self.inner.state.read().await;
            let targets: Vec<_> = state
                .destinations
                .iter()
                .filter(|d| option.targets(d.id()))
                .cloned()
                .collect();
            (targets, state.mutations.clone())
        };

        if targets.is_empty() {
            debug!(event = event.name(), "No destination in scope");
            return Ok(DispatchReport::default());
        }

        let policy = option.policy;
        let inner = &self.inner;
        let dispatches = targets.into_iter().map(|destination| {
            let id = destination.id().clone();
            let record = BufferRecord::now(id.clone(), mutations.transform(event.clone(), &id));
            async move {
                let outcome = inner
                    .dispatch(vec![record], destination.as_ref(), policy)
                    .await;
                (id, outcome)
            }
        });

        collect_report(join_all(dispatches).await)
    }

    /// Fire-and-forget `send`. Failures are logged.
    pub fn spawn_send(&self, event: Event, option: LoggingOption) -> JoinHandle<()> {
        let bundler = self.clone();
        tokio::spawn(async move {
            let name = event.name().to_string();
            if let Err(e) = bundler.send(event, &option).await {
                error!(event = name.as_str(), error = %e, "Background send failed");
            }
        })
    }

    /// Re-send previously buffered records to their destinations.
    ///
    /// Records are grouped per destination, keeping their order. Records whose
    /// destination is not registered are dropped with an error.
    pub async fn redeliver(
        &self,
        records: Vec<BufferRecord>,
    ) -> Result<DispatchReport, EngineError> {
        self.inner.redeliver(records).await
    }

    /// Drain the whole buffer now and redeliver it, outside the scheduler.
    pub async fn flush(&self) -> Result<DispatchReport, EngineError> {
        let records = self.inner.buffer.load(None).await?;
        if records.is_empty() {
            return Ok(DispatchReport::default());
        }
        info!(records = records.len(), "Manual flush");
        self.inner.redeliver(records).await
    }

    /// Start the drain loop: every batch the scheduler produces is redelivered
    /// on its own task. Only one loop per bundler.
    pub fn start_logging(&self) -> Result<LoggingHandle, EngineError> {
        if self.inner.logging.swap(true, Ordering::SeqCst) {
            return Err(EngineError::AlreadyLogging);
        }

        let inner = self.inner.clone();
        let mut batches = inner.scheduler.schedule(inner.buffer.clone());
        let scheduler = inner.scheduler.clone();

        let task = tokio::spawn(async move {
            info!("Drain loop started");
            while let Some(batch) = batches.next().await {
                match batch {
                    Ok(records) => {
                        let inner = inner.clone();
                        tokio::spawn(async move {
                            if let Err(e) = inner.redeliver(records).await {
                                error!(error = %e, "Redelivery failed");
                            }
                        });
                    }
                    Err(e) => {
                        warn!(error = %e, "Skipping failed flush, waiting for next tick");
                    }
                }
            }
            info!("Drain loop finished");
        });

        Ok(LoggingHandle { task, scheduler })
    }
}

impl Inner {
    async fn config(&self, id: &DestinationId) -> DestinationConfig {
        self.state
            .read()
            .await
            .configs
            .get(id)
            .copied()
            .unwrap_or_default()
    }

    async fn dispatch(
        &self,
        records: Vec<BufferRecord>,
        destination: &dyn Destination,
        policy: LoggingPolicy,
    ) -> Result<DispatchOutcome, BufferError> {
        match policy {
            LoggingPolicy::Immediate => self.upload(records, destination).await,
            LoggingPolicy::BufferFirst => {
                if !self.config(destination.id()).await.allow_buffering {
                    warn!(
                        destination = %destination.id(),
                        records = records.len(),
                        "Buffer-first send skipped: destination does not allow buffering"
                    );
                    return Ok(DispatchOutcome::Dropped(DropReason::BufferingDisallowed));
                }
                self.buffer.save(records).await?;
                Ok(DispatchOutcome::Buffered)
            }
        }
    }

    /// Send now; on rejection buffer if allowed, otherwise drop.
    async fn upload(
        &self,
        records: Vec<BufferRecord>,
        destination: &dyn Destination,
    ) -> Result<DispatchOutcome, BufferError> {
        if destination.send(&records).await {
            debug!(destination = %destination.id(), records = records.len(), "Delivered");
            return Ok(DispatchOutcome::Delivered);
        }

        if self.config(destination.id()).await.allow_buffering {
            debug!(destination = %destination.id(), records = records.len(), "Send failed, buffering");
            self.buffer.save(records).await?;
            Ok(DispatchOutcome::Buffered)
        } else {
            warn!(
                destination = %destination.id(),
                records = records.len(),
                "Send failed and destination does not allow buffering, dropping"
            );
            Ok(DispatchOutcome::Dropped(DropReason::BufferingDisallowed))
        }
    }

    async fn redeliver(&self, records: Vec<BufferRecord>) -> Result<DispatchReport, EngineError> {
        let mut groups: BTreeMap<DestinationId, Vec<BufferRecord>> = BTreeMap::new();
        for record in records {
            groups.entry(record.destination.clone()).or_default().push(record);
        }

        let destinations = self.state.read().await.destinations.clone();

        let mut results = Vec::with_capacity(groups.len());
        for (id, records) in groups {
            let Some(destination) = destinations.iter().find(|d| d.id() == &id) else {
                error!(
                    destination = %id,
                    records = records.len(),
                    "Buffered records reference an unregistered destination, dropping"
                );
                results.push((id, Ok(DispatchOutcome::Dropped(DropReason::UnknownDestination))));
                continue;
            };
            let outcome = self.upload(records, destination.as_ref()).await;
            results.push((id, outcome));
        }

        collect_report(results)
    }
}

fn collect_report(
    results: Vec<(DestinationId, Result<DispatchOutcome, BufferError>)>,
) -> Result<DispatchReport, EngineError> {
    let mut report = DispatchReport::default();
    let mut first_error = None;

    for (id, result) in results {
        match result {
            Ok(outcome) => report.outcomes.push((id, outcome)),
            Err(e) => {
                error!(destination = %id, error = %e, "Failed to buffer records");
                if first_error.is_none() {
                    first_error = Some(e);
                }
            }
        }
    }

    match first_error {
        Some(e) => Err(e.into()),
        None => Ok(report),
    }
}

// ---------------------------------------------------------------------------
// LoggingHandle
// ---------------------------------------------------------------------------

/// Handle to a running drain loop.
pub struct LoggingHandle {
    task: JoinHandle<()>,
    scheduler: Arc<dyn FlushScheduler>,
}

impl LoggingHandle {
    /// Stop the scheduler (for good) and the drain loop. Redeliveries already
    /// started finish on their own; undrained records stay buffered.
    pub fn cancel(&self) {
        self.scheduler.cancel();
        self.task.abort();
    }

    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }

    /// Wait for the drain loop to exit.
    pub async fn join(self) {
        if let Err(e) = self.task.await {
            if !e.is_cancelled() {
                error!(error = %e, "Drain loop panicked");
            }
        }
    }
}
