//! Flush scheduling: turns time and count thresholds into a stream of batches.

use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use futures::Stream;
use tokio::sync::{mpsc, watch};
use tokio::time::{self, Instant, MissedTickBehavior};
use tracing::{debug, error, info, warn};
use typed_builder::TypedBuilder;
use waymark_common::Config;
use waymark_events::{BufferError, BufferRecord, BufferStore};

/// Batches drained from the buffer, oldest record first within each batch.
pub type FlushStream = Pin<Box<dyn Stream<Item = Result<Vec<BufferRecord>, BufferError>> + Send>>;

/// Decides when buffered records are drained.
///
/// `schedule` starts a background poller and must be called inside a tokio
/// runtime. `cancel` is terminal: the stream ends and cannot be restarted.
pub trait FlushScheduler: Send + Sync {
    fn schedule(&self, buffer: Arc<dyn BufferStore>) -> FlushStream;

    fn cancel(&self);
}

impl<S: FlushScheduler + ?Sized> FlushScheduler for Arc<S> {
    fn schedule(&self, buffer: Arc<dyn BufferStore>) -> FlushStream {
        (**self).schedule(buffer)
    }

    fn cancel(&self) {
        (**self).cancel()
    }
}

/// Why a tick flushed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlushTrigger {
    /// More records buffered than the count limit.
    CountLimit,
    /// The flush interval elapsed since the last interval flush.
    Interval,
}

impl FlushTrigger {
    /// Threshold check for a single tick. Count wins over time.
    pub fn evaluate(
        count: usize,
        count_limit: Option<usize>,
        since_last_flush: Duration,
        interval: Duration,
    ) -> Option<Self> {
        if count == 0 {
            return None;
        }
        if count_limit.is_some_and(|limit| count > limit) {
            return Some(FlushTrigger::CountLimit);
        }
        if since_last_flush > interval {
            return Some(FlushTrigger::Interval);
        }
        None
    }
}

const BATCH_QUEUE_DEPTH: usize = 16;

/// Polls the buffer on a fixed tick and flushes when a threshold fires.
///
/// A count-limit flush leaves the interval clock alone, so a burst keeps
/// draining on every tick until the buffer is back under the limit.
#[derive(TypedBuilder)]
pub struct PollingScheduler {
    #[builder(default = Duration::from_secs(60))]
    interval: Duration,
    #[builder(default, setter(strip_option))]
    count_limit: Option<usize>,
    #[builder(default = Duration::from_secs(1))]
    tick: Duration,
    /// Records per flush. `None` drains everything buffered.
    #[builder(default, setter(strip_option))]
    batch_size: Option<usize>,
    #[builder(default = watch::channel(false).0, setter(skip))]
    cancelled: watch::Sender<bool>,
}

impl PollingScheduler {
    pub fn new(interval: Duration) -> Self {
        Self::builder().interval(interval).build()
    }

    pub fn from_config(config: &Config) -> Self {
        Self {
            interval: config.flush_interval,
            count_limit: config.flush_count_limit,
            tick: config.poll_tick,
            batch_size: config.flush_batch_size,
            cancelled: watch::channel(false).0,
        }
    }

    pub fn is_cancelled(&self) -> bool {
        *self.cancelled.borrow()
    }

    fn poller(&self) -> Poller {
        Poller {
            interval: self.interval,
            count_limit: self.count_limit,
            batch_size: self.batch_size,
            last_flush: Instant::now(),
        }
    }
}

impl Default for PollingScheduler {
    fn default() -> Self {
        Self::builder().build()
    }
}

impl FlushScheduler for PollingScheduler {
    fn schedule(&self, buffer: Arc<dyn BufferStore>) -> FlushStream {
        let mut cancelled = self.cancelled.subscribe();
        if *cancelled.borrow() {
            debug!("Scheduler already cancelled, returning an empty stream");
            return Box::pin(futures::stream::empty());
        }

        let (tx, rx) = mpsc::channel(BATCH_QUEUE_DEPTH);
        let mut pending = PendingBatches {
            rx,
            buffer: buffer.clone(),
        };
        let mut stream_cancelled = self.cancelled.subscribe();
        let mut poller = self.poller();
        let tick = self.tick;

        tokio::spawn(async move {
            let mut ticker = time::interval(tick);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    biased;
                    _ = wait_cancelled(&mut cancelled) => break,
                    _ = ticker.tick() => {}
                }

                let item = match poller.poll(buffer.as_ref()).await {
                    Ok(Some(records)) => Ok(records),
                    Ok(None) => continue,
                    Err(e) => {
                        warn!(error = %e, "Flush tick failed");
                        Err(e)
                    }
                };

                // Drained after cancel, or nobody listening: put the batch back.
                if *cancelled.borrow() {
                    if let Ok(records) = item {
                        restore(buffer.as_ref(), records).await;
                    }
                    break;
                }
                if let Err(mpsc::error::SendError(item)) = tx.send(item).await {
                    if let Ok(records) = item {
                        restore(buffer.as_ref(), records).await;
                    }
                    break;
                }
            }

            debug!("Flush scheduler stopped");
        });

        // Batches still queued when the stream ends or is dropped go back to
        // the buffer through `PendingBatches::drop`.
        Box::pin(async_stream::stream! {
            loop {
                let batch = tokio::select! {
                    biased;
                    _ = wait_cancelled(&mut stream_cancelled) => break,
                    batch = pending.rx.recv() => batch,
                };
                match batch {
                    Some(batch) => yield batch,
                    None => break,
                }
            }
            drop(pending);
        })
    }

    fn cancel(&self) {
        self.cancelled.send_replace(true);
        info!("Flush scheduler cancelled");
    }
}

/// Per-stream polling state.
struct Poller {
    interval: Duration,
    count_limit: Option<usize>,
    batch_size: Option<usize>,
    last_flush: Instant,
}

impl Poller {
    async fn poll(
        &mut self,
        buffer: &dyn BufferStore,
    ) -> Result<Option<Vec<BufferRecord>>, BufferError> {
        let count = buffer.count().await?;
        let Some(trigger) = FlushTrigger::evaluate(
            count,
            self.count_limit,
            self.last_flush.elapsed(),
            self.interval,
        ) else {
            return Ok(None);
        };

        let records = buffer.load(self.batch_size).await?;
        if trigger == FlushTrigger::Interval {
            self.last_flush = Instant::now();
        }

        // Another drainer may have emptied the buffer between count and load.
        if records.is_empty() {
            return Ok(None);
        }

        debug!(records = records.len(), buffered = count, ?trigger, "Flushing buffered records");
        Ok(Some(records))
    }
}

/// Resolves once cancelled, or once the scheduler itself is gone.
async fn wait_cancelled(cancelled: &mut watch::Receiver<bool>) {
    let _ = cancelled.wait_for(|c| *c).await;
}

/// Receiving end of the worker's queue. Drained batches are already gone from
/// the buffer, so whatever is still queued when this drops is saved back.
struct PendingBatches {
    rx: mpsc::Receiver<Result<Vec<BufferRecord>, BufferError>>,
    buffer: Arc<dyn BufferStore>,
}

impl Drop for PendingBatches {
    fn drop(&mut self) {
        // After close the worker's next send fails and it restores that batch itself.
        self.rx.close();

        let mut records = Vec::new();
        while let Ok(item) = self.rx.try_recv() {
            if let Ok(batch) = item {
                records.extend(batch);
            }
        }
        if records.is_empty() {
            return;
        }

        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                let buffer = self.buffer.clone();
                debug!(records = records.len(), "Returning queued batches to the buffer");
                handle.spawn(async move { restore(buffer.as_ref(), records).await });
            }
            Err(_) => error!(
                records = records.len(),
                "No runtime left to return queued batches to the buffer"
            ),
        }
    }
}

async fn restore(buffer: &dyn BufferStore, records: Vec<BufferRecord>) {
    let count = records.len();
    if let Err(e) = buffer.save(records).await {
        error!(error = %e, records = count, "Failed to return undelivered batch to the buffer");
    }
}
