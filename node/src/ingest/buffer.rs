// Copyright (c) 2025 Varshith Gudur. Licensed under AGPLv3.
//! Ingestion Buffer + Flush Scheduler
//!
//! # Protocol
//! ```text
//! emit(e)  : validate → stamp → send Emit(e) to actor          (never blocks)
//! flush()  : lock drainer → Take → actor swaps queue for []    (critical section)
//!            → commit batch to sink outside the actor          (may block on I/O)
//! stop()   : cancel scheduler → final drain (Close) → join task
//! ```
//!
//! Drains are serialized by the drainer mutex; emit only ever talks to the
//! actor, so a slow sink never stalls producers.
//!
//! # States
//! `Running → (period elapses → drain, Running) | (stop → drain once → Stopped)`.
//! Once stopped, emit and flush fail with [`BufferError::Closed`].

use chrono::Utc;
use std::mem;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tlytics::Event;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

use super::policy::DeliveryPolicy;
use super::sink::BatchSink;
use super::spill::SpillFile;
use super::{BufferError, Emitter};

#[derive(Debug, Clone)]
pub struct IngestConfig {
    pub flush_period: Duration,
    pub delivery: DeliveryPolicy,
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            flush_period: Duration::from_secs(5),
            delivery: DeliveryPolicy::default(),
        }
    }
}

/// Result of one drain.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlushOutcome {
    /// Nothing was queued; the sink was not called.
    Empty,
    /// The sink accepted the batch.
    Committed { events: usize, attempts: u32 },
    /// Retries exhausted; the batch went to the spill file.
    Spilled { events: usize },
    /// Retries exhausted and no spill file (or spilling failed).
    Dropped { events: usize },
}

impl FlushOutcome {
    /// Events the sink accepted in this drain.
    pub fn committed(&self) -> usize {
        match self {
            FlushOutcome::Committed { events, .. } => *events,
            _ => 0,
        }
    }
}

enum Command {
    Emit(Event),
    Take(oneshot::Sender<Vec<Event>>),
    Close(oneshot::Sender<Vec<Event>>),
}

/// Sole owner of the pending sequence.
struct BufferActor {
    queue: Vec<Event>,
    rx: mpsc::UnboundedReceiver<Command>,
    sink: &'static str,
}

impl BufferActor {
    async fn run(mut self) {
        while let Some(cmd) = self.rx.recv().await {
            match cmd {
                Command::Emit(event) => {
                    self.queue.push(event);
                    metrics::gauge!("tlytics_buffer_depth", self.queue.len() as f64, "sink" => self.sink);
                }
                Command::Take(reply) => {
                    let _ = reply.send(self.take());
                }
                Command::Close(reply) => {
                    // Refuse new sends, then absorb whatever was already in flight
                    self.rx.close();
                    while let Some(cmd) = self.rx.recv().await {
                        match cmd {
                            Command::Emit(event) => self.queue.push(event),
                            Command::Take(r) | Command::Close(r) => {
                                let _ = r.send(Vec::new());
                            }
                        }
                    }
                    let _ = reply.send(self.take());
                    return;
                }
            }
        }
    }

    fn take(&mut self) -> Vec<Event> {
        metrics::gauge!("tlytics_buffer_depth", 0.0, "sink" => self.sink);
        mem::take(&mut self.queue)
    }
}

/// Sink plus delivery policy. Only one drain holds this at a time.
struct Drainer<S: BatchSink> {
    sink: S,
    delivery: DeliveryPolicy,
    spill: Option<SpillFile>,
    closed: bool,
}

impl<S: BatchSink> Drainer<S> {
    async fn deliver(&mut self, batch: Vec<Event>) -> FlushOutcome {
        let events = batch.len();
        let sink = self.sink.name();
        let attempts = self.delivery.retry.attempts();
        let started = Instant::now();

        for attempt in 1..=attempts {
            match self.sink.commit(&batch).await {
                Ok(()) => {
                    metrics::counter!("tlytics_events_flushed_total", events as u64, "sink" => sink);
                    metrics::histogram!(
                        "tlytics_flush_duration_seconds",
                        started.elapsed().as_secs_f64(),
                        "sink" => sink
                    );
                    tracing::debug!("Flushed {} events to {} (attempt {})", events, sink, attempt);
                    return FlushOutcome::Committed { events, attempts: attempt };
                }
                Err(e) => {
                    metrics::counter!("tlytics_flush_failures_total", 1, "sink" => sink);
                    tracing::warn!(
                        "Flush of {} events to {} failed (attempt {}/{}): {}",
                        events,
                        sink,
                        attempt,
                        attempts,
                        e
                    );
                    if attempt < attempts {
                        tokio::time::sleep(self.delivery.retry.backoff(attempt)).await;
                    }
                }
            }
        }

        if let Some(spill) = &self.spill {
            match spill.append(&batch).await {
                Ok(()) => {
                    metrics::counter!("tlytics_events_spilled_total", events as u64, "sink" => sink);
                    tracing::warn!("Spilled {} events to {:?}", events, spill.path());
                    return FlushOutcome::Spilled { events };
                }
                Err(e) => {
                    tracing::error!("Failed to spill {} events to {:?}: {}", events, spill.path(), e);
                }
            }
        }

        metrics::counter!("tlytics_events_dropped_total", events as u64, "sink" => sink);
        tracing::error!("Dropped batch of {} events after {} attempts", events, attempts);
        FlushOutcome::Dropped { events }
    }
}

struct Pipeline<S: BatchSink> {
    tx: mpsc::UnboundedSender<Command>,
    drainer: tokio::sync::Mutex<Drainer<S>>,
}

impl<S: BatchSink> Pipeline<S> {
    async fn request(&self, make: fn(oneshot::Sender<Vec<Event>>) -> Command) -> Option<Vec<Event>> {
        let (reply, rx) = oneshot::channel();
        self.tx.send(make(reply)).ok()?;
        rx.await.ok()
    }

    async fn flush(&self) -> Result<FlushOutcome, BufferError> {
        let mut drainer = self.drainer.lock().await;
        if drainer.closed {
            return Err(BufferError::Closed);
        }

        let batch = self.request(Command::Take).await.ok_or(BufferError::Closed)?;
        if batch.is_empty() {
            return Ok(FlushOutcome::Empty);
        }
        Ok(drainer.deliver(batch).await)
    }

    /// Close the actor and deliver everything it still held. Idempotent.
    async fn final_drain(&self) -> FlushOutcome {
        let mut drainer = self.drainer.lock().await;
        if drainer.closed {
            return FlushOutcome::Empty;
        }
        drainer.closed = true;

        let batch = self.request(Command::Close).await.unwrap_or_default();
        if batch.is_empty() {
            return FlushOutcome::Empty;
        }
        drainer.deliver(batch).await
    }
}

/// Stops the scheduler when the last handle goes away.
struct Control {
    cancel: CancellationToken,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl Drop for Control {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

/// Handle to a running buffer + scheduler pair. Cheap to clone.
pub struct IngestHandle<S: BatchSink> {
    pipeline: Arc<Pipeline<S>>,
    control: Arc<Control>,
    spill: Option<SpillFile>,
}

impl<S: BatchSink> Clone for IngestHandle<S> {
    fn clone(&self) -> Self {
        Self {
            pipeline: self.pipeline.clone(),
            control: self.control.clone(),
            spill: self.spill.clone(),
        }
    }
}

impl<S: BatchSink> IngestHandle<S> {
    /// Start the buffer actor and its flush scheduler on the current runtime.
    pub fn spawn(sink: S, config: IngestConfig) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        tokio::spawn(
            BufferActor {
                queue: Vec::new(),
                rx,
                sink: sink.name(),
            }
            .run(),
        );

        let spill = config.delivery.spill_path.clone().map(SpillFile::new);
        let pipeline = Arc::new(Pipeline {
            tx,
            drainer: tokio::sync::Mutex::new(Drainer {
                sink,
                delivery: config.delivery,
                spill: spill.clone(),
                closed: false,
            }),
        });

        let cancel = CancellationToken::new();
        let task = tokio::spawn(run_scheduler(
            pipeline.clone(),
            config.flush_period,
            cancel.clone(),
        ));

        Self {
            pipeline,
            control: Arc::new(Control {
                cancel,
                task: Mutex::new(Some(task)),
            }),
            spill,
        }
    }

    /// Queue an event. Stamps the current time when the event has none.
    pub fn emit(&self, event: Event) -> Result<(), BufferError> {
        event.validate()?;
        let event = event.stamped(Utc::now());
        self.pipeline
            .tx
            .send(Command::Emit(event))
            .map_err(|_| BufferError::Closed)?;
        metrics::counter!("tlytics_events_emitted_total", 1);
        Ok(())
    }

    /// Drain now, outside the periodic cadence.
    pub async fn flush(&self) -> Result<FlushOutcome, BufferError> {
        self.pipeline.flush().await
    }

    /// Stop the scheduler; returns once the final drain has completed.
    pub async fn stop(&self) {
        self.control.cancel.cancel();

        let task = self.control.task.lock().ok().and_then(|mut t| t.take());
        if let Some(task) = task {
            if let Err(e) = task.await {
                tracing::error!("Flush scheduler task failed: {}", e);
            }
        }
        // Waits on the drainer lock if another caller is mid final-drain
        self.pipeline.final_drain().await;
    }

    pub fn is_stopped(&self) -> bool {
        self.control.cancel.is_cancelled()
    }

    /// Re-queue every batch from the spill file.
    ///
    /// The file is deleted before anything is queued, so a failed delete
    /// leaves the buffer untouched and a later start cannot queue the same
    /// events twice. Returns the number of events recovered. A corrupt file
    /// is left in place.
    pub async fn recover_spilled(&self) -> Result<usize, BufferError> {
        let Some(spill) = &self.spill else {
            return Ok(0);
        };

        // Hold the drainer so a failing flush cannot append mid-recovery
        let drainer = self.pipeline.drainer.lock().await;
        if drainer.closed {
            return Err(BufferError::Closed);
        }

        let Some(batches) = spill.take().await? else {
            return Ok(0);
        };
        let mut pending = batches.into_iter().flatten();
        let mut recovered = 0;
        while let Some(event) = pending.next() {
            if let Err(mpsc::error::SendError(cmd)) = self.pipeline.tx.send(Command::Emit(event)) {
                // Put back what never reached the actor
                let mut rest: Vec<Event> = match cmd {
                    Command::Emit(event) => vec![event],
                    _ => Vec::new(),
                };
                rest.extend(pending);
                spill.append(&rest).await?;
                return Err(BufferError::Closed);
            }
            recovered += 1;
        }
        drop(drainer);

        if recovered > 0 {
            tracing::info!("Recovered {} spilled events from {:?}", recovered, spill.path());
        }
        Ok(recovered)
    }
}

impl<S: BatchSink> Emitter for IngestHandle<S> {
    fn emit(&self, event: Event) -> Result<(), BufferError> {
        IngestHandle::emit(self, event)
    }
}

async fn run_scheduler<S: BatchSink>(
    pipeline: Arc<Pipeline<S>>,
    period: Duration,
    cancel: CancellationToken,
) {
    // tokio intervals panic on a zero period
    let period = period.max(Duration::from_millis(1));
    let start = tokio::time::Instant::now() + period;
    let mut ticker = tokio::time::interval_at(start, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = ticker.tick() => {
                if let Err(e) = pipeline.flush().await {
                    tracing::debug!("Periodic flush skipped: {}", e);
                    break;
                }
            }
        }
    }

    let outcome = pipeline.final_drain().await;
    tracing::debug!("Flush scheduler stopped, final drain: {:?}", outcome);
}
