// Copyright (c) 2025 Varshith Gudur. Licensed under AGPLv3.
//! Ingestion Pipeline
//!
//! Buffers emitted events in memory and drains them, in batches, into a
//! [`BatchSink`]: the local [`EventStore`](crate::store::EventStore) on a
//! node, or a remote node over HTTP on a client.
//!
//! # Architecture
//! - Buffer = actor task exclusively owning the pending `Vec<Event>`
//! - Drainer = sink + delivery policy, behind an async mutex (one drain at a time)
//! - Scheduler = background task draining every period and once on stop
//!
//! ```text
//! emit ──► [actor: Vec<Event>] ──Take──► drainer ──commit──► sink
//!                                          │ (retry, backoff)
//!                                          └──► spill file / drop
//! ```
//!
//! # Guarantees
//! - emit never waits on a sink: it is a channel send
//! - Every emitted event is handed to exactly one drain
//! - Drain order == emit order within one buffer
//! - stop() returns only after the final drain finished

pub mod buffer;
pub mod policy;
pub mod sink;
pub mod spill;

use thiserror::Error;
use tlytics::{Event, EventError};

pub use buffer::{FlushOutcome, IngestConfig, IngestHandle};
pub use policy::{DeliveryPolicy, RetryPolicy};
pub use sink::{BatchSink, SinkError, StoreSink};
pub use spill::{SpillError, SpillFile};

#[derive(Error, Debug)]
pub enum BufferError {
    #[error("Invalid event: {0}")]
    Invalid(#[from] EventError),

    #[error("Ingestion buffer is closed")]
    Closed,

    #[error("Spill file error: {0}")]
    Spill(#[from] SpillError),
}

/// Anything events can be emitted into: a node's local buffer or a
/// remote client.
pub trait Emitter: Send + Sync {
    fn emit(&self, event: Event) -> Result<(), BufferError>;
}
