// Copyright (c) 2025 Varshith Gudur. Licensed under AGPLv3.
//! Batch sinks: where a drained batch goes.

use futures::future::BoxFuture;
use std::sync::Arc;
use thiserror::Error;
use tlytics::Event;

use crate::store::{EventStore, StoreError};

#[derive(Error, Debug)]
pub enum SinkError {
    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("Network error: {0}")]
    Network(String),

    #[error("Server returned status: {0}")]
    Status(u16),
}

pub type SinkResult<T> = Result<T, SinkError>;

/// Single-method "commit batch" capability shared by the local and remote
/// pipelines.
///
/// A commit either accepts the whole batch or fails; the drainer decides
/// whether to retry, spill or drop.
pub trait BatchSink: Send + Sync + 'static {
    /// Short label used in logs and metrics.
    fn name(&self) -> &'static str;

    fn commit<'a>(&'a self, batch: &'a [Event]) -> BoxFuture<'a, SinkResult<()>>;
}

/// Commits batches into the local store on the blocking thread pool.
#[derive(Clone)]
pub struct StoreSink {
    store: Arc<EventStore>,
}

impl StoreSink {
    pub fn new(store: Arc<EventStore>) -> Self {
        Self { store }
    }

    pub fn store(&self) -> &Arc<EventStore> {
        &self.store
    }
}

impl BatchSink for StoreSink {
    fn name(&self) -> &'static str {
        "store"
    }

    fn commit<'a>(&'a self, batch: &'a [Event]) -> BoxFuture<'a, SinkResult<()>> {
        let store = self.store.clone();
        let batch = batch.to_vec();
        Box::pin(async move {
            tokio::task::spawn_blocking(move || store.insert_batch(&batch))
                .await
                .map_err(|e| StoreError::Join(e.to_string()))??;
            Ok(())
        })
    }
}
