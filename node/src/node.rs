// Copyright (c) 2025 Varshith Gudur. Licensed under AGPLv3.
use axum::Router;
use std::future::Future;
use std::sync::Arc;
use tlytics::Event;
use tokio::net::TcpListener;

use crate::config::NodeConfig;
use crate::errors::NodeError;
use crate::ingest::{BufferError, FlushOutcome, IngestHandle, StoreSink};
use crate::server::{build_router, AppState};
use crate::store::{EventPage, EventStore, StoreError};

/// A running ingestion node: durable store, buffer and flush scheduler.
pub struct Node {
    config: NodeConfig,
    store: Arc<EventStore>,
    buffer: IngestHandle<StoreSink>,
}

impl Node {
    /// Open the store and start the scheduler. A store that cannot be opened
    /// is fatal.
    pub async fn open(config: NodeConfig) -> Result<Self, NodeError> {
        let path = config.db_path.clone();
        let store = tokio::task::spawn_blocking(move || EventStore::open(&path))
            .await
            .map_err(|e| StoreError::Join(e.to_string()))??;
        tracing::info!("Event store opened at {:?}", config.db_path);

        Ok(Self::with_store(config, Arc::new(store)))
    }

    /// Start a node over an already opened store.
    pub fn with_store(config: NodeConfig, store: Arc<EventStore>) -> Self {
        let buffer = IngestHandle::spawn(StoreSink::new(store.clone()), config.ingest());
        Self { config, store, buffer }
    }

    pub fn config(&self) -> &NodeConfig {
        &self.config
    }

    pub fn store(&self) -> &Arc<EventStore> {
        &self.store
    }

    pub fn buffer(&self) -> &IngestHandle<StoreSink> {
        &self.buffer
    }

    pub fn emit(&self, event: Event) -> Result<(), BufferError> {
        self.buffer.emit(event)
    }

    pub async fn flush(&self) -> Result<FlushOutcome, BufferError> {
        self.buffer.flush().await
    }

    pub async fn get_events(&self, limit: usize, offset: usize) -> Result<EventPage, NodeError> {
        let store = self.store.clone();
        let page = tokio::task::spawn_blocking(move || store.get_events(limit, offset))
            .await
            .map_err(|e| StoreError::Join(e.to_string()))??;
        Ok(page)
    }

    pub async fn recover_spilled(&self) -> Result<usize, BufferError> {
        self.buffer.recover_spilled().await
    }

    /// HTTP surface for this node, reporting `port` on `/health`.
    pub fn router(&self, port: u16) -> Router {
        let state = Arc::new(AppState {
            buffer: self.buffer.clone(),
            store: self.store.clone(),
            port,
            max_page_size: self.config.max_page_size,
        });
        build_router(state, self.config.auth_token.clone(), &self.config.cors_origins)
    }

    /// Serve on `listener` until `shutdown` resolves, then drain the buffer.
    pub async fn serve_until(
        &self,
        listener: TcpListener,
        shutdown: impl Future<Output = ()> + Send + 'static,
    ) -> Result<(), NodeError> {
        let port = listener.local_addr()?.port();
        let app = self.router(port);

        tracing::info!("Listening on {}", listener.local_addr()?);
        let served = axum::serve(listener, app)
            .with_graceful_shutdown(shutdown)
            .await;

        self.stop().await;
        served.map_err(NodeError::from)
    }

    /// Bind the configured address and serve until Ctrl-C.
    pub async fn run(&self) -> Result<(), NodeError> {
        let listener = TcpListener::bind(self.config.bind_addr).await?;
        self.serve_until(listener, async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                tracing::error!("Failed to listen for shutdown signal: {}", e);
            }
            tracing::info!("Shutdown signal received");
        })
        .await
    }

    /// Final drain; later emits fail with [`BufferError::Closed`].
    pub async fn stop(&self) {
        self.buffer.stop().await;
        tracing::info!("Node stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::NodeConfig;
    use tempfile::tempdir;

    #[tokio::test]
    async fn test_open_fails_on_unwritable_path() {
        let dir = tempdir().unwrap();
        let config = NodeConfig {
            db_path: dir.path().join("missing").join("events.db"),
            ..NodeConfig::default()
        };
        assert!(matches!(Node::open(config).await, Err(NodeError::Store(_))));
    }

    #[tokio::test]
    async fn test_emit_flush_read() {
        let dir = tempdir().unwrap();
        let config = NodeConfig {
            db_path: dir.path().join("events.db"),
            ..NodeConfig::default()
        };
        let node = Node::open(config).await.unwrap();

        node.emit(Event::new("a")).unwrap();
        node.emit(Event::new("b")).unwrap();
        assert_eq!(node.flush().await.unwrap().committed(), 2);

        let page = node.get_events(10, 0).await.unwrap();
        assert_eq!(page.total, 2);
        assert_eq!(page.events[0].key(), "b");

        node.stop().await;
        assert!(matches!(node.emit(Event::new("c")), Err(BufferError::Closed)));
    }

    #[derive(Clone, Default)]
    struct LogCapture(Arc<std::sync::Mutex<Vec<u8>>>);

    impl std::io::Write for LogCapture {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_open_logs_store_path_once() {
        use tracing::instrument::WithSubscriber;

        let capture = LogCapture::default();
        let writer = capture.clone();
        let subscriber = tracing_subscriber::fmt()
            .with_ansi(false)
            .with_writer(move || writer.clone())
            .finish();

        let dir = tempdir().unwrap();
        let config = NodeConfig {
            db_path: dir.path().join("events.db"),
            ..NodeConfig::default()
        };
        let node = Node::open(config).with_subscriber(subscriber).await.unwrap();

        let logs = String::from_utf8(capture.0.lock().unwrap().clone()).unwrap();
        assert_eq!(logs.matches("Event store opened at").count(), 1);
        node.stop().await;
    }
}
