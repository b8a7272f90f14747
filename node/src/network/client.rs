// Copyright (c) 2025 Varshith Gudur. Licensed under AGPLv3.
//! Client-side mirror of a node's ingestion path.
//!
//! Same buffer and scheduler as the node, but drained batches are POSTed as
//! a JSON array to `{server_url}/events` on a remote node.

use chrono::Utc;
use futures::future::BoxFuture;
use reqwest::Client;
use std::time::Duration;
use tlytics::Event;

use crate::config::{ClientConfig, ConfigError};
use crate::errors::NodeError;
use crate::ingest::sink::SinkResult;
use crate::ingest::{BatchSink, BufferError, Emitter, FlushOutcome, IngestHandle, SinkError};

pub const SUBMIT_PATH: &str = "/events";

#[derive(Debug, Clone)]
pub struct HttpSink {
    base_url: String,
    client: Client,
    auth_token: Option<String>,
}

impl HttpSink {
    pub fn new(url: &str, timeout: Duration, auth_token: Option<String>) -> Result<Self, NodeError> {
        let trimmed = url.trim_end_matches('/');
        if trimmed.is_empty() {
            return Err(ConfigError::MissingServerUrl.into());
        }
        reqwest::Url::parse(trimmed).map_err(|_| ConfigError::Invalid {
            var: "server_url",
            value: url.to_string(),
        })?;

        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| NodeError::Network(e.to_string()))?;

        Ok(Self {
            base_url: trimmed.to_string(),
            client,
            auth_token,
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub async fn send_events(&self, events: &[Event]) -> SinkResult<()> {
        let url = format!("{}{}", self.base_url, SUBMIT_PATH);

        let mut req = self.client.post(&url).json(events);
        if let Some(token) = &self.auth_token {
            req = req.bearer_auth(token);
        }

        let resp = req
            .send()
            .await
            .map_err(|e| SinkError::Network(e.to_string()))?;

        if !resp.status().is_success() {
            return Err(SinkError::Status(resp.status().as_u16()));
        }
        Ok(())
    }
}

impl BatchSink for HttpSink {
    fn name(&self) -> &'static str {
        "remote"
    }

    fn commit<'a>(&'a self, batch: &'a [Event]) -> BoxFuture<'a, SinkResult<()>> {
        Box::pin(self.send_events(batch))
    }
}

/// Buffered emitter for processes without a local store.
#[derive(Clone)]
pub struct RemoteClient {
    buffer: IngestHandle<HttpSink>,
    sink: HttpSink,
}

impl RemoteClient {
    /// Validate the config and start the flush scheduler on the current
    /// runtime.
    pub fn connect(config: ClientConfig) -> Result<Self, NodeError> {
        let sink = HttpSink::new(&config.server_url, config.timeout, config.auth_token.clone())?;
        let buffer = IngestHandle::spawn(sink.clone(), config.ingest());
        tracing::info!(
            "Remote client for {} started (flush every {:?})",
            sink.base_url(),
            config.flush_period
        );
        Ok(Self { buffer, sink })
    }

    pub fn server_url(&self) -> &str {
        self.sink.base_url()
    }

    pub fn emit(&self, event: Event) -> Result<(), BufferError> {
        self.buffer.emit(event)
    }

    /// Send one event right away, bypassing the buffer. Failures are
    /// returned to the caller rather than handled by the delivery policy.
    pub async fn send_now(&self, event: Event) -> Result<(), NodeError> {
        event.validate().map_err(BufferError::from)?;
        let event = event.stamped(Utc::now());
        self.sink
            .send_events(std::slice::from_ref(&event))
            .await
            .map_err(|e| NodeError::Network(e.to_string()))
    }

    pub async fn flush(&self) -> Result<FlushOutcome, BufferError> {
        self.buffer.flush().await
    }

    pub async fn recover_spilled(&self) -> Result<usize, BufferError> {
        self.buffer.recover_spilled().await
    }

    /// Final flush, then the client is unusable.
    pub async fn stop(&self) {
        self.buffer.stop().await;
        tracing::info!("Remote client for {} stopped", self.sink.base_url());
    }
}

impl Emitter for RemoteClient {
    fn emit(&self, event: Event) -> Result<(), BufferError> {
        self.buffer.emit(event)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_empty_url_rejected() {
        let err = RemoteClient::connect(ClientConfig::new("")).err().unwrap();
        assert!(matches!(err, NodeError::Config(ConfigError::MissingServerUrl)));
    }

    #[tokio::test]
    async fn test_invalid_url_rejected() {
        let err = RemoteClient::connect(ClientConfig::new("not a url")).err().unwrap();
        assert!(matches!(err, NodeError::Config(ConfigError::Invalid { .. })));
    }

    #[tokio::test]
    async fn test_sends_json_array_with_bearer() {
        use axum::http::HeaderMap;
        use axum::routing::post;
        use axum::{Json, Router};
        use std::sync::{Arc, Mutex};

        type Seen = Arc<Mutex<Vec<(Option<String>, Vec<Event>)>>>;
        let seen: Seen = Arc::default();
        let recorder = seen.clone();
        // The Json extractor rejects bodies without an application/json type
        let app = Router::new().route(
            SUBMIT_PATH,
            post(move |headers: HeaderMap, Json(events): Json<Vec<Event>>| {
                let recorder = recorder.clone();
                async move {
                    let auth = headers
                        .get("authorization")
                        .and_then(|v| v.to_str().ok())
                        .map(String::from);
                    recorder.lock().unwrap().push((auth, events));
                }
            }),
        );
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let url = format!("http://{}", listener.local_addr().unwrap());
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        let sink = HttpSink::new(&url, Duration::from_secs(5), Some("t0k".to_string())).unwrap();
        let batch = vec![Event::new("a").with_field("n", 1), Event::new("b")];
        sink.send_events(&batch).await.unwrap();

        let seen = seen.lock().unwrap();
        assert_eq!(seen.len(), 1);
        assert_eq!(seen[0].0.as_deref(), Some("Bearer t0k"));
        assert_eq!(seen[0].1, batch);
    }

    #[test]
    fn test_trailing_slash_trimmed() {
        let sink = HttpSink::new("http://127.0.0.1:9/", Duration::from_secs(1), None).unwrap();
        assert_eq!(sink.base_url(), "http://127.0.0.1:9");
    }
}
