// Copyright (c) 2025 Varshith Gudur. Licensed under AGPLv3.
//! Request tracking for host applications.
//!
//! Both layers turn HTTP traffic into events on any [`Emitter`], so a service
//! can record its own requests into a local buffer or ship them to a remote
//! node through [`crate::network::RemoteClient`].
//!
//! ```ignore
//! let emitter: Arc<dyn Emitter> = Arc::new(client);
//! let app = Router::new()
//!     .route("/signup", post(signup).route_layer(from_fn_with_state(
//!         Arc::new(TrackedEvent::new(emitter.clone(), "signup")),
//!         track_event,
//!     )))
//!     .layer(from_fn_with_state(emitter, track_requests));
//! ```

use axum::body::HttpBody;
use axum::extract::{ConnectInfo, Request, State};
use axum::http::header::CONTENT_LENGTH;
use axum::middleware::Next;
use axum::response::Response;
use axum_extra::TypedHeader;
use chrono::Utc;
use headers::UserAgent;
use serde_json::Value;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;
use tlytics::{Event, Payload};

use crate::ingest::Emitter;

pub const HTTP_REQUEST_KEY: &str = "http_request";

/// Body length from `Content-Length`, else from an exact size hint.
fn response_size(response: &Response) -> Option<u64> {
    response
        .headers()
        .get(CONTENT_LENGTH)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.parse().ok())
        .or_else(|| response.body().size_hint().exact())
}

/// Emits one `http_request` event per request after the inner service has
/// answered, stamped with the time the request arrived.
pub async fn track_requests(
    State(emitter): State<Arc<dyn Emitter>>,
    user_agent: Option<TypedHeader<UserAgent>>,
    connect_info: Option<ConnectInfo<SocketAddr>>,
    req: Request,
    next: Next,
) -> Response {
    let started_at = Utc::now();
    let start = Instant::now();
    let method = req.method().to_string();
    let path = req.uri().path().to_string();

    let response = next.run(req).await;

    let mut event = Event::new(HTTP_REQUEST_KEY)
        .at(started_at)
        .with_field("method", method)
        .with_field("path", path)
        .with_field("status_code", response.status().as_u16())
        .with_field("duration_ms", start.elapsed().as_millis() as u64);
    if let Some(size) = response_size(&response) {
        event = event.with_field("response_size", size);
    }
    if let Some(TypedHeader(ua)) = user_agent {
        event = event.with_field("user_agent", ua.as_str());
    }
    if let Some(ConnectInfo(addr)) = connect_info {
        event = event.with_field("client_ip", addr.ip().to_string());
    }

    // Tracking must never fail the request it observes
    if let Err(e) = emitter.emit(event) {
        tracing::warn!("Failed to track request: {}", e);
    }
    response
}

/// A fixed event attached to one route.
pub struct TrackedEvent {
    emitter: Arc<dyn Emitter>,
    key: String,
    data: Payload,
}

impl TrackedEvent {
    pub fn new(emitter: Arc<dyn Emitter>, key: impl Into<String>) -> Self {
        Self {
            emitter,
            key: key.into(),
            data: Payload::new(),
        }
    }

    pub fn with_data(mut self, data: Payload) -> Self {
        self.data = data;
        self
    }
}

/// Emits the configured event after the route has run, stamped with the
/// request's arrival time. Adds `request_path`, `client_ip` (when known) and
/// `duration_ms` to its data.
pub async fn track_event(
    State(tracked): State<Arc<TrackedEvent>>,
    connect_info: Option<ConnectInfo<SocketAddr>>,
    req: Request,
    next: Next,
) -> Response {
    let started_at = Utc::now();
    let start = Instant::now();
    let path = req.uri().path().to_string();

    let response = next.run(req).await;

    let mut data = tracked.data.clone();
    data.insert("request_path".to_string(), Value::from(path));
    if let Some(ConnectInfo(addr)) = connect_info {
        data.insert("client_ip".to_string(), Value::from(addr.ip().to_string()));
    }
    data.insert(
        "duration_ms".to_string(),
        Value::from(start.elapsed().as_millis() as u64),
    );

    if let Err(e) = tracked
        .emitter
        .emit(Event::new(tracked.key.clone()).with_data(data).at(started_at))
    {
        tracing::warn!("Failed to track event {}: {}", tracked.key, e);
    }
    response
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ingest::BufferError;
    use axum::body::Body;
    use axum::http::{header, StatusCode};
    use axum::middleware::from_fn_with_state;
    use axum::routing::get;
    use axum::Router;
    use std::sync::Mutex;
    use tower::ServiceExt;

    #[derive(Default)]
    struct Captured(Mutex<Vec<Event>>);

    impl Emitter for Captured {
        fn emit(&self, event: Event) -> Result<(), BufferError> {
            event.validate()?;
            self.0.lock().unwrap().push(event);
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_track_requests_records_status_and_agent() {
        let captured = Arc::new(Captured::default());
        let emitter: Arc<dyn Emitter> = captured.clone();
        let app = Router::new()
            .route("/ok", get(|| async { "ok" }))
            .route("/missing", get(|| async { StatusCode::NOT_FOUND }))
            .layer(from_fn_with_state(emitter, track_requests));

        let before = Utc::now();
        let mut req = Request::builder()
            .uri("/ok")
            .header(header::USER_AGENT, "agent/1.0")
            .body(Body::empty())
            .unwrap();
        req.extensions_mut()
            .insert(ConnectInfo(SocketAddr::from(([10, 0, 0, 7], 5123))));
        let resp = app.clone().oneshot(req).await.unwrap();
        let after = Utc::now();
        assert_eq!(resp.status(), StatusCode::OK);

        let req = Request::builder().uri("/missing").body(Body::empty()).unwrap();
        let resp = app.oneshot(req).await.unwrap();
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);

        let events = captured.0.lock().unwrap();
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].key(), HTTP_REQUEST_KEY);
        assert_eq!(events[0].data()["method"], "GET");
        assert_eq!(events[0].data()["path"], "/ok");
        assert_eq!(events[0].data()["status_code"], 200);
        assert_eq!(events[0].data()["user_agent"], "agent/1.0");
        assert_eq!(events[0].data()["client_ip"], "10.0.0.7");
        assert_eq!(events[0].data()["response_size"], 2);
        assert!(events[0].data()["duration_ms"].is_u64());
        let ts = events[0].timestamp().unwrap();
        assert!(ts >= before && ts <= after);

        assert_eq!(events[1].data()["status_code"], 404);
        assert!(events[1].data().get("user_agent").is_none());
        assert!(events[1].data().get("client_ip").is_none());
    }

    #[tokio::test]
    async fn test_track_event_adds_request_context() {
        let captured = Arc::new(Captured::default());
        let emitter: Arc<dyn Emitter> = captured.clone();

        let mut data = Payload::new();
        data.insert("plan".to_string(), Value::from("pro"));
        let tracked = Arc::new(TrackedEvent::new(emitter, "signup").with_data(data));

        let app = Router::new().route(
            "/signup",
            get(|| async { StatusCode::CREATED })
                .route_layer(from_fn_with_state(tracked, track_event)),
        );

        let before = Utc::now();
        let mut req = Request::builder().uri("/signup").body(Body::empty()).unwrap();
        req.extensions_mut()
            .insert(ConnectInfo(SocketAddr::from(([192, 168, 1, 20], 40000))));
        let resp = app.oneshot(req).await.unwrap();
        assert_eq!(resp.status(), StatusCode::CREATED);

        let events = captured.0.lock().unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].key(), "signup");
        assert_eq!(events[0].data()["plan"], "pro");
        assert_eq!(events[0].data()["request_path"], "/signup");
        assert_eq!(events[0].data()["client_ip"], "192.168.1.20");
        assert!(events[0].data().contains_key("duration_ms"));
        // Stamped on arrival, not when the buffer sees it
        assert!(events[0].timestamp().unwrap() >= before);
    }

    #[tokio::test]
    async fn test_emit_failure_does_not_break_request() {
        let captured = Arc::new(Captured::default());
        let emitter: Arc<dyn Emitter> = captured.clone();
        let tracked = Arc::new(TrackedEvent::new(emitter, "  "));

        let app = Router::new().route(
            "/x",
            get(|| async { "fine" }).route_layer(from_fn_with_state(tracked, track_event)),
        );
        let req = Request::builder().uri("/x").body(Body::empty()).unwrap();
        let resp = app.oneshot(req).await.unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        assert!(captured.0.lock().unwrap().is_empty());
    }
}
