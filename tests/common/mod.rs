//! In-process mock of the Lambda Runtime API for integration tests.
//!
//! Implements the four runtime endpoints over axum, queueing invocations
//! for the long-poll `next` endpoint and recording every report verbatim
//! (raw body bytes plus the headers the assertions care about).

use axum::extract::{Path, State};
use axum::http::{HeaderMap, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::Router;
use bytes::Bytes;
use chrono::Utc;
use lambda_runtime_core::Config;
use std::collections::VecDeque;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::{Mutex, Notify};
use tokio::task::JoinHandle;

/// One invocation waiting to be served on `next`.
#[derive(Debug, Clone)]
pub struct QueuedInvocation {
    pub request_id: String,
    pub deadline_ms: i64,
    pub function_arn: String,
    pub trace_id: Option<String>,
    pub payload: Bytes,
}

impl QueuedInvocation {
    pub fn new(request_id: impl Into<String>, payload: impl Into<Bytes>) -> Self {
        Self {
            request_id: request_id.into(),
            deadline_ms: Utc::now().timestamp_millis() + 10_000,
            function_arn: "arn:aws:lambda:us-east-1:123456789012:function:test-fn".to_string(),
            trace_id: None,
            payload: payload.into(),
        }
    }

    pub fn with_trace_id(mut self, trace_id: impl Into<String>) -> Self {
        self.trace_id = Some(trace_id.into());
        self
    }
}

/// Which endpoint a report arrived on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReportKind {
    Response,
    Error,
}

/// A report captured verbatim from the runtime under test.
#[derive(Debug, Clone)]
pub struct RecordedReport {
    pub request_id: String,
    pub kind: ReportKind,
    pub body: Bytes,
    pub content_length: Option<String>,
    pub content_type: Option<String>,
    pub function_error_type: Option<String>,
}

/// An initialization error captured from `init/error`.
#[derive(Debug, Clone)]
pub struct RecordedInitError {
    pub body: Bytes,
    pub function_error_type: Option<String>,
}

#[derive(Default)]
struct PlatformState {
    queue: Mutex<VecDeque<QueuedInvocation>>,
    invocation_available: Notify,
    reports: Mutex<Vec<RecordedReport>>,
    init_errors: Mutex<Vec<RecordedInitError>>,
    next_polls: AtomicUsize,
}

/// A running mock platform.
pub struct Platform {
    state: Arc<PlatformState>,
    addr: SocketAddr,
    server: JoinHandle<()>,
}

impl Platform {
    /// Binds the mock platform on a random local port.
    pub async fn start() -> Self {
        let state = Arc::new(PlatformState::default());

        let router = Router::new()
            .route("/2018-06-01/runtime/invocation/next", get(next_invocation))
            .route(
                "/2018-06-01/runtime/invocation/{request_id}/response",
                post(invocation_response),
            )
            .route(
                "/2018-06-01/runtime/invocation/{request_id}/error",
                post(invocation_error),
            )
            .route("/2018-06-01/runtime/init/error", post(init_error))
            .with_state(Arc::clone(&state));

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let server = tokio::spawn(async move {
            axum::serve(listener, router).await.unwrap();
        });

        Self {
            state,
            addr,
            server,
        }
    }

    /// Runtime configuration pointing at this platform.
    pub fn config(&self) -> Config {
        Config {
            host: "127.0.0.1".to_string(),
            port: self.addr.port(),
            request_timeout: None,
        }
    }

    pub async fn enqueue(&self, invocation: QueuedInvocation) {
        self.state.queue.lock().await.push_back(invocation);
        self.state.invocation_available.notify_one();
    }

    /// How many times the runtime polled `next`.
    pub fn next_poll_count(&self) -> usize {
        self.state.next_polls.load(Ordering::SeqCst)
    }

    pub async fn reports(&self) -> Vec<RecordedReport> {
        self.state.reports.lock().await.clone()
    }

    pub async fn init_errors(&self) -> Vec<RecordedInitError> {
        self.state.init_errors.lock().await.clone()
    }

    /// Waits until `condition` holds, polling briefly.
    pub async fn wait_for<F>(&self, condition: F, timeout: Duration)
    where
        F: Fn() -> bool,
    {
        let deadline = tokio::time::Instant::now() + timeout;
        while !condition() {
            assert!(
                tokio::time::Instant::now() < deadline,
                "condition not met within {timeout:?}"
            );
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    }

    pub async fn shutdown(self) {
        self.server.abort();
        let _ = self.server.await;
    }
}

async fn next_invocation(State(state): State<Arc<PlatformState>>) -> Response {
    state.next_polls.fetch_add(1, Ordering::SeqCst);

    let invocation = loop {
        {
            let mut queue = state.queue.lock().await;
            if let Some(invocation) = queue.pop_front() {
                break invocation;
            }
        }
        state.invocation_available.notified().await;
    };

    let mut headers = HeaderMap::new();
    headers.insert(
        "lambda-runtime-aws-request-id",
        HeaderValue::from_str(&invocation.request_id).unwrap(),
    );
    headers.insert(
        "lambda-runtime-deadline-ms",
        HeaderValue::from_str(&invocation.deadline_ms.to_string()).unwrap(),
    );
    headers.insert(
        "lambda-runtime-invoked-function-arn",
        HeaderValue::from_str(&invocation.function_arn).unwrap(),
    );
    if let Some(trace_id) = &invocation.trace_id {
        headers.insert(
            "lambda-runtime-trace-id",
            HeaderValue::from_str(trace_id).unwrap(),
        );
    }

    (StatusCode::OK, headers, invocation.payload).into_response()
}

async fn invocation_response(
    State(state): State<Arc<PlatformState>>,
    Path(request_id): Path<String>,
    headers: HeaderMap,
    body: Bytes,
) -> StatusCode {
    record_report(&state, request_id, ReportKind::Response, headers, body).await;
    StatusCode::ACCEPTED
}

async fn invocation_error(
    State(state): State<Arc<PlatformState>>,
    Path(request_id): Path<String>,
    headers: HeaderMap,
    body: Bytes,
) -> StatusCode {
    record_report(&state, request_id, ReportKind::Error, headers, body).await;
    StatusCode::ACCEPTED
}

async fn init_error(
    State(state): State<Arc<PlatformState>>,
    headers: HeaderMap,
    body: Bytes,
) -> StatusCode {
    state.init_errors.lock().await.push(RecordedInitError {
        body,
        function_error_type: header_string(&headers, "lambda-runtime-function-error-type"),
    });
    StatusCode::ACCEPTED
}

async fn record_report(
    state: &PlatformState,
    request_id: String,
    kind: ReportKind,
    headers: HeaderMap,
    body: Bytes,
) {
    state.reports.lock().await.push(RecordedReport {
        request_id,
        kind,
        body,
        content_length: header_string(&headers, "content-length"),
        content_type: header_string(&headers, "content-type"),
        function_error_type: header_string(&headers, "lambda-runtime-function-error-type"),
    });
}

fn header_string(headers: &HeaderMap, name: &str) -> Option<String> {
    headers
        .get(name)
        .and_then(|value| value.to_str().ok())
        .map(str::to_string)
}
