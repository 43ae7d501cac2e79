//! Error types for the runtime core.
//!
//! The taxonomy distinguishes invocation-scoped failures (reported on the
//! `/invocation/{id}/error` endpoint, after which the runtime keeps polling),
//! init-scoped failures (reported once on `/init/error`, after which the
//! runtime exits), and fatal protocol or transport failures.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Boxed error type accepted from user handlers and codecs.
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Errors surfaced by the runtime core.
#[non_exhaustive]
#[derive(Debug, Error)]
pub enum Error {
    /// The event decoder rejected the invocation payload.
    #[error("failed to decode invocation payload")]
    RequestDecoding(#[source] BoxError),

    /// The output encoder failed to produce response bytes.
    #[error("failed to encode handler output")]
    ResponseEncoding(#[source] BoxError),

    /// The user handler returned an error.
    #[error("handler failed")]
    HandlerFailure(#[source] BoxError),

    /// Handler construction failed during cold start.
    #[error("handler initialization failed")]
    HandlerInitFailure(#[source] BoxError),

    /// The Runtime API returned a malformed or impossible response.
    #[error("runtime API protocol violation: {0}")]
    ProtocolViolation(String),

    /// Network-level failure talking to the Runtime API.
    #[error("transport error")]
    Transport(#[source] std::io::Error),

    /// Invalid runtime configuration.
    #[error("invalid configuration")]
    Config(#[from] ConfigError),
}

impl Error {
    /// Stable type tag used as the `errorType` field of the wire error body.
    pub fn error_type(&self) -> &'static str {
        match self {
            Error::RequestDecoding(_) => "RequestDecoding",
            Error::ResponseEncoding(_) => "ResponseEncoding",
            Error::HandlerFailure(_) => "HandlerFailure",
            Error::HandlerInitFailure(_) => "HandlerInitFailure",
            Error::ProtocolViolation(_) => "ProtocolViolation",
            Error::Transport(_) => "Transport",
            Error::Config(_) => "Config",
        }
    }

    /// Whether this error is scoped to a single invocation.
    ///
    /// Invocation-scoped errors are reported to the platform and the runtime
    /// returns to polling; everything else ends the run loop.
    pub fn is_invocation_scoped(&self) -> bool {
        matches!(
            self,
            Error::RequestDecoding(_) | Error::ResponseEncoding(_) | Error::HandlerFailure(_)
        )
    }

    /// Builds the JSON error body reported to the Runtime API.
    pub fn to_error_body(&self) -> ErrorBody {
        let message = match self {
            Error::RequestDecoding(source)
            | Error::ResponseEncoding(source)
            | Error::HandlerFailure(source)
            | Error::HandlerInitFailure(source) => source.to_string(),
            other => other.to_string(),
        };
        ErrorBody {
            error_type: self.error_type().to_string(),
            error_message: message,
            stack_trace: None,
        }
    }
}

/// Wire shape of an error report.
///
/// Serialized as `{"errorType": .., "errorMessage": ..}` with an optional
/// `stackTrace` array, matching what the platform expects on the
/// `/invocation/{id}/error` and `/init/error` endpoints.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorBody {
    /// Fully-qualified type tag of the failure.
    pub error_type: String,

    /// Human-readable description.
    pub error_message: String,

    /// Stack trace lines, if available.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stack_trace: Option<Vec<String>>,
}

/// Errors from runtime configuration loading.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// `AWS_LAMBDA_RUNTIME_API` was not a `host:port` pair.
    #[error("invalid runtime API endpoint: {0:?}")]
    InvalidEndpoint(String),

    /// `REQUEST_TIMEOUT` was not an integer number of milliseconds.
    #[error("invalid request timeout: {0:?}")]
    InvalidTimeout(String),
}
