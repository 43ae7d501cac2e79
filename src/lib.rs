//! # Lambda Runtime Core
//!
//! The core runtime loop for AWS Lambda custom runtimes: a long-running
//! process embedded alongside user code in a Lambda execution environment,
//! mediating between the Runtime API and a user-supplied handler.
//!
//! ## Overview
//!
//! The runtime long-polls the local Runtime API for invocations, invokes
//! the handler exactly once per invocation, and reports the result or
//! failure back to the platform. A pure lifecycle state machine sequences
//! cold-start handler construction, polling, dispatch, reporting, and
//! graceful shutdown; the driver executes its decisions.
//!
//! ## Quick start
//!
//! ```no_run
//! use lambda_runtime_core::{handler_fn, Adapter, JsonDecoder, JsonEncoder, Runtime};
//!
//! #[derive(serde::Deserialize)]
//! struct Request {
//!     n: i64,
//! }
//!
//! #[derive(serde::Serialize)]
//! struct Reply {
//!     result: i64,
//! }
//!
//! #[tokio::main]
//! async fn main() -> Result<(), lambda_runtime_core::Error> {
//!     lambda_runtime_core::init_tracing();
//!
//!     Runtime::builder()
//!         .build()?
//!         .run(async {
//!             let handler = handler_fn(|request: Request, _ctx| async move {
//!                 Ok(Reply { result: request.n * request.n })
//!             });
//!             Ok(Adapter::new(handler, JsonDecoder, JsonEncoder))
//!         })
//!         .await
//! }
//! ```
//!
//! ## Handlers
//!
//! The runtime itself only knows the byte-buffer [`Handler`] contract:
//! payload bytes and a [`Context`] in, a [`Response`] out. Typed handlers
//! are composed from a [`TypedHandler`] plus an event decoder and output
//! encoder via [`Adapter`]; [`handler_fn`] lifts an async closure into a
//! typed handler. Responses can be empty, buffered, or streamed with
//! chunked transfer encoding ([`Response::streamed`]).
//!
//! ## Runtime API
//!
//! The runtime speaks exactly these endpoints over a single persistent
//! HTTP/1.1 connection:
//!
//! - `GET /2018-06-01/runtime/invocation/next` - next invocation (long-poll)
//! - `POST /2018-06-01/runtime/invocation/{requestId}/response` - result
//! - `POST /2018-06-01/runtime/invocation/{requestId}/error` - failure
//! - `POST /2018-06-01/runtime/init/error` - fatal initialization error
//!
//! The endpoint is taken from `AWS_LAMBDA_RUNTIME_API` (`host:port`),
//! defaulting to `127.0.0.1:7000`. See
//! <https://docs.aws.amazon.com/lambda/latest/dg/runtimes-api.html>.

mod client;
pub mod codec;
pub mod config;
pub mod context;
pub mod error;
pub mod handler;
pub mod invocation;
pub mod lifecycle;
pub mod response;
pub mod runtime;
pub mod trace_id;

pub use codec::{EventDecoder, JsonDecoder, JsonEncoder, OutputEncoder, UnitEncoder};
pub use config::Config;
pub use context::Context;
pub use error::{BoxError, ConfigError, Error, ErrorBody};
pub use handler::{handler_fn, Adapter, FnHandler, Handler, TypedHandler};
pub use invocation::Invocation;
pub use response::{Response, StreamWriter};
pub use runtime::{Runtime, RuntimeBuilder};
pub use trace_id::{SegmentId, TraceId, TraceIdError};

use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Initializes the tracing subscriber for a runtime binary.
///
/// `RUST_LOG` takes precedence when set; otherwise the `LOG_LEVEL`
/// environment variable selects the threshold using the platform's level
/// names (`trace`, `debug`, `info`, `notice`, `warning`, `error`,
/// `critical`), defaulting to `info`. Safe to call more than once; later
/// calls are no-ops.
pub fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        let level = std::env::var("LOG_LEVEL")
            .map(|value| log_level_directive(&value))
            .unwrap_or("info");
        EnvFilter::new(level)
    });

    let _ = tracing_subscriber::registry()
        .with(fmt::layer().with_target(true).without_time())
        .with(filter)
        .try_init();
}

fn log_level_directive(level: &str) -> &'static str {
    match level.to_ascii_lowercase().as_str() {
        "trace" => "trace",
        "debug" => "debug",
        "info" | "notice" => "info",
        "warning" => "warn",
        "error" | "critical" => "error",
        _ => "info",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn log_levels_map_to_tracing_directives() {
        assert_eq!(log_level_directive("notice"), "info");
        assert_eq!(log_level_directive("WARNING"), "warn");
        assert_eq!(log_level_directive("critical"), "error");
        assert_eq!(log_level_directive("chatty"), "info");
    }
}
