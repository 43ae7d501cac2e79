//! Initialization failure tests.

mod common;

use common::Platform;
use lambda_runtime_core::{
    handler_fn, Adapter, BoxError, Error, Handler, JsonDecoder, JsonEncoder, Runtime,
};

/// A cold-start constructor whose database connection fails.
async fn failing_init() -> Result<impl Handler, BoxError> {
    let database_available = false;
    if !database_available {
        return Err("DBUnreachable: connection refused".into());
    }
    Ok(Adapter::new(
        handler_fn(|event: serde_json::Value, _ctx| async move { Ok(event) }),
        JsonDecoder,
        JsonEncoder,
    ))
}

#[tokio::test]
async fn init_failure_is_reported_once_and_ends_the_run() {
    let platform = Platform::start().await;

    let runtime = Runtime::builder()
        .config(platform.config())
        .no_sigterm_handler()
        .build()
        .unwrap();

    let result = runtime.run(failing_init()).await;

    assert!(matches!(result, Err(Error::HandlerInitFailure(_))));

    let init_errors = platform.init_errors().await;
    assert_eq!(init_errors.len(), 1);
    assert_eq!(
        init_errors[0].function_error_type.as_deref(),
        Some("Unhandled")
    );

    let body: serde_json::Value = serde_json::from_slice(&init_errors[0].body).unwrap();
    assert_eq!(body["errorType"], "HandlerInitFailure");
    assert!(body["errorMessage"]
        .as_str()
        .unwrap()
        .contains("DBUnreachable"));

    // The runtime must never ask for work after a failed init.
    assert_eq!(platform.next_poll_count(), 0);
    assert!(platform.reports().await.is_empty());

    platform.shutdown().await;
}
