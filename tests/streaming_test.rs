//! Streamed response tests.

mod common;

use bytes::Bytes;
use common::{Platform, QueuedInvocation, ReportKind};
use lambda_runtime_core::{BoxError, Context, Error, Handler, Response};

struct StreamingHandler;

impl Handler for StreamingHandler {
    async fn call(&mut self, _payload: Bytes, _ctx: Context) -> Result<Response, Error> {
        Ok(Response::streamed(|mut writer| async move {
            writer.write("hel").await?;
            writer.write("lo").await?;
            Ok(())
        }))
    }
}

#[tokio::test]
async fn streamed_chunks_arrive_as_one_chunked_body() {
    let platform = Platform::start().await;
    platform.enqueue(QueuedInvocation::new("xyz", "{}")).await;

    let runtime = lambda_runtime_core::Runtime::builder()
        .config(platform.config())
        .max_invocations(1)
        .no_sigterm_handler()
        .build()
        .unwrap();

    runtime
        .run(async { Ok::<_, BoxError>(StreamingHandler) })
        .await
        .unwrap();

    let reports = platform.reports().await;
    assert_eq!(reports.len(), 1);

    let report = &reports[0];
    assert_eq!(report.request_id, "xyz");
    assert_eq!(report.kind, ReportKind::Response);
    assert_eq!(&report.body[..], b"hello");
    // Chunked transfer: the runtime cannot know the length up front.
    assert_eq!(report.content_length, None);

    platform.shutdown().await;
}

struct FailingProducerHandler;

impl Handler for FailingProducerHandler {
    async fn call(&mut self, _payload: Bytes, _ctx: Context) -> Result<Response, Error> {
        Ok(Response::streamed(|mut writer| async move {
            writer.write("par").await?;
            Err("upstream went away".into())
        }))
    }
}

#[tokio::test]
async fn producer_failure_after_first_chunk_terminates_the_stream() {
    let platform = Platform::start().await;
    platform.enqueue(QueuedInvocation::new("xyz-2", "{}")).await;

    let runtime = lambda_runtime_core::Runtime::builder()
        .config(platform.config())
        .max_invocations(1)
        .no_sigterm_handler()
        .build()
        .unwrap();

    // The stream already started, so the failure cannot be re-reported on
    // the error endpoint; the runtime logs it and finishes the invocation.
    runtime
        .run(async { Ok::<_, BoxError>(FailingProducerHandler) })
        .await
        .unwrap();

    let reports = platform.reports().await;
    assert_eq!(reports.len(), 1);
    assert_eq!(reports[0].kind, ReportKind::Response);
    assert_eq!(&reports[0].body[..], b"par");

    platform.shutdown().await;
}
