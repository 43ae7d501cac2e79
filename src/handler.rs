//! Handler contract and typed adapters.
//!
//! The runtime itself only knows the byte-buffer [`Handler`] contract.
//! Typed handlers are composed from a [`TypedHandler`] plus an event
//! decoder and an output encoder via [`Adapter`]; closures become typed
//! handlers through [`handler_fn`].

use crate::codec::{EventDecoder, OutputEncoder};
use crate::context::Context;
use crate::error::{BoxError, Error};
use crate::response::Response;
use bytes::{Bytes, BytesMut};
use std::future::Future;
use std::marker::PhantomData;

/// Initial capacity of the reusable output buffer for encoding handlers.
const DEFAULT_OUTPUT_CAPACITY: usize = 1024 * 1024;

/// The minimal handler capability: opaque bytes in, response out.
///
/// Handlers are called serially, one invocation at a time, hence the
/// `&mut self` receiver.
pub trait Handler {
    /// Handles one invocation.
    fn call(
        &mut self,
        payload: Bytes,
        ctx: Context,
    ) -> impl Future<Output = Result<Response, Error>> + Send;
}

/// A handler expressed over typed event and output values.
pub trait TypedHandler {
    /// Decoded request type.
    type Event;

    /// Produced output type.
    type Output;

    /// Handles one decoded invocation.
    fn handle(
        &mut self,
        event: Self::Event,
        ctx: Context,
    ) -> impl Future<Output = Result<Self::Output, BoxError>> + Send;
}

/// Adapts a [`TypedHandler`] plus codecs to the byte-buffer [`Handler`]
/// contract.
///
/// Owns a reusable output buffer, cleared before each encode. The buffer
/// starts at 1 MiB, or zero when the encoder produces no body.
pub struct Adapter<H, D, E> {
    handler: H,
    decoder: D,
    encoder: E,
    output: BytesMut,
}

impl<H, D, E> Adapter<H, D, E>
where
    H: TypedHandler,
    D: EventDecoder<H::Event>,
    E: OutputEncoder<H::Output>,
{
    /// Wraps `handler` with the given codecs.
    pub fn new(handler: H, decoder: D, encoder: E) -> Self {
        let capacity = if E::PRODUCES_BODY {
            DEFAULT_OUTPUT_CAPACITY
        } else {
            0
        };
        Self {
            handler,
            decoder,
            encoder,
            output: BytesMut::with_capacity(capacity),
        }
    }
}

impl<H, D, E> Handler for Adapter<H, D, E>
where
    H: TypedHandler + Send,
    H::Event: Send,
    H::Output: Send,
    D: EventDecoder<H::Event> + Send,
    E: OutputEncoder<H::Output> + Send,
{
    async fn call(&mut self, payload: Bytes, ctx: Context) -> Result<Response, Error> {
        let event = self
            .decoder
            .decode(payload)
            .map_err(Error::RequestDecoding)?;

        let output = self
            .handler
            .handle(event, ctx)
            .await
            .map_err(Error::HandlerFailure)?;

        if !E::PRODUCES_BODY {
            return Ok(Response::None);
        }

        self.output.clear();
        self.encoder
            .encode(output, &mut self.output)
            .map_err(Error::ResponseEncoding)?;
        Ok(Response::Buffered(self.output.split().freeze()))
    }
}

/// Wraps an async closure as a [`TypedHandler`].
///
/// ```
/// use lambda_runtime_core::handler_fn;
///
/// #[derive(serde::Deserialize)]
/// struct Request { n: i64 }
///
/// #[derive(serde::Serialize)]
/// struct Reply { result: i64 }
///
/// let _handler = handler_fn(|request: Request, _ctx| async move {
///     Ok(Reply { result: request.n * request.n })
/// });
/// ```
pub fn handler_fn<F, Fut, Event, Output>(f: F) -> FnHandler<F, Event>
where
    F: FnMut(Event, Context) -> Fut + Send,
    Fut: Future<Output = Result<Output, BoxError>> + Send,
{
    FnHandler {
        f,
        _event: PhantomData,
    }
}

/// A [`TypedHandler`] backed by a closure. Built with [`handler_fn`].
pub struct FnHandler<F, Event> {
    f: F,
    _event: PhantomData<fn(Event)>,
}

impl<F, Fut, Event, Output> TypedHandler for FnHandler<F, Event>
where
    F: FnMut(Event, Context) -> Fut + Send,
    Fut: Future<Output = Result<Output, BoxError>> + Send,
    Event: Send,
    Output: Send,
{
    type Event = Event;
    type Output = Output;

    fn handle(
        &mut self,
        event: Self::Event,
        ctx: Context,
    ) -> impl Future<Output = Result<Self::Output, BoxError>> + Send {
        (self.f)(event, ctx)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::{JsonDecoder, JsonEncoder, UnitEncoder};
    use crate::context::TaskScope;
    use crate::invocation::Invocation;
    use chrono::Utc;
    use serde::{Deserialize, Serialize};

    #[derive(Deserialize)]
    struct Request {
        n: i64,
    }

    #[derive(Serialize)]
    struct Reply {
        result: i64,
    }

    fn test_context() -> Context {
        Context::new(
            Invocation {
                request_id: "abc-1".to_string(),
                deadline: Utc::now() + chrono::Duration::seconds(10),
                invoked_function_arn: "arn:aws:lambda:us-east-1:123456789012:function:fn"
                    .to_string(),
                trace_id: String::new(),
                cognito_identity: None,
                client_context: None,
            },
            TaskScope::new(),
        )
    }

    fn squaring_adapter() -> impl Handler {
        Adapter::new(
            handler_fn(|request: Request, _ctx| async move {
                Ok(Reply {
                    result: request.n * request.n,
                })
            }),
            JsonDecoder,
            JsonEncoder,
        )
    }

    #[tokio::test]
    async fn typed_adapter_encodes_output() {
        let mut adapter = squaring_adapter();

        let response = adapter
            .call(Bytes::from(r#"{"n":3}"#), test_context())
            .await
            .unwrap();

        match response {
            Response::Buffered(bytes) => assert_eq!(&bytes[..], br#"{"result":9}"#),
            other => panic!("unexpected response: {other:?}"),
        }
    }

    #[tokio::test]
    async fn output_buffer_is_reused_across_calls() {
        let mut adapter = squaring_adapter();

        for n in [2i64, 5] {
            let payload = Bytes::from(format!(r#"{{"n":{n}}}"#));
            let response = adapter.call(payload, test_context()).await.unwrap();
            match response {
                Response::Buffered(bytes) => {
                    assert_eq!(bytes, Bytes::from(format!(r#"{{"result":{}}}"#, n * n)));
                }
                other => panic!("unexpected response: {other:?}"),
            }
        }
    }

    #[tokio::test]
    async fn decode_failure_maps_to_request_decoding() {
        let mut adapter = squaring_adapter();

        let err = adapter
            .call(Bytes::from(r#"{"n":"bad"}"#), test_context())
            .await
            .unwrap_err();

        assert!(matches!(err, Error::RequestDecoding(_)));
    }

    #[tokio::test]
    async fn handler_failure_maps_to_handler_failure() {
        let mut adapter = Adapter::new(
            handler_fn(|_request: Request, _ctx| async move {
                Err::<Reply, BoxError>("database on fire".into())
            }),
            JsonDecoder,
            JsonEncoder,
        );

        let err = adapter
            .call(Bytes::from(r#"{"n":1}"#), test_context())
            .await
            .unwrap_err();

        assert!(matches!(err, Error::HandlerFailure(_)));
        assert_eq!(err.to_error_body().error_message, "database on fire");
    }

    #[tokio::test]
    async fn unit_output_skips_encoding() {
        let mut adapter = Adapter::new(
            handler_fn(|_request: Request, _ctx| async move { Ok(()) }),
            JsonDecoder,
            UnitEncoder,
        );

        let response = adapter
            .call(Bytes::from(r#"{"n":1}"#), test_context())
            .await
            .unwrap();

        assert!(matches!(response, Response::None));
    }
}
