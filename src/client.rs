//! Runtime API client.
//!
//! Speaks exactly the four Runtime API endpoints over a single persistent
//! HTTP/1.1 connection. On any transport error the connection is dropped
//! and re-established on the next request. `next` polls carry no timeout;
//! the platform holds them open until an invocation is available.

use crate::config::Config;
use crate::error::{Error, ErrorBody};
use crate::invocation::Invocation;
use crate::response::{Response, StreamProducer, StreamWriter};
use bytes::Bytes;
use http::{header, Method, Request};
use http_body::{Body, Frame, SizeHint};
use http_body_util::combinators::BoxBody;
use http_body_util::{BodyExt, Empty, Full};
use hyper::body::Incoming;
use hyper::client::conn::http1::{self, SendRequest};
use hyper_util::rt::TokioIo;
use std::convert::Infallible;
use std::io;
use std::pin::Pin;
use std::task::{Context as TaskContext, Poll};
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::sync::mpsc;

/// Runtime API version prefix shared by all endpoints.
const API_VERSION: &str = "2018-06-01";

/// Header carrying the error classification on error reports.
const FUNCTION_ERROR_TYPE_HEADER: &str = "lambda-runtime-function-error-type";

/// The platform only distinguishes handled/unhandled; the runtime always
/// reports unhandled.
const FUNCTION_ERROR_TYPE: &str = "Unhandled";

const USER_AGENT: &str = concat!("lambda-runtime-core/", env!("CARGO_PKG_VERSION"));

type OutBody = BoxBody<Bytes, Infallible>;

/// Client for the local Runtime API endpoint.
pub(crate) struct ApiClient {
    host: String,
    port: u16,
    request_timeout: Option<Duration>,
    sender: Option<SendRequest<OutBody>>,
}

impl ApiClient {
    pub(crate) fn new(config: &Config) -> Self {
        Self {
            host: config.host.clone(),
            port: config.port,
            request_timeout: config.request_timeout,
            sender: None,
        }
    }

    /// Opens the persistent connection.
    ///
    /// # Errors
    ///
    /// [`Error::Transport`] when the TCP connect or HTTP handshake fails.
    pub(crate) async fn connect(&mut self) -> Result<(), Error> {
        let stream = TcpStream::connect((self.host.as_str(), self.port))
            .await
            .map_err(Error::Transport)?;

        let (sender, connection) = http1::handshake(TokioIo::new(stream))
            .await
            .map_err(|e| Error::Transport(io::Error::other(e)))?;

        tokio::spawn(async move {
            if let Err(error) = connection.await {
                tracing::debug!(%error, "runtime API connection ended");
            }
        });

        self.sender = Some(sender);
        Ok(())
    }

    /// Closes the connection. The next request, if any, reconnects.
    pub(crate) fn close(&mut self) {
        self.sender = None;
    }

    /// Long-polls the platform for the next invocation.
    ///
    /// Returns the invocation metadata and the opaque payload bytes.
    pub(crate) async fn next_invocation(&mut self) -> Result<(Invocation, Bytes), Error> {
        let request = self
            .request(Method::GET, "invocation/next")
            .body(empty_body())
            .map_err(|e| Error::ProtocolViolation(format!("invalid next request: {e}")))?;

        let response = self.send(request, None).await?;
        if !response.status().is_success() {
            return Err(Error::ProtocolViolation(format!(
                "next returned status {}",
                response.status()
            )));
        }

        let invocation = Invocation::from_headers(response.headers())?;
        let payload = self.collect_body(response.into_body()).await?;

        tracing::debug!(
            request_id = %invocation.request_id,
            payload_bytes = payload.len(),
            "received invocation"
        );
        Ok((invocation, payload))
    }

    /// Reports a successful invocation.
    pub(crate) async fn post_response(
        &mut self,
        request_id: &str,
        response: Response,
    ) -> Result<(), Error> {
        let path = format!("invocation/{request_id}/response");
        match response {
            Response::None => self.post_buffered(&path, Bytes::new(), None).await,
            Response::Buffered(bytes) => self.post_buffered(&path, bytes, None).await,
            Response::Streamed(producer) => self.post_streamed(&path, producer).await,
        }
    }

    /// Reports a failed invocation.
    pub(crate) async fn post_invocation_error(
        &mut self,
        request_id: &str,
        error: &ErrorBody,
    ) -> Result<(), Error> {
        let path = format!("invocation/{request_id}/error");
        self.post_error_body(&path, error).await
    }

    /// Reports a fatal initialization error.
    pub(crate) async fn post_init_error(&mut self, error: &ErrorBody) -> Result<(), Error> {
        self.post_error_body("init/error", error).await
    }

    async fn post_error_body(&mut self, path: &str, error: &ErrorBody) -> Result<(), Error> {
        let body = serde_json::to_vec(error)
            .map_err(|e| Error::ProtocolViolation(format!("unserializable error body: {e}")))?;
        self.post_buffered(path, Bytes::from(body), Some(FUNCTION_ERROR_TYPE))
            .await
    }

    async fn post_buffered(
        &mut self,
        path: &str,
        body: Bytes,
        error_type: Option<&str>,
    ) -> Result<(), Error> {
        let mut builder = self
            .request(Method::POST, path)
            .header(header::CONTENT_LENGTH, body.len());
        if error_type.is_some() {
            builder = builder
                .header(header::CONTENT_TYPE, "application/json")
                .header(FUNCTION_ERROR_TYPE_HEADER, FUNCTION_ERROR_TYPE);
        }
        let request = builder
            .body(Full::new(body).boxed())
            .map_err(|e| Error::ProtocolViolation(format!("invalid report request: {e}")))?;

        let response = self.send(request, self.request_timeout).await?;
        let status = response.status();
        self.collect_body(response.into_body()).await?;

        if !status.is_success() {
            return Err(Error::ProtocolViolation(format!(
                "report returned status {status}"
            )));
        }
        Ok(())
    }

    /// Streams a response with chunked transfer encoding.
    ///
    /// The producer runs concurrently with the POST; the request body ends
    /// when the producer returns (or fails) and drops its writer. A
    /// producer failure after the stream has started cannot be re-reported
    /// on the error endpoint, so it surfaces as a `HandlerFailure` to the
    /// caller once the POST has settled.
    async fn post_streamed(&mut self, path: &str, producer: StreamProducer) -> Result<(), Error> {
        let (writer, rx) = StreamWriter::channel();
        let request = self
            .request(Method::POST, path)
            .body(BoxBody::new(ChannelBody { rx }))
            .map_err(|e| Error::ProtocolViolation(format!("invalid report request: {e}")))?;

        self.ensure_connected().await?;
        let send = async {
            let sender = self
                .sender
                .as_mut()
                .ok_or_else(|| transport_error("connection unavailable"))?;
            sender
                .send_request(request)
                .await
                .map_err(|e| Error::Transport(io::Error::other(e)))
        };

        let (send_result, producer_result) = tokio::join!(send, producer.run(writer));

        let response = match send_result {
            Ok(response) => response,
            Err(error) => {
                self.sender = None;
                return Err(error);
            }
        };
        let status = response.status();
        self.collect_body(response.into_body()).await?;
        if !status.is_success() {
            return Err(Error::ProtocolViolation(format!(
                "report returned status {status}"
            )));
        }

        producer_result.map_err(Error::HandlerFailure)
    }

    async fn send(
        &mut self,
        request: Request<OutBody>,
        timeout: Option<Duration>,
    ) -> Result<http::Response<Incoming>, Error> {
        self.ensure_connected().await?;

        let result = {
            let sender = self
                .sender
                .as_mut()
                .ok_or_else(|| transport_error("connection unavailable"))?;
            let send = sender.send_request(request);
            match timeout {
                Some(limit) => match tokio::time::timeout(limit, send).await {
                    Ok(result) => result.map_err(|e| Error::Transport(io::Error::other(e))),
                    Err(_) => Err(Error::Transport(io::Error::new(
                        io::ErrorKind::TimedOut,
                        "runtime API request timed out",
                    ))),
                },
                None => send.await.map_err(|e| Error::Transport(io::Error::other(e))),
            }
        };

        match result {
            Ok(response) => Ok(response),
            Err(error) => {
                // The connection is in an unknown state; rebuild it on the
                // next request.
                self.sender = None;
                Err(error)
            }
        }
    }

    async fn ensure_connected(&mut self) -> Result<(), Error> {
        if self.sender.is_none() {
            self.connect().await?;
        }
        Ok(())
    }

    async fn collect_body(&mut self, body: Incoming) -> Result<Bytes, Error> {
        match body.collect().await {
            Ok(collected) => Ok(collected.to_bytes()),
            Err(error) => {
                self.sender = None;
                Err(Error::Transport(io::Error::other(error)))
            }
        }
    }

    fn request(&self, method: Method, path: &str) -> http::request::Builder {
        Request::builder()
            .method(method)
            .uri(format!("/{API_VERSION}/runtime/{path}"))
            .header(header::HOST, format!("{}:{}", self.host, self.port))
            .header(header::USER_AGENT, USER_AGENT)
    }
}

fn empty_body() -> OutBody {
    Empty::new().boxed()
}

fn transport_error(message: &str) -> Error {
    Error::Transport(io::Error::other(message.to_string()))
}

/// Request body fed chunk-by-chunk from a streamed-response producer.
///
/// The body reports no size hint, so hyper emits it with chunked transfer
/// encoding; the stream ends when the producer drops its writer.
struct ChannelBody {
    rx: mpsc::Receiver<Bytes>,
}

impl Body for ChannelBody {
    type Data = Bytes;
    type Error = Infallible;

    fn poll_frame(
        self: Pin<&mut Self>,
        cx: &mut TaskContext<'_>,
    ) -> Poll<Option<Result<Frame<Self::Data>, Self::Error>>> {
        match self.get_mut().rx.poll_recv(cx) {
            Poll::Ready(Some(chunk)) => Poll::Ready(Some(Ok(Frame::data(chunk)))),
            Poll::Ready(None) => Poll::Ready(None),
            Poll::Pending => Poll::Pending,
        }
    }

    fn is_end_stream(&self) -> bool {
        self.rx.is_closed() && self.rx.is_empty()
    }

    fn size_hint(&self) -> SizeHint {
        SizeHint::default()
    }
}
