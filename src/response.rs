//! Invocation response values.

use crate::error::{BoxError, Error};
use bytes::Bytes;
use std::fmt;
use std::future::Future;
use std::io;
use std::pin::Pin;
use tokio::sync::mpsc;

/// Number of in-flight chunks a streamed response may buffer before
/// `write` applies backpressure.
const STREAM_CHANNEL_CAPACITY: usize = 16;

type ProducerFuture = Pin<Box<dyn Future<Output = Result<(), BoxError>> + Send>>;

/// The result of one handler call.
pub enum Response {
    /// No response body; the platform is told "success, empty".
    None,

    /// A single opaque byte payload.
    Buffered(Bytes),

    /// A producer that emits the response incrementally. The stream is
    /// finalized when the producer returns.
    Streamed(StreamProducer),
}

impl Response {
    /// A buffered response from any byte source.
    pub fn buffered(payload: impl Into<Bytes>) -> Self {
        Response::Buffered(payload.into())
    }

    /// A streamed response driven by `producer`.
    ///
    /// The producer receives a [`StreamWriter`] and may emit zero or more
    /// chunks before returning.
    pub fn streamed<F, Fut>(producer: F) -> Self
    where
        F: FnOnce(StreamWriter) -> Fut + Send + 'static,
        Fut: Future<Output = Result<(), BoxError>> + Send + 'static,
    {
        Response::Streamed(StreamProducer(Box::new(move |writer| {
            Box::pin(producer(writer))
        })))
    }
}

impl fmt::Debug for Response {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Response::None => f.write_str("Response::None"),
            Response::Buffered(bytes) => write!(f, "Response::Buffered({} bytes)", bytes.len()),
            Response::Streamed(_) => f.write_str("Response::Streamed(..)"),
        }
    }
}

/// Deferred body producer for a streamed response.
pub struct StreamProducer(Box<dyn FnOnce(StreamWriter) -> ProducerFuture + Send>);

impl StreamProducer {
    /// Runs the producer against `writer`.
    pub(crate) fn run(self, writer: StreamWriter) -> ProducerFuture {
        (self.0)(writer)
    }
}

/// Writer handle passed to a streamed-response producer.
///
/// Each `write` pushes one chunk onto the response stream; dropping the
/// writer (or returning from the producer) finalizes the stream.
pub struct StreamWriter {
    tx: mpsc::Sender<Bytes>,
}

impl StreamWriter {
    /// Creates a writer plus the receiving end the transport drains.
    pub(crate) fn channel() -> (Self, mpsc::Receiver<Bytes>) {
        let (tx, rx) = mpsc::channel(STREAM_CHANNEL_CAPACITY);
        (Self { tx }, rx)
    }

    /// Pushes one chunk onto the response stream.
    ///
    /// # Errors
    ///
    /// Fails with [`Error::Transport`] when the transport side of the
    /// stream has gone away.
    pub async fn write(&mut self, chunk: impl Into<Bytes>) -> Result<(), Error> {
        self.tx.send(chunk.into()).await.map_err(|_| {
            Error::Transport(io::Error::new(
                io::ErrorKind::BrokenPipe,
                "response stream closed",
            ))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn buffered_constructor_takes_any_byte_source() {
        let response = Response::buffered("payload");
        match response {
            Response::Buffered(bytes) => assert_eq!(bytes, Bytes::from("payload")),
            other => panic!("unexpected response: {other:?}"),
        }
    }

    #[tokio::test]
    async fn producer_chunks_arrive_in_order() {
        let response = Response::streamed(|mut writer| async move {
            writer.write("hel").await?;
            writer.write("lo").await?;
            Ok(())
        });

        let producer = match response {
            Response::Streamed(producer) => producer,
            other => panic!("unexpected response: {other:?}"),
        };

        let (writer, mut rx) = StreamWriter::channel();
        let run = tokio::spawn(producer.run(writer));

        assert_eq!(rx.recv().await.unwrap(), Bytes::from("hel"));
        assert_eq!(rx.recv().await.unwrap(), Bytes::from("lo"));
        assert!(rx.recv().await.is_none());
        run.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn write_fails_once_receiver_is_gone() {
        let (mut writer, rx) = StreamWriter::channel();
        drop(rx);

        let err = writer.write("chunk").await.unwrap_err();
        assert!(matches!(err, Error::Transport(_)));
    }
}
