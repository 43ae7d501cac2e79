//! Codec capabilities for typed handlers.
//!
//! Decoding and encoding are synchronous and fallible; the concrete codec
//! is pluggable, with serde_json implementations provided.

use crate::error::BoxError;
use bytes::{BufMut, Bytes, BytesMut};
use serde::de::DeserializeOwned;
use serde::Serialize;

/// Decodes raw invocation payload bytes into a typed event.
pub trait EventDecoder<T> {
    /// Decodes `payload` into a `T`.
    ///
    /// # Errors
    ///
    /// Any decode failure; the runtime reports it as a `RequestDecoding`
    /// invocation error.
    fn decode(&mut self, payload: Bytes) -> Result<T, BoxError>;
}

/// Encodes a typed handler output into response bytes.
pub trait OutputEncoder<T> {
    /// Whether this encoder produces a response body at all. When `false`
    /// the adapter skips encoding and reports an empty success.
    const PRODUCES_BODY: bool = true;

    /// Encodes `value` into `dst`. The destination has already been
    /// cleared by the caller.
    ///
    /// # Errors
    ///
    /// Any encode failure; the runtime reports it as a `ResponseEncoding`
    /// invocation error.
    fn encode(&mut self, value: T, dst: &mut BytesMut) -> Result<(), BoxError>;
}

/// serde_json event decoder.
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonDecoder;

impl<T: DeserializeOwned> EventDecoder<T> for JsonDecoder {
    fn decode(&mut self, payload: Bytes) -> Result<T, BoxError> {
        serde_json::from_slice(&payload).map_err(Into::into)
    }
}

/// serde_json output encoder.
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonEncoder;

impl<T: Serialize> OutputEncoder<T> for JsonEncoder {
    fn encode(&mut self, value: T, dst: &mut BytesMut) -> Result<(), BoxError> {
        serde_json::to_writer(dst.writer(), &value).map_err(Into::into)
    }
}

/// Encoder for handlers that produce no response body.
#[derive(Debug, Clone, Copy, Default)]
pub struct UnitEncoder;

impl OutputEncoder<()> for UnitEncoder {
    const PRODUCES_BODY: bool = false;

    fn encode(&mut self, _value: (), _dst: &mut BytesMut) -> Result<(), BoxError> {
        Ok(())
    }
}
