//! X-Ray trace identifier codec.
//!
//! A trace ID is 35 ASCII bytes in the canonical form
//! `1-HHHHHHHH-HHHHHHHHHHHHHHHHHHHHHHHH`: the literal version `1`, eight hex
//! digits of Unix-epoch seconds, and twenty-four hex digits of random
//! identifier, hyphen separated. AWS only ever emits lowercase hex, so the
//! parser rejects uppercase rather than silently widening the grammar.

use chrono::Utc;
use std::fmt;
use std::str::FromStr;
use thiserror::Error;
use uuid::Uuid;

/// Decode table for lowercase hex; `0xff` marks an invalid byte.
const HEX_DECODE: [u8; 256] = {
    let mut table = [0xffu8; 256];
    let mut i = 0;
    while i < 10 {
        table[b'0' as usize + i] = i as u8;
        i += 1;
    }
    let mut i = 0;
    while i < 6 {
        table[b'a' as usize + i] = 10 + i as u8;
        i += 1;
    }
    table
};

const HEX_ENCODE: &[u8; 16] = b"0123456789abcdef";

/// Textual length of a trace ID.
const TRACE_ID_LEN: usize = 35;

/// Textual length of a segment ID.
const SEGMENT_ID_LEN: usize = 16;

/// Errors from parsing trace and segment identifiers.
///
/// These surface to the codec's caller only; they are never delivered to a
/// user handler.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum TraceIdError {
    /// Input was not the expected number of bytes.
    #[error("invalid length {0}")]
    InvalidLength(usize),

    /// The version byte was not the literal `1`.
    #[error("invalid version byte {0:#04x}")]
    InvalidVersion(u8),

    /// A separator hyphen was missing or misplaced.
    #[error("missing dashes")]
    MissingDashes,

    /// A byte outside `[0-9a-f]` appeared in a hex run.
    #[error("invalid hex byte {0:#04x}")]
    InvalidHex(u8),
}

/// An X-Ray trace identifier.
///
/// The version component is always `1` and is not stored; two trace IDs are
/// equal iff their timestamp and identifier match.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TraceId {
    timestamp: u32,
    identifier: [u8; 12],
}

impl TraceId {
    /// Creates a trace ID from its components.
    pub fn new(timestamp: u32, identifier: [u8; 12]) -> Self {
        Self {
            timestamp,
            identifier,
        }
    }

    /// Generates a fresh trace ID.
    ///
    /// The timestamp is the current Unix time in seconds (UTC); the
    /// identifier is 12 bytes drawn from a v4 UUID, which is backed by the
    /// operating system's cryptographic random source.
    pub fn generate() -> Self {
        let timestamp = Utc::now().timestamp() as u32;
        let mut identifier = [0u8; 12];
        identifier.copy_from_slice(&Uuid::new_v4().as_bytes()[..12]);
        Self {
            timestamp,
            identifier,
        }
    }

    /// Unix-epoch seconds component.
    pub fn timestamp(&self) -> u32 {
        self.timestamp
    }

    /// Random identifier component.
    pub fn identifier(&self) -> &[u8; 12] {
        &self.identifier
    }
}

impl FromStr for TraceId {
    type Err = TraceIdError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let bytes = s.as_bytes();
        if bytes.len() != TRACE_ID_LEN {
            return Err(TraceIdError::InvalidLength(bytes.len()));
        }
        if bytes[0] != b'1' {
            return Err(TraceIdError::InvalidVersion(bytes[0]));
        }
        if bytes[1] != b'-' || bytes[10] != b'-' {
            return Err(TraceIdError::MissingDashes);
        }

        let mut timestamp: u32 = 0;
        for &b in &bytes[2..10] {
            timestamp = (timestamp << 4) | u32::from(decode_nibble(b)?);
        }

        let mut identifier = [0u8; 12];
        for (i, pair) in bytes[11..35].chunks_exact(2).enumerate() {
            identifier[i] = (decode_nibble(pair[0])? << 4) | decode_nibble(pair[1])?;
        }

        Ok(Self {
            timestamp,
            identifier,
        })
    }
}

impl fmt::Display for TraceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut buf = [0u8; TRACE_ID_LEN];
        buf[0] = b'1';
        buf[1] = b'-';
        encode_hex(&self.timestamp.to_be_bytes(), &mut buf[2..10]);
        buf[10] = b'-';
        encode_hex(&self.identifier, &mut buf[11..35]);
        f.write_str(std::str::from_utf8(&buf).map_err(|_| fmt::Error)?)
    }
}

/// An X-Ray segment identifier: a 64-bit integer rendered as 16 lowercase
/// hex characters, zero padded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SegmentId(u64);

impl SegmentId {
    /// Creates a segment ID from its integer value.
    pub fn new(value: u64) -> Self {
        Self(value)
    }

    /// Generates a random segment ID.
    pub fn generate() -> Self {
        let mut bytes = [0u8; 8];
        bytes.copy_from_slice(&Uuid::new_v4().as_bytes()[..8]);
        Self(u64::from_be_bytes(bytes))
    }

    /// Integer value.
    pub fn value(&self) -> u64 {
        self.0
    }
}

impl FromStr for SegmentId {
    type Err = TraceIdError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let bytes = s.as_bytes();
        if bytes.len() != SEGMENT_ID_LEN {
            return Err(TraceIdError::InvalidLength(bytes.len()));
        }
        let mut value: u64 = 0;
        for &b in bytes {
            value = (value << 4) | u64::from(decode_nibble(b)?);
        }
        Ok(Self(value))
    }
}

impl fmt::Display for SegmentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut buf = [0u8; SEGMENT_ID_LEN];
        encode_hex(&self.0.to_be_bytes(), &mut buf);
        f.write_str(std::str::from_utf8(&buf).map_err(|_| fmt::Error)?)
    }
}

#[inline]
fn decode_nibble(b: u8) -> Result<u8, TraceIdError> {
    let v = HEX_DECODE[b as usize];
    if v == 0xff {
        return Err(TraceIdError::InvalidHex(b));
    }
    Ok(v)
}

/// Encodes `src` as lowercase hex into `dst`, which must be twice as long.
fn encode_hex(src: &[u8], dst: &mut [u8]) {
    debug_assert_eq!(dst.len(), src.len() * 2);
    for (i, &b) in src.iter().enumerate() {
        dst[i * 2] = HEX_ENCODE[usize::from(b >> 4)];
        dst[i * 2 + 1] = HEX_ENCODE[usize::from(b & 0x0f)];
    }
}
