//! Invocation descriptor extracted from a `next` response.

use crate::error::Error;
use chrono::{DateTime, TimeZone, Utc};
use http::HeaderMap;

pub(crate) const REQUEST_ID_HEADER: &str = "lambda-runtime-aws-request-id";
pub(crate) const DEADLINE_HEADER: &str = "lambda-runtime-deadline-ms";
pub(crate) const FUNCTION_ARN_HEADER: &str = "lambda-runtime-invoked-function-arn";
pub(crate) const TRACE_ID_HEADER: &str = "lambda-runtime-trace-id";
pub(crate) const COGNITO_IDENTITY_HEADER: &str = "lambda-runtime-cognito-identity";
pub(crate) const CLIENT_CONTEXT_HEADER: &str = "lambda-runtime-client-context";

/// Metadata identifying one invocation, as delivered by the Runtime API.
///
/// The invocation payload itself travels separately as opaque bytes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Invocation {
    /// Unique identifier assigned by the platform.
    pub request_id: String,

    /// Absolute wall-clock deadline for this invocation.
    pub deadline: DateTime<Utc>,

    /// ARN of the function being invoked.
    pub invoked_function_arn: String,

    /// Raw X-Ray trace header value, unparsed. Empty when the platform did
    /// not send one.
    pub trace_id: String,

    /// Cognito identity (mobile SDK), when present.
    pub cognito_identity: Option<String>,

    /// Client context (mobile SDK), when present.
    pub client_context: Option<String>,
}

impl Invocation {
    /// Extracts the invocation metadata from the headers of a `next`
    /// response.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ProtocolViolation`] when a required header is
    /// missing or malformed.
    pub(crate) fn from_headers(headers: &HeaderMap) -> Result<Self, Error> {
        let request_id = required_header(headers, REQUEST_ID_HEADER)?.to_string();
        let invoked_function_arn = required_header(headers, FUNCTION_ARN_HEADER)?.to_string();

        let deadline_ms: i64 = required_header(headers, DEADLINE_HEADER)?
            .parse()
            .map_err(|_| {
                Error::ProtocolViolation(format!("non-integer {DEADLINE_HEADER} header"))
            })?;
        let deadline = Utc
            .timestamp_millis_opt(deadline_ms)
            .single()
            .ok_or_else(|| {
                Error::ProtocolViolation(format!("out-of-range {DEADLINE_HEADER} header"))
            })?;

        Ok(Self {
            request_id,
            deadline,
            invoked_function_arn,
            trace_id: optional_header(headers, TRACE_ID_HEADER)?
                .unwrap_or_default()
                .to_string(),
            cognito_identity: optional_header(headers, COGNITO_IDENTITY_HEADER)?
                .map(str::to_string),
            client_context: optional_header(headers, CLIENT_CONTEXT_HEADER)?.map(str::to_string),
        })
    }

    /// Deadline as milliseconds since the Unix epoch, as received on the
    /// wire.
    pub fn deadline_ms(&self) -> i64 {
        self.deadline.timestamp_millis()
    }
}

fn required_header<'a>(headers: &'a HeaderMap, name: &str) -> Result<&'a str, Error> {
    optional_header(headers, name)?
        .ok_or_else(|| Error::ProtocolViolation(format!("missing {name} header")))
}

fn optional_header<'a>(headers: &'a HeaderMap, name: &str) -> Result<Option<&'a str>, Error> {
    match headers.get(name) {
        None => Ok(None),
        Some(value) => value
            .to_str()
            .map(Some)
            .map_err(|_| Error::ProtocolViolation(format!("non-ASCII {name} header"))),
    }
}
