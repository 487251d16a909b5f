//! Error types for the web service proxy, and status-code classification.
//!
//! # Design
//! Every failure an invocation can end in is one `ApiError` variant, so
//! callers can tell a read timeout from a refused connection from a 403
//! without inspecting messages. A non-2xx response is an ordinary value
//! (`ApiError::Service`) produced by `classify`, which also drains and closes
//! the response body before returning.

use std::io::{self, Read};
use std::time::Duration;

use serde::Deserialize;
use thiserror::Error;
use tracing::warn;

use crate::decode::DecodeError;
use crate::http::ResponseEnvelope;

/// Upper bound on how much of an error body is read for the detail message.
const MAX_ERROR_BODY: u64 = 64 * 1024;

/// Errors returned by `WebServiceProxy` invocations.
#[derive(Debug, Error)]
pub enum ApiError {
    /// The request was misconfigured. Detected before any network I/O.
    #[error("invalid request configuration: {0}")]
    Configuration(String),

    /// No connection within the connect timeout.
    #[error("connection not established within {0:?}")]
    ConnectTimeout(Duration),

    /// The response did not arrive within the read timeout.
    #[error("response not received within {0:?}")]
    ReadTimeout(Duration),

    /// Any other network-level failure.
    #[error("transport failure: {0}")]
    Transport(#[from] ureq::Error),

    /// An attachment source could not be opened or read.
    #[error("attachment `{name}` could not be read: {source}")]
    Attachment {
        name: String,
        #[source]
        source: io::Error,
    },

    /// The server answered with a status outside 2xx.
    #[error(transparent)]
    Service(#[from] WebServiceError),

    /// The response decoder rejected a successful response.
    #[error("response decoding failed: {0}")]
    Decode(#[source] DecodeError),
}

impl ApiError {
    /// The HTTP status of a service error.
    pub fn status(&self) -> Option<u16> {
        match self {
            ApiError::Service(e) => Some(e.status),
            _ => None,
        }
    }

    pub fn is_timeout(&self) -> bool {
        matches!(self, ApiError::ConnectTimeout(_) | ApiError::ReadTimeout(_))
    }

    pub(crate) fn configuration(msg: impl Into<String>) -> Self {
        ApiError::Configuration(msg.into())
    }
}

/// A response with a non-success status code.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("service returned HTTP {status}{}", suffix(.detail))]
pub struct WebServiceError {
    pub status: u16,
    pub detail: Option<String>,
}

fn suffix(detail: &Option<String>) -> String {
    detail.as_deref().map(|d| format!(": {d}")).unwrap_or_default()
}

#[derive(Deserialize)]
struct ErrorBody {
    message: String,
}

/// Pass 2xx responses through; turn anything else into `ApiError::Service`.
///
/// The body of a failed response is read (up to 64 KiB) and dropped. The
/// detail is the body text for `text/*` responses, the `message` field of a
/// JSON object for `application/json` responses, and absent otherwise.
pub fn classify(response: ResponseEnvelope) -> Result<ResponseEnvelope, ApiError> {
    if response.is_success() {
        return Ok(response);
    }

    let ResponseEnvelope {
        status,
        content_type,
        body,
        ..
    } = response;

    let mut raw = Vec::new();
    // A failed read still yields a service error; the status is what matters.
    let _ = body.take(MAX_ERROR_BODY).read_to_end(&mut raw);

    let detail = error_detail(content_type.as_deref(), &raw);
    warn!(status, detail = detail.as_deref().unwrap_or(""), "service error");
    Err(ApiError::Service(WebServiceError { status, detail }))
}

fn error_detail(content_type: Option<&str>, raw: &[u8]) -> Option<String> {
    if raw.is_empty() {
        return None;
    }
    let media_type = content_type?
        .split(';')
        .next()
        .unwrap_or_default()
        .trim()
        .to_ascii_lowercase();

    if media_type.starts_with("text/") {
        let text = String::from_utf8_lossy(raw).trim().to_string();
        return (!text.is_empty()).then_some(text);
    }
    if media_type == "application/json" {
        return serde_json::from_slice::<ErrorBody>(raw).ok().map(|body| body.message);
    }
    None
}
