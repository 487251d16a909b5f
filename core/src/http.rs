//! HTTP plain-data types shared by the encoder, transport, and facade.
//!
//! # Design
//! `HttpMethod` is the closed set of verbs the proxy can issue. A
//! `ResponseEnvelope` is what the transport hands back for *any* received
//! response: interpreting the status code is left to `error::classify`, and
//! the body stream is owned by the envelope so dropping the envelope releases
//! the connection.

use std::fmt;
use std::io::Read;

use ureq::http::HeaderMap;

/// HTTP method for a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HttpMethod {
    Get,
    Post,
    Put,
    Delete,
    Patch,
}

impl HttpMethod {
    pub fn as_str(self) -> &'static str {
        match self {
            HttpMethod::Get => "GET",
            HttpMethod::Post => "POST",
            HttpMethod::Put => "PUT",
            HttpMethod::Delete => "DELETE",
            HttpMethod::Patch => "PATCH",
        }
    }

    /// Methods whose arguments always travel in the query string.
    pub fn is_query_only(self) -> bool {
        matches!(self, HttpMethod::Get | HttpMethod::Delete)
    }
}

impl fmt::Display for HttpMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A received HTTP response with a single-use body stream.
///
/// The body is consumed at most once, either by the decoder on success or by
/// the error mapper on failure. Dropping the envelope closes the stream.
pub struct ResponseEnvelope {
    pub status: u16,
    pub content_type: Option<String>,
    pub headers: HeaderMap,
    pub body: Box<dyn Read>,
}

impl ResponseEnvelope {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

impl fmt::Debug for ResponseEnvelope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResponseEnvelope")
            .field("status", &self.status)
            .field("content_type", &self.content_type)
            .field("headers", &self.headers)
            .finish_non_exhaustive()
    }
}
