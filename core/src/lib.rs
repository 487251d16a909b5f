//! Synchronous web service proxy.
//!
//! # Overview
//! A `WebServiceProxy` invokes one HTTP endpoint: it encodes named arguments
//! as a query string, a URL-encoded body, or a streamed multipart body (or
//! sends a caller-supplied body instead), executes the request with finite
//! connect and read timeouts, maps non-2xx statuses to typed errors, and hands
//! successful responses to a pluggable decoder.
//!
//! # Design
//! - `value` and `arguments` hold what the caller wants to send; `encoding`
//!   turns it into wire form and rejects invalid combinations before any I/O.
//! - `transport` is the only module that touches the network (`ureq`).
//! - `error::classify` turns a non-2xx response into `ApiError::Service`.
//! - `decode` is the seam for turning a response body into a typed value.
//! - Each invocation owns everything it opens; nothing is shared between
//!   invocations, so proxies can be used from any number of threads.

pub mod arguments;
pub mod attachment;
pub mod body;
pub mod client;
pub mod config;
pub mod decode;
pub mod encoding;
pub mod error;
pub mod http;
pub mod transport;
pub mod value;

pub use arguments::Arguments;
pub use attachment::Attachment;
pub use body::{BodyWriter, JsonBody};
pub use client::WebServiceProxy;
pub use config::{ProxyConfig, Timeouts};
pub use decode::{DecodeError, ResponseDecoder};
pub use encoding::Encoding;
pub use error::{ApiError, WebServiceError};
pub use http::{HttpMethod, ResponseEnvelope};
pub use value::Value;
