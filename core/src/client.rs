//! The `WebServiceProxy` facade.
//!
//! # Design
//! A proxy is the configured state of one request: method, URL, headers,
//! timeouts, and either named arguments or a custom body writer, never both.
//! `invoke_with` runs the whole pipeline synchronously:
//!
//! 1. validate the configuration (no I/O yet),
//! 2. encode the arguments or select the body writer,
//! 3. transmit through a fresh `Transport`,
//! 4. classify the status, then hand a 2xx body to the decoder exactly once.
//!
//! Everything opened along the way (attachment readers, the connection, the
//! response stream) is an owned value dropped when the call returns, on every
//! path. A proxy can be invoked again; arguments are re-encoded each time.

use std::fmt;
use std::time::Duration;

use serde::de::DeserializeOwned;
use tracing::{debug, debug_span};
use ureq::http::Uri;

use crate::arguments::Arguments;
use crate::body::BodyWriter;
use crate::config::{ProxyConfig, Timeouts};
use crate::decode::{self, DecodeError, ResponseDecoder};
use crate::encoding::{self, EncodedArguments, Encoding, FORM_URL_ENCODED};
use crate::error::{self, ApiError};
use crate::http::{HttpMethod, ResponseEnvelope};
use crate::transport::{PreparedRequest, RequestContent, Transport};
use crate::value::Value;

/// What the request sends. Setting one replaces the other.
enum Content {
    Arguments(Arguments),
    Body(Box<dyn BodyWriter>),
}

/// A configured web service request.
///
/// ```no_run
/// use wsproxy::{decode, Arguments, HttpMethod, WebServiceProxy};
///
/// let mut proxy = WebServiceProxy::new(HttpMethod::Get, "http://localhost:8080/test/fibonacci")
///     .with_arguments(Arguments::new().with("count", 8));
/// let numbers: Vec<u64> = proxy.invoke_with(decode::json())?;
/// # Ok::<(), wsproxy::ApiError>(())
/// ```
pub struct WebServiceProxy {
    method: HttpMethod,
    url: String,
    encoding: Option<Encoding>,
    headers: Vec<(String, String)>,
    content: Content,
    timeouts: Timeouts,
}

impl WebServiceProxy {
    pub fn new(method: HttpMethod, url: impl Into<String>) -> Self {
        Self {
            method,
            url: url.into(),
            encoding: None,
            headers: Vec::new(),
            content: Content::Arguments(Arguments::new()),
            timeouts: Timeouts::default(),
        }
    }

    pub fn get(url: impl Into<String>) -> Self {
        Self::new(HttpMethod::Get, url)
    }

    pub fn post(url: impl Into<String>) -> Self {
        Self::new(HttpMethod::Post, url)
    }

    pub fn put(url: impl Into<String>) -> Self {
        Self::new(HttpMethod::Put, url)
    }

    pub fn delete(url: impl Into<String>) -> Self {
        Self::new(HttpMethod::Delete, url)
    }

    pub fn patch(url: impl Into<String>) -> Self {
        Self::new(HttpMethod::Patch, url)
    }

    /// Apply shared settings: both timeouts, plus any configured header not
    /// already set on this proxy.
    pub fn with_config(mut self, config: &ProxyConfig) -> Self {
        self.timeouts = config.timeouts();
        for (name, value) in &config.headers {
            if self.header(name).is_none() {
                self.headers.push((name.clone(), value.clone()));
            }
        }
        self
    }

    /// Request a body encoding. Ignored for GET and DELETE, which always use
    /// the query string.
    pub fn with_encoding(mut self, encoding: Encoding) -> Self {
        self.encoding = Some(encoding);
        self
    }

    /// Set a request header, replacing any earlier value with the same
    /// (case-insensitive) name.
    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        let name = name.into();
        self.headers.retain(|(existing, _)| !existing.eq_ignore_ascii_case(&name));
        self.headers.push((name, value.into()));
        self
    }

    /// Replace the arguments. Drops any custom body.
    pub fn with_arguments(mut self, arguments: Arguments) -> Self {
        self.content = Content::Arguments(arguments);
        self
    }

    /// Add one argument. Drops any custom body.
    pub fn with_argument(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        match &mut self.content {
            Content::Arguments(arguments) => {
                arguments.insert(name, value);
            }
            Content::Body(_) => {
                self.content = Content::Arguments(Arguments::new().with(name, value));
            }
        }
        self
    }

    /// Send `writer`'s output as the body instead of encoded arguments.
    /// Drops any arguments.
    pub fn with_body(mut self, writer: impl BodyWriter + 'static) -> Self {
        self.content = Content::Body(Box::new(writer));
        self
    }

    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.timeouts.connect = timeout;
        self
    }

    pub fn with_read_timeout(mut self, timeout: Duration) -> Self {
        self.timeouts.read = timeout;
        self
    }

    pub fn method(&self) -> HttpMethod {
        self.method
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    pub fn encoding(&self) -> Option<Encoding> {
        self.encoding
    }

    pub fn headers(&self) -> &[(String, String)] {
        &self.headers
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(existing, _)| existing.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.as_str())
    }

    /// The arguments, unless a custom body is set.
    pub fn arguments(&self) -> Option<&Arguments> {
        match &self.content {
            Content::Arguments(arguments) => Some(arguments),
            Content::Body(_) => None,
        }
    }

    pub fn has_body(&self) -> bool {
        matches!(self.content, Content::Body(_))
    }

    pub fn timeouts(&self) -> Timeouts {
        self.timeouts
    }

    /// Send the request and discard the response body.
    pub fn invoke(&mut self) -> Result<(), ApiError> {
        let span = debug_span!("invoke", method = %self.method, url = %self.url);
        let _enter = span.enter();

        let response = self.round_trip()?;
        debug!(status = response.status, "response discarded");
        Ok(())
    }

    /// Send the request and decode a successful response with `decoder`.
    pub fn invoke_with<T>(&mut self, decoder: impl ResponseDecoder<T>) -> Result<T, ApiError> {
        let span = debug_span!("invoke", method = %self.method, url = %self.url);
        let _enter = span.enter();

        let ResponseEnvelope {
            status,
            content_type,
            headers,
            mut body,
        } = self.round_trip()?;

        debug!(status, "decoding response");
        let value = decoder
            .decode(&mut *body, content_type.as_deref(), &headers)
            .map_err(|e| self.decode_failure(e))?;
        debug!("invocation complete");
        Ok(value)
    }

    /// Send the request and decode a successful response as JSON.
    pub fn invoke_json<T: DeserializeOwned>(&mut self) -> Result<T, ApiError> {
        self.invoke_with(decode::json())
    }

    fn round_trip(&mut self) -> Result<ResponseEnvelope, ApiError> {
        self.validate()?;
        let transport = Transport::new(self.timeouts);
        let request = self.prepare()?;
        debug!("transmitting");
        let response = transport.execute(request)?;
        error::classify(response)
    }

    fn validate(&self) -> Result<(), ApiError> {
        let uri: Uri = self
            .url
            .parse()
            .map_err(|e| ApiError::configuration(format!("invalid URL {:?}: {e}", self.url)))?;
        match uri.scheme_str() {
            Some("http" | "https") => {}
            _ => {
                return Err(ApiError::configuration(format!(
                    "URL {:?} must be absolute with an http or https scheme",
                    self.url
                )))
            }
        }
        if uri.host().map_or(true, str::is_empty) {
            return Err(ApiError::configuration(format!("URL {:?} has no host", self.url)));
        }
        self.timeouts.validate()
    }

    fn prepare(&mut self) -> Result<PreparedRequest<'_>, ApiError> {
        let mut url = self.url.clone();
        let content = match &mut self.content {
            Content::Arguments(arguments) => match encoding::encode(arguments, self.method, self.encoding)? {
                EncodedArguments::Query(query) => {
                    url = encoding::append_query(&self.url, &query);
                    RequestContent::Empty
                }
                EncodedArguments::Form(bytes) => RequestContent::Bytes {
                    content_type: FORM_URL_ENCODED.to_string(),
                    bytes,
                },
                EncodedArguments::Multipart(body) => RequestContent::Multipart(body),
            },
            Content::Body(writer) => {
                if self.method.is_query_only() {
                    return Err(ApiError::configuration(format!(
                        "{} requests cannot carry a custom body",
                        self.method
                    )));
                }
                RequestContent::Writer(&mut **writer)
            }
        };
        Ok(PreparedRequest {
            method: self.method,
            url,
            headers: self.headers.clone(),
            content,
        })
    }

    fn decode_failure(&self, error: DecodeError) -> ApiError {
        if error.is_timeout() {
            return ApiError::ReadTimeout(self.timeouts.read);
        }
        match error {
            DecodeError::Io(e) => ApiError::Transport(ureq::Error::Io(e)),
            invalid => ApiError::Decode(invalid),
        }
    }
}

impl fmt::Debug for WebServiceProxy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut s = f.debug_struct("WebServiceProxy");
        s.field("method", &self.method)
            .field("url", &self.url)
            .field("encoding", &self.encoding)
            .field("headers", &self.headers)
            .field("timeouts", &self.timeouts);
        match &self.content {
            Content::Arguments(arguments) => s.field("arguments", arguments),
            Content::Body(writer) => s.field("body", &writer.content_type()),
        };
        s.finish()
    }
}
