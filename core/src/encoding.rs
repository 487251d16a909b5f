//! Argument encoding: query strings, URL-encoded bodies, multipart bodies.
//!
//! # Design
//! `encode` decides where the arguments go from the HTTP method and the
//! requested `Encoding`, and validates the combination before anything touches
//! the network. Query strings and URL-encoded bodies are small and built
//! eagerly. A multipart body is a `Read` over a queue of segments: text parts
//! are pre-rendered, attachment parts are opened only when the transport pulls
//! them, so file content is never held in memory as a whole.

use std::collections::VecDeque;
use std::fmt;
use std::io::{self, Cursor, Read};

use tracing::debug;
use uuid::Uuid;

use crate::arguments::Arguments;
use crate::attachment::{Attachment, AttachmentStream};
use crate::error::ApiError;
use crate::http::HttpMethod;
use crate::value::Value;

pub const FORM_URL_ENCODED: &str = "application/x-www-form-urlencoded";

/// How request arguments are sent.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Encoding {
    /// Appended to the URL as a query string; no request body.
    Query,
    /// An `application/x-www-form-urlencoded` body.
    UrlEncoded,
    /// A `multipart/form-data` body. Required for attachments.
    Multipart,
}

impl Encoding {
    /// The encoding actually used for `method`.
    ///
    /// GET and DELETE always use the query string. Other methods use the
    /// requested encoding, or, when none was requested, URL-encoded unless an
    /// attachment is present.
    pub fn resolve(method: HttpMethod, requested: Option<Encoding>, has_attachments: bool) -> Encoding {
        if method.is_query_only() {
            return Encoding::Query;
        }
        match requested {
            Some(encoding) => encoding,
            None if has_attachments => Encoding::Multipart,
            None => Encoding::UrlEncoded,
        }
    }
}

/// Encoded arguments, ready for the transport.
#[derive(Debug)]
pub enum EncodedArguments {
    /// Query string without the leading `?`. May be empty.
    Query(String),
    /// URL-encoded body bytes.
    Form(Vec<u8>),
    Multipart(MultipartBody),
}

impl EncodedArguments {
    /// Content type of the request body, if there is one.
    pub fn content_type(&self) -> Option<String> {
        match self {
            EncodedArguments::Query(_) => None,
            EncodedArguments::Form(_) => Some(FORM_URL_ENCODED.to_string()),
            EncodedArguments::Multipart(body) => Some(body.content_type()),
        }
    }
}

/// Encode `arguments` for a `method` request.
///
/// Fails with `ApiError::Configuration` when an attachment is present under a
/// non-multipart encoding, or a list contains another list.
pub fn encode(
    arguments: &Arguments,
    method: HttpMethod,
    requested: Option<Encoding>,
) -> Result<EncodedArguments, ApiError> {
    let encoding = Encoding::resolve(method, requested, arguments.has_attachments());
    debug!(%method, ?encoding, arguments = arguments.len(), "encoding arguments");

    if encoding != Encoding::Multipart {
        if let Some((name, _)) = arguments.iter().find(|(_, value)| value.contains_attachment()) {
            return Err(ApiError::configuration(format!(
                "attachment argument `{name}` requires multipart encoding, but {method} uses {encoding:?}"
            )));
        }
    }

    match encoding {
        Encoding::Query => Ok(EncodedArguments::Query(form_encode(arguments)?)),
        Encoding::UrlEncoded => Ok(EncodedArguments::Form(form_encode(arguments)?.into_bytes())),
        Encoding::Multipart => Ok(EncodedArguments::Multipart(MultipartBody::new(arguments)?)),
    }
}

/// Append a query string to `url`, merging with any existing query.
///
/// Any fragment is dropped, since it is never sent to the server.
pub fn append_query(url: &str, query: &str) -> String {
    let base = url.split_once('#').map_or(url, |(base, _)| base);
    if query.is_empty() {
        return base.to_string();
    }
    let separator = match base.find('?') {
        None => "?",
        Some(i) if i + 1 == base.len() || base.ends_with('&') => "",
        Some(_) => "&",
    };
    format!("{base}{separator}{query}")
}

/// Expand arguments into `(name, text)` pairs in wire order.
///
/// Nulls and empty names are skipped; list elements share their argument's
/// name.
fn pairs(arguments: &Arguments) -> Result<Vec<(&str, String)>, ApiError> {
    let mut pairs = Vec::new();
    for (name, value) in arguments.iter() {
        if name.is_empty() {
            continue;
        }
        for element in expand(name, value)? {
            if let Some(text) = element.marshal() {
                pairs.push((name, text));
            }
        }
    }
    Ok(pairs)
}

fn expand<'a>(name: &str, value: &'a Value) -> Result<&'a [Value], ApiError> {
    let elements = value.elements();
    if matches!(value, Value::List(_)) && elements.iter().any(|e| matches!(e, Value::List(_))) {
        return Err(ApiError::configuration(format!(
            "argument `{name}` contains a nested list"
        )));
    }
    Ok(elements)
}

fn form_encode(arguments: &Arguments) -> Result<String, ApiError> {
    serde_urlencoded::to_string(pairs(arguments)?)
        .map_err(|e| ApiError::configuration(format!("arguments could not be form-encoded: {e}")))
}

enum Segment {
    Text(Vec<u8>),
    File { name: String, attachment: Attachment },
}

enum Current {
    Text(Cursor<Vec<u8>>),
    File(AttachmentStream),
}

/// A streaming `multipart/form-data` request body.
///
/// If an attachment cannot be opened or read, `read` fails and the failure is
/// kept so the caller can report which attachment broke the request.
pub struct MultipartBody {
    boundary: String,
    segments: VecDeque<Segment>,
    current: Option<Current>,
    failure: Option<(String, io::Error)>,
}

impl MultipartBody {
    pub fn new(arguments: &Arguments) -> Result<Self, ApiError> {
        Self::with_boundary(arguments, format!("wsproxy-{}", Uuid::new_v4().simple()))
    }

    fn with_boundary(arguments: &Arguments, boundary: String) -> Result<Self, ApiError> {
        let mut segments = VecDeque::new();
        let mut text = Vec::new();

        for (name, value) in arguments.iter() {
            if name.is_empty() {
                continue;
            }
            let field = escape_quoted(name);
            for element in expand(name, value)? {
                match element {
                    Value::Attachment(attachment) => {
                        text.extend_from_slice(
                            format!(
                                "--{boundary}\r\nContent-Disposition: form-data; name=\"{field}\"; filename=\"{}\"\r\nContent-Type: application/octet-stream\r\n\r\n",
                                escape_quoted(attachment.file_name())
                            )
                            .as_bytes(),
                        );
                        segments.push_back(Segment::Text(std::mem::take(&mut text)));
                        segments.push_back(Segment::File {
                            name: name.to_string(),
                            attachment: attachment.clone(),
                        });
                        text.extend_from_slice(b"\r\n");
                    }
                    other => {
                        let Some(value) = other.marshal() else {
                            continue;
                        };
                        text.extend_from_slice(
                            format!("--{boundary}\r\nContent-Disposition: form-data; name=\"{field}\"\r\n\r\n")
                                .as_bytes(),
                        );
                        text.extend_from_slice(value.as_bytes());
                        text.extend_from_slice(b"\r\n");
                    }
                }
            }
        }
        text.extend_from_slice(format!("--{boundary}--\r\n").as_bytes());
        segments.push_back(Segment::Text(text));

        Ok(Self {
            boundary,
            segments,
            current: None,
            failure: None,
        })
    }

    pub fn boundary(&self) -> &str {
        &self.boundary
    }

    pub fn content_type(&self) -> String {
        format!("multipart/form-data; boundary={}", self.boundary)
    }

    /// The attachment failure that aborted the body, if any.
    pub fn take_failure(&mut self) -> Option<(String, io::Error)> {
        self.failure.take()
    }

    fn fail(&mut self, name: String, error: io::Error) -> io::Error {
        let surfaced = io::Error::new(error.kind(), format!("attachment `{name}`: {error}"));
        self.failure = Some((name, error));
        surfaced
    }

    fn advance(&mut self) -> io::Result<bool> {
        match self.segments.pop_front() {
            None => Ok(false),
            Some(Segment::Text(bytes)) => {
                self.current = Some(Current::Text(Cursor::new(bytes)));
                Ok(true)
            }
            Some(Segment::File { name, attachment }) => match AttachmentStream::open(&name, &attachment) {
                Ok(stream) => {
                    self.current = Some(Current::File(stream));
                    Ok(true)
                }
                Err(e) => Err(self.fail(name, e)),
            },
        }
    }
}

impl Read for MultipartBody {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if self.failure.is_some() {
            return Err(io::Error::other("multipart body aborted"));
        }
        if buf.is_empty() {
            return Ok(0);
        }
        loop {
            let result = match self.current.as_mut() {
                None => {
                    if !self.advance()? {
                        return Ok(0);
                    }
                    continue;
                }
                Some(Current::Text(cursor)) => cursor.read(buf),
                Some(Current::File(stream)) => stream.read(buf),
            };
            match result {
                Ok(0) => self.current = None,
                Ok(n) => return Ok(n),
                Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
                Err(e) => {
                    let name = match self.current.take() {
                        Some(Current::File(stream)) => stream.name().to_string(),
                        _ => String::new(),
                    };
                    return Err(self.fail(name, e));
                }
            }
        }
    }
}

impl fmt::Debug for MultipartBody {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MultipartBody")
            .field("boundary", &self.boundary)
            .field("pending_segments", &self.segments.len())
            .finish_non_exhaustive()
    }
}

/// Escape a `Content-Disposition` parameter value the way browsers do.
fn escape_quoted(value: &str) -> String {
    value.replace('"', "%22").replace('\r', "%0D").replace('\n', "%0A")
}
