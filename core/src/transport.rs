//! Blocking HTTP execution on top of `ureq`.
//!
//! # Design
//! Each invocation builds its own `ureq::Agent` with the caller's timeouts and
//! `http_status_as_error(false)`, so every received response comes back as a
//! `ResponseEnvelope` and status interpretation stays with `error::classify`.
//! Timeouts are reported by phase: name resolution and connect map to
//! `ConnectTimeout`, everything after the connection is up maps to
//! `ReadTimeout`.
//!
//! The connect timeout is a budget for the whole connection phase. The read
//! timeout is not: ureq's own send/receive timeouts cover a phase in total, so
//! they stay unset and `PerOperationTimeout` wraps the connection instead,
//! giving every socket read and write its own `read` budget. A response that
//! keeps trickling in never times out; one that stalls for longer does.

use std::error::Error as StdError;
use std::fmt;
use std::io;
use std::time::Duration;

use tracing::debug;
use ureq::http::header::CONTENT_TYPE;
use ureq::http::Response;
use ureq::typestate::{WithBody, WithoutBody};
use ureq::unversioned::resolver::DefaultResolver;
use ureq::unversioned::transport::time::Duration as Budget;
use ureq::unversioned::transport::{
    Buffers, ConnectionDetails, Connector, DefaultConnector, NextTimeout, Transport as Connection,
};
use ureq::{Agent, Body, RequestBuilder, SendBody};

use crate::body::BodyWriter;
use crate::config::Timeouts;
use crate::encoding::MultipartBody;
use crate::error::ApiError;
use crate::http::{HttpMethod, ResponseEnvelope};

/// What goes into the request body.
pub enum RequestContent<'a> {
    Empty,
    Bytes { content_type: String, bytes: Vec<u8> },
    Multipart(MultipartBody),
    Writer(&'a mut dyn BodyWriter),
}

impl fmt::Debug for RequestContent<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RequestContent::Empty => f.write_str("Empty"),
            RequestContent::Bytes { content_type, bytes } => f
                .debug_struct("Bytes")
                .field("content_type", content_type)
                .field("len", &bytes.len())
                .finish(),
            RequestContent::Multipart(body) => f.debug_tuple("Multipart").field(body).finish(),
            RequestContent::Writer(writer) => f
                .debug_struct("Writer")
                .field("content_type", &writer.content_type())
                .finish(),
        }
    }
}

/// A fully encoded request.
#[derive(Debug)]
pub struct PreparedRequest<'a> {
    pub method: HttpMethod,
    pub url: String,
    pub headers: Vec<(String, String)>,
    pub content: RequestContent<'a>,
}

/// Executes prepared requests with fixed timeouts.
pub struct Transport {
    agent: Agent,
    timeouts: Timeouts,
}

impl fmt::Debug for Transport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Transport")
            .field("timeouts", &self.timeouts)
            .finish_non_exhaustive()
    }
}

impl Transport {
    pub fn new(timeouts: Timeouts) -> Self {
        let config = Agent::config_builder()
            .http_status_as_error(false)
            .timeout_resolve(Some(timeouts.connect))
            .timeout_connect(Some(timeouts.connect))
            .build();
        let connector = DefaultConnector::new().chain(PerOperationTimeout { read: timeouts.read });
        let agent = Agent::with_parts(config, connector, DefaultResolver::default());
        Self { agent, timeouts }
    }

    /// Send `request` and return the response, whatever its status.
    pub fn execute(&self, request: PreparedRequest<'_>) -> Result<ResponseEnvelope, ApiError> {
        let PreparedRequest {
            method,
            url,
            headers,
            content,
        } = request;
        debug!(%method, %url, ?content, "sending request");

        let response = match method {
            HttpMethod::Get => self.send_without_body(self.agent.get(&url), &headers, content),
            HttpMethod::Delete => self.send_without_body(self.agent.delete(&url), &headers, content),
            HttpMethod::Post => self.send_with_body(self.agent.post(&url), &headers, content),
            HttpMethod::Put => self.send_with_body(self.agent.put(&url), &headers, content),
            HttpMethod::Patch => self.send_with_body(self.agent.patch(&url), &headers, content),
        }?;

        let status = response.status().as_u16();
        let (parts, body) = response.into_parts();
        let content_type = parts
            .headers
            .get(CONTENT_TYPE)
            .and_then(|value| value.to_str().ok())
            .map(str::to_string);
        debug!(status, content_type = content_type.as_deref().unwrap_or(""), "response received");

        Ok(ResponseEnvelope {
            status,
            content_type,
            headers: parts.headers,
            body: Box::new(body.into_reader()),
        })
    }

    fn send_without_body(
        &self,
        builder: RequestBuilder<WithoutBody>,
        headers: &[(String, String)],
        content: RequestContent<'_>,
    ) -> Result<Response<Body>, ApiError> {
        if !matches!(content, RequestContent::Empty) {
            return Err(ApiError::configuration("GET and DELETE requests cannot carry a body"));
        }
        with_headers(builder, headers)
            .call()
            .map_err(|e| map_error(e, &self.timeouts))
    }

    fn send_with_body(
        &self,
        builder: RequestBuilder<WithBody>,
        headers: &[(String, String)],
        content: RequestContent<'_>,
    ) -> Result<Response<Body>, ApiError> {
        let builder = with_headers(builder, headers);
        match content {
            RequestContent::Empty => builder.send_empty().map_err(|e| map_error(e, &self.timeouts)),
            RequestContent::Bytes { content_type, bytes } => builder
                .content_type(content_type)
                .send(&bytes[..])
                .map_err(|e| map_error(e, &self.timeouts)),
            RequestContent::Multipart(mut body) => {
                let content_type = body.content_type();
                let result = builder
                    .content_type(content_type)
                    .send(SendBody::from_reader(&mut body));
                result.map_err(|e| match body.take_failure() {
                    Some((name, source)) => ApiError::Attachment { name, source },
                    None => map_error(e, &self.timeouts),
                })
            }
            RequestContent::Writer(writer) => {
                let content_type = writer.content_type().to_string();
                let mut reader = writer
                    .reader()
                    .map_err(|e| ApiError::Transport(ureq::Error::Io(e)))?;
                debug!(%content_type, "streaming custom body");
                builder
                    .content_type(content_type)
                    .send(SendBody::from_reader(&mut reader))
                    .map_err(|e| map_error(e, &self.timeouts))
            }
        }
    }
}

/// Connector stage that bounds each socket operation by the read timeout.
#[derive(Debug)]
struct PerOperationTimeout {
    read: Duration,
}

impl Connector<Box<dyn Connection>> for PerOperationTimeout {
    type Out = Deadline;

    fn connect(
        &self,
        _: &ConnectionDetails,
        chained: Option<Box<dyn Connection>>,
    ) -> Result<Option<Self::Out>, ureq::Error> {
        Ok(chained.map(|inner| Deadline { inner, read: self.read }))
    }
}

/// A connection whose every read and write gets a fresh `read` budget.
#[derive(Debug)]
struct Deadline {
    inner: Box<dyn Connection>,
    read: Duration,
}

/// The tighter of ureq's own deadline and one `read` budget from now.
fn bound(timeout: NextTimeout, read: Duration, reason: ureq::Timeout) -> NextTimeout {
    if *timeout.after <= read {
        timeout
    } else {
        NextTimeout {
            after: Budget::Exact(read),
            reason,
        }
    }
}

impl Connection for Deadline {
    fn buffers(&mut self) -> &mut dyn Buffers {
        self.inner.buffers()
    }

    fn transmit_output(&mut self, amount: usize, timeout: NextTimeout) -> Result<(), ureq::Error> {
        let timeout = bound(timeout, self.read, ureq::Timeout::SendBody);
        self.inner.transmit_output(amount, timeout)
    }

    fn await_input(&mut self, timeout: NextTimeout) -> Result<bool, ureq::Error> {
        let timeout = bound(timeout, self.read, ureq::Timeout::RecvBody);
        self.inner.await_input(timeout)
    }

    fn is_open(&mut self) -> bool {
        self.inner.is_open()
    }

    fn is_tls(&self) -> bool {
        self.inner.is_tls()
    }
}

fn with_headers<B>(mut builder: RequestBuilder<B>, headers: &[(String, String)]) -> RequestBuilder<B> {
    for (name, value) in headers {
        builder = builder.header(name.as_str(), value.as_str());
    }
    builder
}

/// Translate a `ureq` failure, keeping timeouts distinguishable.
pub fn map_error(error: ureq::Error, timeouts: &Timeouts) -> ApiError {
    match error {
        ureq::Error::Timeout(ureq::Timeout::Resolve | ureq::Timeout::Connect) => {
            ApiError::ConnectTimeout(timeouts.connect)
        }
        ureq::Error::Timeout(_) => ApiError::ReadTimeout(timeouts.read),
        ureq::Error::Io(e) if e.kind() == io::ErrorKind::TimedOut => ApiError::ReadTimeout(timeouts.read),
        other => ApiError::Transport(other),
    }
}

/// True when `error`, or anything it wraps, is a timeout.
///
/// `io::Error::source` skips the error it wraps, so wrapped payloads are
/// followed through `get_ref` as well.
pub(crate) fn is_timeout(error: &(dyn StdError + 'static)) -> bool {
    let mut next = Some(error);
    while let Some(current) = next {
        if let Some(ureq::Error::Timeout(_)) = current.downcast_ref::<ureq::Error>() {
            return true;
        }
        if let Some(io_error) = current.downcast_ref::<io::Error>() {
            if io_error.kind() == io::ErrorKind::TimedOut {
                return true;
            }
            if let Some(inner) = io_error.get_ref() {
                next = Some(inner as &(dyn StdError + 'static));
                continue;
            }
        }
        next = current.source();
    }
    false
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn timeouts() -> Timeouts {
        Timeouts {
            connect: Duration::from_millis(500),
            read: Duration::from_millis(4000),
        }
    }

    #[test]
    fn connect_phase_timeouts_are_connect_timeouts() {
        for phase in [ureq::Timeout::Resolve, ureq::Timeout::Connect] {
            let err = map_error(ureq::Error::Timeout(phase), &timeouts());
            assert!(matches!(err, ApiError::ConnectTimeout(d) if d == Duration::from_millis(500)));
        }
    }

    #[test]
    fn later_timeouts_are_read_timeouts() {
        for phase in [
            ureq::Timeout::RecvResponse,
            ureq::Timeout::RecvBody,
            ureq::Timeout::SendBody,
        ] {
            let err = map_error(ureq::Error::Timeout(phase), &timeouts());
            assert!(matches!(err, ApiError::ReadTimeout(d) if d == Duration::from_millis(4000)));
        }
    }

    #[test]
    fn timed_out_io_is_a_read_timeout() {
        let err = map_error(
            ureq::Error::Io(io::Error::new(io::ErrorKind::TimedOut, "slow")),
            &timeouts(),
        );
        assert!(matches!(err, ApiError::ReadTimeout(_)));
    }

    #[test]
    fn other_failures_are_transport_errors() {
        let refused = map_error(
            ureq::Error::Io(io::Error::new(io::ErrorKind::ConnectionRefused, "refused")),
            &timeouts(),
        );
        assert!(matches!(refused, ApiError::Transport(_)));

        let dns = map_error(ureq::Error::HostNotFound, &timeouts());
        assert!(matches!(dns, ApiError::Transport(_)));
    }

    #[test]
    fn timeout_detection_follows_wrapped_errors() {
        let wrapped = io::Error::other(ureq::Error::Timeout(ureq::Timeout::RecvBody));
        assert!(is_timeout(&wrapped));

        let plain = io::Error::other("reset");
        assert!(!is_timeout(&plain));
    }

    #[test]
    fn each_socket_operation_gets_the_full_read_budget() {
        let read = Duration::from_millis(2000);
        let unbounded = NextTimeout {
            after: Budget::NotHappening,
            reason: ureq::Timeout::Global,
        };

        let clamped = bound(unbounded, read, ureq::Timeout::RecvBody);
        assert_eq!(*clamped.after, read);
        assert_eq!(clamped.reason, ureq::Timeout::RecvBody);
    }

    #[test]
    fn a_tighter_deadline_is_kept() {
        let connect = NextTimeout {
            after: Budget::Exact(Duration::from_millis(300)),
            reason: ureq::Timeout::Connect,
        };

        let kept = bound(connect, Duration::from_millis(2000), ureq::Timeout::SendBody);
        assert_eq!(*kept.after, Duration::from_millis(300));
        assert_eq!(kept.reason, ureq::Timeout::Connect);
    }

    #[test]
    fn get_with_body_is_rejected_before_sending() {
        let transport = Transport::new(timeouts());
        let request = PreparedRequest {
            method: HttpMethod::Get,
            url: "http://127.0.0.1:9/never".to_string(),
            headers: Vec::new(),
            content: RequestContent::Bytes {
                content_type: "text/plain".to_string(),
                bytes: b"x".to_vec(),
            },
        };
        let err = transport.execute(request).unwrap_err();
        assert!(matches!(err, ApiError::Configuration(_)));
    }
}
