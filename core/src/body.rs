//! Custom request bodies.
//!
//! A `BodyWriter` replaces argument encoding entirely: the proxy sends what it
//! produces, labelled with its content type. The transport pulls the body
//! through `BodyWriter::reader` only once the connection is open. Attachments
//! stream from their source in bounded chunks. A push-style writer runs on the
//! first pull and its output is served from memory.

use std::io::{self, Cursor, Read, Write};

use tracing::trace;

use serde::Serialize;

use crate::attachment::{self, Attachment};

/// Writes a request body into an output sink.
pub trait BodyWriter: Send {
    /// Media type sent as the request `Content-Type`.
    fn content_type(&self) -> &str {
        "application/octet-stream"
    }

    fn write_body(&mut self, sink: &mut dyn Write) -> io::Result<()>;

    /// The body as a reader the transport pulls from while sending.
    fn reader(&mut self) -> io::Result<Box<dyn Read + Send + '_>> {
        Ok(Box::new(Deferred {
            writer: self,
            rendered: None,
        }))
    }
}

/// Runs `write_body` on the first read.
struct Deferred<'a, W: ?Sized> {
    writer: &'a mut W,
    rendered: Option<Cursor<Vec<u8>>>,
}

impl<W: BodyWriter + ?Sized> Read for Deferred<'_, W> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if self.rendered.is_none() {
            let mut bytes = Vec::new();
            self.writer.write_body(&mut bytes)?;
            trace!(bytes = bytes.len(), "custom body written");
            self.rendered = Some(Cursor::new(bytes));
        }
        match self.rendered.as_mut() {
            Some(rendered) => rendered.read(buf),
            None => Ok(0),
        }
    }
}

impl<F> BodyWriter for F
where
    F: FnMut(&mut dyn Write) -> io::Result<()> + Send,
{
    fn write_body(&mut self, sink: &mut dyn Write) -> io::Result<()> {
        self(sink)
    }
}

/// Streams an attachment's content as the whole request body.
impl BodyWriter for Attachment {
    fn write_body(&mut self, sink: &mut dyn Write) -> io::Result<()> {
        let mut source = self.open()?;
        attachment::stream(&mut source, sink).map(|_| ())
    }

    fn reader(&mut self) -> io::Result<Box<dyn Read + Send + '_>> {
        Ok(self.open()?)
    }
}

/// A body with an explicit content type around another writer.
pub struct Typed<W> {
    content_type: String,
    inner: W,
}

impl<W: BodyWriter> Typed<W> {
    pub fn new(content_type: impl Into<String>, inner: W) -> Self {
        Self {
            content_type: content_type.into(),
            inner,
        }
    }
}

impl<W: BodyWriter> BodyWriter for Typed<W> {
    fn content_type(&self) -> &str {
        &self.content_type
    }

    fn write_body(&mut self, sink: &mut dyn Write) -> io::Result<()> {
        self.inner.write_body(sink)
    }

    fn reader(&mut self) -> io::Result<Box<dyn Read + Send + '_>> {
        self.inner.reader()
    }
}

/// Serializes a value as an `application/json` body.
pub struct JsonBody<T> {
    value: T,
}

impl<T: Serialize + Send> JsonBody<T> {
    pub fn new(value: T) -> Self {
        Self { value }
    }
}

impl<T: Serialize + Send> BodyWriter for JsonBody<T> {
    fn content_type(&self) -> &str {
        "application/json"
    }

    fn write_body(&mut self, sink: &mut dyn Write) -> io::Result<()> {
        serde_json::to_writer(sink, &self.value).map_err(io::Error::from)
    }
}
