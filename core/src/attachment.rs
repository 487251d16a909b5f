//! Attachment sources and chunked streaming.
//!
//! # Design
//! An `Attachment` is a named, re-openable byte source. Opening yields a fresh
//! reader every time, so the same arguments can be sent more than once. The
//! content is only ever moved in bounded chunks: `stream` copies a source into
//! a sink, and `AttachmentStream` is the pull-side wrapper the multipart body
//! reads from.

use std::fmt;
use std::fs::File;
use std::io::{self, Cursor, Read, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tracing::trace;

/// Size of the buffer used when copying attachment content.
pub const CHUNK_SIZE: usize = 8 * 1024;

type Opener = dyn Fn() -> io::Result<Box<dyn Read + Send>> + Send + Sync;

#[derive(Clone)]
enum Source {
    Path(PathBuf),
    Bytes(Arc<[u8]>),
    Opener(Arc<Opener>),
}

/// A file-like argument value sent as a multipart file part.
#[derive(Clone)]
pub struct Attachment {
    file_name: String,
    source: Source,
}

impl Attachment {
    /// An attachment backed by a file on disk. The file name is the last
    /// path component.
    pub fn from_path(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let file_name = path
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_default();
        Self {
            file_name,
            source: Source::Path(path),
        }
    }

    /// An attachment backed by an in-memory buffer.
    pub fn from_bytes(file_name: impl Into<String>, bytes: impl Into<Arc<[u8]>>) -> Self {
        Self {
            file_name: file_name.into(),
            source: Source::Bytes(bytes.into()),
        }
    }

    /// An attachment backed by an arbitrary source. `open` is called once per
    /// request that sends the attachment.
    pub fn from_fn<F>(file_name: impl Into<String>, open: F) -> Self
    where
        F: Fn() -> io::Result<Box<dyn Read + Send>> + Send + Sync + 'static,
    {
        Self {
            file_name: file_name.into(),
            source: Source::Opener(Arc::new(open)),
        }
    }

    pub fn file_name(&self) -> &str {
        &self.file_name
    }

    /// Open a fresh reader over the attachment content.
    pub fn open(&self) -> io::Result<Box<dyn Read + Send>> {
        match &self.source {
            Source::Path(path) => Ok(Box::new(File::open(path)?)),
            Source::Bytes(bytes) => Ok(Box::new(Cursor::new(Arc::clone(bytes)))),
            Source::Opener(open) => open(),
        }
    }

    pub fn path(&self) -> Option<&Path> {
        match &self.source {
            Source::Path(path) => Some(path),
            _ => None,
        }
    }
}

impl fmt::Debug for Attachment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let source = match &self.source {
            Source::Path(path) => format!("path {}", path.display()),
            Source::Bytes(bytes) => format!("{} bytes", bytes.len()),
            Source::Opener(_) => "opener".to_string(),
        };
        f.debug_struct("Attachment")
            .field("file_name", &self.file_name)
            .field("source", &source)
            .finish()
    }
}

/// Copy `source` into `sink` in `CHUNK_SIZE` pieces, returning the number of
/// bytes written.
pub fn stream(source: &mut dyn Read, sink: &mut dyn Write) -> io::Result<u64> {
    let mut buf = [0u8; CHUNK_SIZE];
    let mut written = 0u64;
    loop {
        let n = match source.read(&mut buf) {
            Ok(0) => break,
            Ok(n) => n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        };
        sink.write_all(&buf[..n])?;
        written += n as u64;
    }
    sink.flush()?;
    Ok(written)
}

/// An opened attachment being read into a request body.
///
/// Counts the bytes read so the total can be logged once the source is
/// exhausted.
pub struct AttachmentStream {
    name: String,
    file_name: String,
    reader: Box<dyn Read + Send>,
    bytes: u64,
}

impl AttachmentStream {
    pub fn open(name: &str, attachment: &Attachment) -> io::Result<Self> {
        Ok(Self {
            name: name.to_string(),
            file_name: attachment.file_name().to_string(),
            reader: attachment.open()?,
            bytes: 0,
        })
    }

    /// Name of the argument this attachment belongs to.
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn bytes_read(&self) -> u64 {
        self.bytes
    }
}

impl Read for AttachmentStream {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let n = self.reader.read(buf)?;
        if n == 0 {
            trace!(
                argument = %self.name,
                file = %self.file_name,
                bytes = self.bytes,
                "attachment streamed"
            );
        }
        self.bytes += n as u64;
        Ok(n)
    }
}

impl fmt::Debug for AttachmentStream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AttachmentStream")
            .field("name", &self.name)
            .field("file_name", &self.file_name)
            .field("bytes", &self.bytes)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// A reader that hands out at most `limit` bytes per call and records the
    /// largest request it saw.
    struct Trickle {
        data: Vec<u8>,
        pos: usize,
        limit: usize,
    }

    impl Read for Trickle {
        fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
            let n = buf.len().min(self.limit).min(self.data.len() - self.pos);
            buf[..n].copy_from_slice(&self.data[self.pos..self.pos + n]);
            self.pos += n;
            Ok(n)
        }
    }

    /// A sink that remembers the size of every write.
    #[derive(Default)]
    struct Recorder {
        data: Vec<u8>,
        largest_write: usize,
    }

    impl Write for Recorder {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.largest_write = self.largest_write.max(buf.len());
            self.data.extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    fn sample(len: usize) -> Vec<u8> {
        (0..len).map(|i| (i * 31 % 251) as u8).collect()
    }

    #[test]
    fn stream_copies_every_byte_in_bounded_chunks() {
        let data = sample(10_392);
        let mut source = Trickle {
            data: data.clone(),
            pos: 0,
            limit: usize::MAX,
        };
        let mut sink = Recorder::default();

        let written = stream(&mut source, &mut sink).unwrap();

        assert_eq!(written, 10_392);
        assert_eq!(sink.data, data);
        assert!(sink.largest_write <= CHUNK_SIZE);
    }

    #[test]
    fn stream_handles_short_reads() {
        let data = sample(1000);
        let mut source = Trickle {
            data: data.clone(),
            pos: 0,
            limit: 7,
        };
        let mut sink = Recorder::default();
        assert_eq!(stream(&mut source, &mut sink).unwrap(), 1000);
        assert_eq!(sink.data, data);
    }

    #[test]
    fn from_path_uses_last_component_as_file_name() {
        let attachment = Attachment::from_path("/tmp/some/dir/test.jpg");
        assert_eq!(attachment.file_name(), "test.jpg");
        assert_eq!(attachment.path(), Some(Path::new("/tmp/some/dir/test.jpg")));
    }

    #[test]
    fn missing_file_fails_to_open() {
        let attachment = Attachment::from_path("/definitely/not/here.bin");
        let err = attachment.open().err().unwrap();
        assert_eq!(err.kind(), io::ErrorKind::NotFound);
    }

    #[test]
    fn byte_attachments_reopen_from_start() {
        let attachment = Attachment::from_bytes("a.txt", b"abcdefghijklmnopqrstuvwxyz".to_vec());
        for _ in 0..2 {
            let mut content = String::new();
            attachment.open().unwrap().read_to_string(&mut content).unwrap();
            assert_eq!(content, "abcdefghijklmnopqrstuvwxyz");
        }
    }

    #[test]
    fn attachment_stream_counts_bytes() {
        let attachment = Attachment::from_fn("gen.bin", || Ok(Box::new(Cursor::new(sample(300)))));
        let mut stream = AttachmentStream::open("files", &attachment).unwrap();
        let mut out = Vec::new();
        stream.read_to_end(&mut out).unwrap();
        assert_eq!(out.len(), 300);
        assert_eq!(stream.bytes_read(), 300);
    }
}
