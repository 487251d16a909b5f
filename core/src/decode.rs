//! The response decoder seam.
//!
//! # Design
//! A decoder receives the response body stream, its content type, and the
//! response headers, and turns them into a typed value. It is consumed by the
//! call (`self`), which makes "invoked at most once" a property of the type.
//! Closures of the right shape are decoders, and `json`, `text`, and `bytes`
//! cover the common cases.

use std::io::{self, Read};
use std::marker::PhantomData;

use serde::de::DeserializeOwned;
use thiserror::Error;
use ureq::http::HeaderMap;

/// Failure raised by a response decoder.
#[derive(Debug, Error)]
pub enum DecodeError {
    /// Reading the response stream failed.
    #[error("failed to read response body: {0}")]
    Io(#[from] io::Error),

    /// The content was read but could not be understood.
    #[error("{0}")]
    Invalid(#[source] Box<dyn std::error::Error + Send + Sync>),
}

impl DecodeError {
    pub fn invalid(error: impl Into<Box<dyn std::error::Error + Send + Sync>>) -> Self {
        DecodeError::Invalid(error.into())
    }

    /// True when the underlying read gave up waiting for data.
    pub fn is_timeout(&self) -> bool {
        crate::transport::is_timeout(self)
    }
}

impl From<serde_json::Error> for DecodeError {
    fn from(error: serde_json::Error) -> Self {
        // serde_json hides the io::Error it wrapped; keep its kind so a read
        // timeout mid-document is still recognisable.
        match error.io_error_kind() {
            Some(kind) => DecodeError::Io(io::Error::new(kind, error)),
            None => DecodeError::Invalid(Box::new(error)),
        }
    }
}

/// Turns a successful response into a typed result.
pub trait ResponseDecoder<T> {
    fn decode(
        self,
        body: &mut dyn Read,
        content_type: Option<&str>,
        headers: &HeaderMap,
    ) -> Result<T, DecodeError>;
}

impl<T, F> ResponseDecoder<T> for F
where
    F: FnOnce(&mut dyn Read, Option<&str>, &HeaderMap) -> Result<T, DecodeError>,
{
    fn decode(
        self,
        body: &mut dyn Read,
        content_type: Option<&str>,
        headers: &HeaderMap,
    ) -> Result<T, DecodeError> {
        self(body, content_type, headers)
    }
}

/// Decodes a JSON body into `T`.
#[derive(Debug)]
pub struct Json<T>(PhantomData<fn() -> T>);

/// A decoder that reads the body as JSON.
pub fn json<T: DeserializeOwned>() -> Json<T> {
    Json(PhantomData)
}

impl<T: DeserializeOwned> ResponseDecoder<T> for Json<T> {
    fn decode(self, body: &mut dyn Read, _: Option<&str>, _: &HeaderMap) -> Result<T, DecodeError> {
        Ok(serde_json::from_reader(body)?)
    }
}

/// A decoder that reads the body as UTF-8 text.
pub fn text() -> impl ResponseDecoder<String> {
    |body: &mut dyn Read, _: Option<&str>, _: &HeaderMap| -> Result<String, DecodeError> {
        let mut out = String::new();
        body.read_to_string(&mut out)?;
        Ok(out)
    }
}

/// A decoder that returns the raw body bytes.
pub fn bytes() -> impl ResponseDecoder<Vec<u8>> {
    |body: &mut dyn Read, _: Option<&str>, _: &HeaderMap| -> Result<Vec<u8>, DecodeError> {
        let mut out = Vec::new();
        body.read_to_end(&mut out)?;
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;
    use std::io::Cursor;

    #[derive(Debug, Deserialize, PartialEq)]
    struct Point {
        x: i32,
        y: i32,
    }

    fn run<T>(decoder: impl ResponseDecoder<T>, body: &str) -> Result<T, DecodeError> {
        let mut reader = Cursor::new(body.as_bytes().to_vec());
        decoder.decode(&mut reader, Some("application/json"), &HeaderMap::new())
    }

    /// A reader that always times out.
    struct Stalled;

    impl Read for Stalled {
        fn read(&mut self, _: &mut [u8]) -> io::Result<usize> {
            Err(io::Error::new(io::ErrorKind::TimedOut, "stalled"))
        }
    }

    #[test]
    fn json_decodes_typed_value() {
        let point: Point = run(json(), r#"{"x":1,"y":-2}"#).unwrap();
        assert_eq!(point, Point { x: 1, y: -2 });
    }

    #[test]
    fn bad_json_is_invalid() {
        let err = run(json::<Point>(), "not json").unwrap_err();
        assert!(matches!(err, DecodeError::Invalid(_)));
        assert!(!err.is_timeout());
    }

    #[test]
    fn json_read_timeout_stays_a_timeout() {
        let err = json::<Point>()
            .decode(&mut Stalled, None, &HeaderMap::new())
            .unwrap_err();
        assert!(err.is_timeout());
    }

    #[test]
    fn text_and_bytes() {
        assert_eq!(run(text(), "héllo").unwrap(), "héllo");
        assert_eq!(run(bytes(), "abc").unwrap(), b"abc".to_vec());
    }

    #[test]
    fn closures_see_content_type_and_headers() {
        let mut headers = HeaderMap::new();
        headers.insert("x-count", "3".parse().unwrap());

        let decoder = |_: &mut dyn Read,
                       content_type: Option<&str>,
                       headers: &HeaderMap|
         -> Result<String, DecodeError> {
            let count = headers
                .get("x-count")
                .and_then(|v| v.to_str().ok())
                .ok_or_else(|| DecodeError::invalid("missing x-count"))?;
            Ok(format!("{}:{count}", content_type.unwrap_or("none")))
        };

        let out = decoder
            .decode(&mut io::empty(), Some("text/plain"), &headers)
            .unwrap();
        assert_eq!(out, "text/plain:3");
    }
}
