//! HTTP request vocabulary: methods and bodies.
//!
//! # Design
//! A body is either absent, fully materialised bytes, or a readable stream.
//! Streams are what make large uploads cheap: for POST and PUT the client
//! frames them with chunked transfer encoding instead of buffering them.
//!
//! Because the client retries once after re-authenticating, it has to know
//! whether a stream can be replayed. `Body::seekable` wraps anything that can
//! seek back to its start; `Body::stream` wraps a one-shot reader.

use std::fmt;
use std::io::{self, Read, Seek, SeekFrom};

/// HTTP method for a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HttpMethod {
    Get,
    Head,
    Post,
    Put,
    Delete,
    Patch,
}

impl HttpMethod {
    pub fn as_str(self) -> &'static str {
        match self {
            HttpMethod::Get => "GET",
            HttpMethod::Head => "HEAD",
            HttpMethod::Post => "POST",
            HttpMethod::Put => "PUT",
            HttpMethod::Delete => "DELETE",
            HttpMethod::Patch => "PATCH",
        }
    }

    /// POST and PUT are the verbs that stream bodies with chunked encoding.
    pub fn streams_body(self) -> bool {
        matches!(self, HttpMethod::Post | HttpMethod::Put)
    }

    /// Verbs that send `Content-Length: 0` when no body is given.
    pub(crate) fn expects_body(self) -> bool {
        matches!(self, HttpMethod::Post | HttpMethod::Put | HttpMethod::Patch)
    }
}

impl fmt::Display for HttpMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A readable upload source.
pub trait UploadSource: Read + Send {
    /// Move back to the start of the payload. Returns `false` when the
    /// source cannot be replayed.
    fn rewind(&mut self) -> io::Result<bool>;
}

struct OneShot<R>(R);

impl<R: Read> Read for OneShot<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.0.read(buf)
    }
}

impl<R: Read + Send> UploadSource for OneShot<R> {
    fn rewind(&mut self) -> io::Result<bool> {
        Ok(false)
    }
}

struct Seekable<R> {
    inner: R,
    start: u64,
}

impl<R: Read> Read for Seekable<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.inner.read(buf)
    }
}

impl<R: Read + Seek + Send> UploadSource for Seekable<R> {
    fn rewind(&mut self) -> io::Result<bool> {
        self.inner.seek(SeekFrom::Start(self.start))?;
        Ok(true)
    }
}

/// Request body.
#[derive(Default)]
pub enum Body {
    #[default]
    Empty,
    Bytes(Vec<u8>),
    Stream(Box<dyn UploadSource>),
}

impl Body {
    /// A one-shot stream. It is not resent after re-authentication.
    pub fn stream<R: Read + Send + 'static>(reader: R) -> Self {
        Body::Stream(Box::new(OneShot(reader)))
    }

    /// A stream that is rewound to its current position before a retry.
    pub fn seekable<R: Read + Seek + Send + 'static>(mut reader: R) -> io::Result<Self> {
        let start = reader.stream_position()?;
        Ok(Body::Stream(Box::new(Seekable { inner: reader, start })))
    }

    pub fn is_stream(&self) -> bool {
        matches!(self, Body::Stream(_))
    }

    /// Prepare the body to be sent again. Returns `false` if it cannot be.
    pub(crate) fn rewind(&mut self) -> io::Result<bool> {
        match self {
            Body::Empty | Body::Bytes(_) => Ok(true),
            Body::Stream(source) => source.rewind(),
        }
    }
}

impl From<Vec<u8>> for Body {
    fn from(bytes: Vec<u8>) -> Self {
        Body::Bytes(bytes)
    }
}

impl From<&str> for Body {
    fn from(s: &str) -> Self {
        Body::Bytes(s.as_bytes().to_vec())
    }
}

impl From<String> for Body {
    fn from(s: String) -> Self {
        Body::Bytes(s.into_bytes())
    }
}

impl fmt::Debug for Body {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Body::Empty => f.write_str("Empty"),
            Body::Bytes(b) => write!(f, "Bytes({} bytes)", b.len()),
            Body::Stream(_) => f.write_str("Stream"),
        }
    }
}

/// Look up a header by exact key.
pub(crate) fn has_header(headers: &[(String, String)], key: &str) -> bool {
    headers.iter().any(|(k, _)| k == key)
}

/// Look up a header ignoring ASCII case.
pub(crate) fn has_header_ignore_case(headers: &[(String, String)], key: &str) -> bool {
    headers.iter().any(|(k, _)| k.eq_ignore_ascii_case(key))
}
