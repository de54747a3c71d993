//! HTTP/1.1 response parsing.
//!
//! # Design
//! `read_response` consumes only the status line and headers. The body stays
//! on the wire behind `Response`'s `Read` impl, which undoes the framing
//! (`Content-Length`, chunked, or read-until-close) as it is read. The
//! response owns the connection, so dropping it closes the socket whether
//! or not the body was read.

use std::io::{self, BufRead, BufReader, Read};

use crate::chunks::ChunkIterator;
use crate::error::ApiError;
use crate::http::HttpMethod;
use crate::transport::Connection;

const MAX_HEAD_BYTES: usize = 64 * 1024;

/// A response whose body has not been read yet.
pub struct Response<R = Connection> {
    status: u16,
    reason: String,
    headers: Vec<(String, String)>,
    body: BodyReader<R>,
}

impl<R: Read> Response<R> {
    pub fn status(&self) -> u16 {
        self.status
    }

    pub fn reason(&self) -> &str {
        &self.reason
    }

    pub fn headers(&self) -> &[(String, String)] {
        &self.headers
    }

    /// First header named `name`, ignoring ASCII case.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    /// Declared body length, if the server sent one.
    pub fn content_length(&self) -> Option<u64> {
        match self.body.framing {
            Framing::Length(_) => self.header("content-length").and_then(|v| v.trim().parse().ok()),
            Framing::Empty => Some(0),
            _ => None,
        }
    }

    /// Read the whole body.
    pub fn into_bytes(mut self) -> Result<Vec<u8>, ApiError> {
        let mut buf = Vec::new();
        self.read_to_end(&mut buf)?;
        Ok(buf)
    }

    /// Read the whole body as text, replacing invalid UTF-8.
    pub fn text(mut self) -> Result<String, ApiError> {
        let mut buf = Vec::new();
        self.read_to_end(&mut buf)?;
        Ok(String::from_utf8_lossy(&buf).into_owned())
    }

    /// Iterate over the body in fixed-size chunks.
    pub fn into_chunks(self) -> ChunkIterator<Self> {
        ChunkIterator::new(self)
    }
}

impl<R: Read> Read for Response<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.body.read(buf)
    }
}

impl<R> std::fmt::Debug for Response<R> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Response")
            .field("status", &self.status)
            .field("reason", &self.reason)
            .field("headers", &self.headers)
            .finish_non_exhaustive()
    }
}

/// Read a response head from `conn`. Interim 1xx responses are skipped;
/// they share one `MAX_HEAD_BYTES` budget with the final head.
pub fn read_response<R: Read>(conn: R, method: HttpMethod) -> Result<Response<R>, ApiError> {
    let mut reader = BufReader::with_capacity(16 * 1024, conn);
    let mut consumed = 0usize;
    loop {
        let head = read_head(&mut reader, &mut consumed)?;
        if (100..200).contains(&head.status) && head.status != 101 {
            continue;
        }

        let framing = if method == HttpMethod::Head || head.status == 204 || head.status == 304 {
            Framing::Empty
        } else if head.chunked {
            Framing::Chunked(ChunkState::default())
        } else if let Some(len) = head.content_length {
            Framing::Length(len)
        } else {
            Framing::UntilClose
        };

        return Ok(Response {
            status: head.status,
            reason: head.reason,
            headers: head.headers,
            body: BodyReader { inner: reader, framing },
        });
    }
}

struct Head {
    status: u16,
    reason: String,
    headers: Vec<(String, String)>,
    content_length: Option<u64>,
    chunked: bool,
}

fn read_head<R: BufRead>(reader: &mut R, consumed: &mut usize) -> Result<Head, ApiError> {
    let status_line = read_crlf_line(reader, consumed)?
        .ok_or_else(|| ApiError::Connection("connection closed before a response was received".into()))?;

    let mut parts = status_line.splitn(3, ' ');
    let version = parts.next().unwrap_or_default();
    if !version.starts_with("HTTP/1.") {
        return Err(ApiError::Protocol(format!("bad status line: {status_line:?}")));
    }
    let status: u16 = parts
        .next()
        .and_then(|s| s.parse().ok())
        .ok_or_else(|| ApiError::Protocol(format!("bad status code in {status_line:?}")))?;
    let reason = parts.next().unwrap_or_default().to_string();

    let mut headers = Vec::new();
    let mut content_length = None;
    let mut chunked = false;
    loop {
        let line = read_crlf_line(reader, consumed)?
            .ok_or_else(|| ApiError::Connection("connection closed inside response headers".into()))?;
        if line.is_empty() {
            break;
        }
        let Some((name, value)) = line.split_once(':') else {
            return Err(ApiError::Protocol(format!("bad header line: {line:?}")));
        };
        let name = name.trim().to_string();
        let value = value.trim().to_string();

        if name.eq_ignore_ascii_case("content-length") {
            content_length = Some(
                value
                    .parse()
                    .map_err(|_| ApiError::Protocol(format!("bad content-length: {value:?}")))?,
            );
        }
        if name.eq_ignore_ascii_case("transfer-encoding")
            && value.rsplit(',').next().is_some_and(|v| v.trim().eq_ignore_ascii_case("chunked"))
        {
            chunked = true;
        }
        headers.push((name, value));
    }

    Ok(Head {
        status,
        reason,
        headers,
        content_length,
        chunked,
    })
}

/// Read one line without its line ending. `None` at clean end of stream.
fn read_crlf_line<R: BufRead>(reader: &mut R, consumed: &mut usize) -> Result<Option<String>, ApiError> {
    let mut raw = Vec::new();
    let n = reader.read_until(b'\n', &mut raw)?;
    if n == 0 {
        return Ok(None);
    }
    *consumed += n;
    if *consumed > MAX_HEAD_BYTES {
        return Err(ApiError::Protocol("response head too large".into()));
    }
    if raw.ends_with(b"\n") {
        raw.pop();
        if raw.ends_with(b"\r") {
            raw.pop();
        }
    }
    String::from_utf8(raw)
        .map(Some)
        .map_err(|_| ApiError::Protocol("response head is not valid UTF-8".into()))
}

enum Framing {
    Empty,
    Length(u64),
    Chunked(ChunkState),
    UntilClose,
}

#[derive(Default)]
struct ChunkState {
    remaining: u64,
    done: bool,
}

struct BodyReader<R> {
    inner: BufReader<R>,
    framing: Framing,
}

impl<R: Read> Read for BodyReader<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if buf.is_empty() {
            return Ok(0);
        }
        match &mut self.framing {
            Framing::Empty => Ok(0),
            Framing::UntilClose => self.inner.read(buf),
            Framing::Length(remaining) => {
                if *remaining == 0 {
                    return Ok(0);
                }
                let max = (*remaining).min(buf.len() as u64) as usize;
                let n = self.inner.read(&mut buf[..max])?;
                if n == 0 {
                    return Err(truncated());
                }
                *remaining -= n as u64;
                Ok(n)
            }
            Framing::Chunked(state) => read_chunked(&mut self.inner, state, buf),
        }
    }
}

fn read_chunked<R: BufRead>(inner: &mut R, state: &mut ChunkState, buf: &mut [u8]) -> io::Result<usize> {
    if state.done {
        return Ok(0);
    }
    if state.remaining == 0 {
        let size = read_chunk_size(inner)?;
        if size == 0 {
            // Trailer section ends with an empty line.
            loop {
                let mut line = Vec::new();
                if inner.read_until(b'\n', &mut line)? == 0 || line == b"\r\n" || line == b"\n" {
                    break;
                }
            }
            state.done = true;
            return Ok(0);
        }
        state.remaining = size;
    }

    let max = state.remaining.min(buf.len() as u64) as usize;
    let n = inner.read(&mut buf[..max])?;
    if n == 0 {
        return Err(truncated());
    }
    state.remaining -= n as u64;
    if state.remaining == 0 {
        let mut crlf = Vec::with_capacity(2);
        inner.read_until(b'\n', &mut crlf)?;
        if crlf != b"\r\n" && crlf != b"\n" {
            return Err(io::Error::new(io::ErrorKind::InvalidData, "missing CRLF after chunk data"));
        }
    }
    Ok(n)
}

fn read_chunk_size<R: BufRead>(inner: &mut R) -> io::Result<u64> {
    let mut line = Vec::new();
    if inner.read_until(b'\n', &mut line)? == 0 {
        return Err(truncated());
    }
    let text = std::str::from_utf8(&line).map_err(|_| bad_chunk_size())?;
    // Chunk extensions (;name=value) are ignored.
    let hex = text.split(';').next().unwrap_or_default().trim();
    u64::from_str_radix(hex, 16).map_err(|_| bad_chunk_size())
}

fn bad_chunk_size() -> io::Error {
    io::Error::new(io::ErrorKind::InvalidData, "bad chunk size line")
}

fn truncated() -> io::Error {
    io::Error::new(io::ErrorKind::UnexpectedEof, "connection closed before end of body")
}
