//! HTTP/1.1 request serialization.
//!
//! Two shapes: a standard request whose body (if any) is sent in one piece
//! with `Content-Length`, and a streamed request whose body is framed with
//! chunked transfer coding (RFC 7230 section 4.1) and never carries
//! `Content-Length`.

use std::io::{self, Read, Write};

use crate::http::{has_header_ignore_case, HttpMethod};

/// Upload and download chunk size.
pub const CHUNK_SIZE: usize = 65536;

/// Write a request whose body is fully in memory.
pub fn send_simple<W: Write>(
    w: &mut W,
    method: HttpMethod,
    target: &str,
    headers: &[(String, String)],
    body: Option<&[u8]>,
) -> io::Result<()> {
    let mut head = request_line(method, target)?;
    for (name, value) in headers {
        push_header(&mut head, name, value)?;
    }
    let content_length = match body {
        Some(b) => Some(b.len()),
        None if method.expects_body() => Some(0),
        None => None,
    };
    if let Some(len) = content_length {
        if !has_header_ignore_case(headers, "content-length") {
            push_header(&mut head, "Content-Length", &len.to_string())?;
        }
    }
    head.extend_from_slice(b"\r\n");

    w.write_all(&head)?;
    if let Some(b) = body {
        w.write_all(b)?;
    }
    w.flush()
}

/// Write a request whose body is read from `body` and sent chunked.
///
/// Caller-supplied `Content-Length` and `Transfer-Encoding` headers are
/// dropped. Returns the number of payload bytes sent.
pub fn send_chunked<W: Write, R: Read + ?Sized>(
    w: &mut W,
    method: HttpMethod,
    target: &str,
    headers: &[(String, String)],
    body: &mut R,
) -> io::Result<u64> {
    let mut head = request_line(method, target)?;
    for (name, value) in headers {
        if name.eq_ignore_ascii_case("content-length") || name.eq_ignore_ascii_case("transfer-encoding") {
            continue;
        }
        push_header(&mut head, name, value)?;
    }
    push_header(&mut head, "Transfer-Encoding", "chunked")?;
    head.extend_from_slice(b"\r\n");
    w.write_all(&head)?;

    let mut buf = vec![0u8; CHUNK_SIZE];
    let mut sent = 0u64;
    loop {
        let n = read_full(body, &mut buf)?;
        if n == 0 {
            break;
        }
        write_chunk(w, &buf[..n])?;
        sent += n as u64;
    }
    w.write_all(b"0\r\n\r\n")?;
    w.flush()?;
    Ok(sent)
}

/// Write one chunk frame: hex size, CRLF, data, CRLF.
pub fn write_chunk<W: Write>(w: &mut W, data: &[u8]) -> io::Result<()> {
    write!(w, "{:x}\r\n", data.len())?;
    w.write_all(data)?;
    w.write_all(b"\r\n")
}

/// Read until `buf` is full or the reader is exhausted.
pub(crate) fn read_full<R: Read + ?Sized>(r: &mut R, buf: &mut [u8]) -> io::Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        match r.read(&mut buf[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        }
    }
    Ok(filled)
}

fn request_line(method: HttpMethod, target: &str) -> io::Result<Vec<u8>> {
    if target.bytes().any(|b| b.is_ascii_whitespace() || b.is_ascii_control()) {
        return Err(invalid_input(format!("request target {target:?} contains whitespace or control bytes")));
    }
    let mut line = Vec::with_capacity(256);
    line.extend_from_slice(method.as_str().as_bytes());
    line.push(b' ');
    if !target.starts_with('/') {
        line.push(b'/');
    }
    line.extend_from_slice(target.as_bytes());
    line.extend_from_slice(b" HTTP/1.1\r\n");
    Ok(line)
}

/// Header names are tokens; values may not contain CR, LF or NUL.
fn push_header(buf: &mut Vec<u8>, name: &str, value: &str) -> io::Result<()> {
    if name.is_empty() || name.bytes().any(|b| b == b':' || b.is_ascii_whitespace() || b.is_ascii_control()) {
        return Err(invalid_input(format!("invalid header name {name:?}")));
    }
    if value.bytes().any(|b| matches!(b, b'\r' | b'\n' | 0)) {
        return Err(invalid_input(format!("header {name} has a value with CR, LF or NUL")));
    }
    buf.extend_from_slice(name.as_bytes());
    buf.extend_from_slice(b": ");
    buf.extend_from_slice(value.as_bytes());
    buf.extend_from_slice(b"\r\n");
    Ok(())
}

fn invalid_input(msg: String) -> io::Error {
    io::Error::new(io::ErrorKind::InvalidInput, msg)
}
