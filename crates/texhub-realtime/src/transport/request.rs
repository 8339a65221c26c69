//! Bounded reading and parsing of an HTTP/1.1 request head.
//!
//! Only what the two supported request shapes need is parsed: the request
//! line and the header block. Bodies are never read.

use std::io;

use tokio::io::{AsyncRead, AsyncReadExt};

const HEAD_END: &[u8] = b"\r\n\r\n";

/// Why a request head could not be read.
#[derive(Debug)]
pub enum HeadError {
    /// The peer closed before sending a complete head.
    Closed,
    /// Socket error.
    Io(io::Error),
    /// No complete request line within the read budget.
    RequestLineTooLong,
    /// Request line complete but the headers exceed the read budget.
    HeadersTooLarge,
}

impl HeadError {
    /// Status to answer with before closing, if any.
    pub fn status(&self) -> Option<u16> {
        match self {
            Self::Closed | Self::Io(_) => None,
            Self::RequestLineTooLong => Some(414),
            Self::HeadersTooLarge => Some(431),
        }
    }
}

impl From<io::Error> for HeadError {
    fn from(err: io::Error) -> Self {
        Self::Io(err)
    }
}

/// Read until the end of the request head.
///
/// At most `fill_size * max_fills` bytes are read. Returns the length of
/// the head including the terminating blank line; bytes after it (the
/// start of the WebSocket stream) stay in `buf`.
pub async fn read_head<R>(
    io: &mut R,
    buf: &mut Vec<u8>,
    fill_size: usize,
    max_fills: usize,
) -> Result<usize, HeadError>
where
    R: AsyncRead + Unpin + ?Sized,
{
    let limit = fill_size.saturating_mul(max_fills.max(1));
    buf.clear();
    loop {
        if buf.len() >= limit {
            return Err(if find(buf, b"\r\n", 0).is_some() {
                HeadError::HeadersTooLarge
            } else {
                HeadError::RequestLineTooLong
            });
        }
        let start = buf.len();
        let end = (start + fill_size).min(limit);
        buf.resize(end, 0);
        let n = io.read(&mut buf[start..end]).await?;
        buf.truncate(start + n);
        if n == 0 {
            return Err(HeadError::Closed);
        }
        if let Some(pos) = find(buf, HEAD_END, start.saturating_sub(HEAD_END.len() - 1)) {
            return Ok(pos + HEAD_END.len());
        }
    }
}

fn find(haystack: &[u8], needle: &[u8], from: usize) -> Option<usize> {
    haystack
        .get(from..)?
        .windows(needle.len())
        .position(|w| w == needle)
        .map(|p| p + from)
}

/// Malformed request head.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MalformedRequest;

/// A parsed request head borrowing from the read buffer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestHead<'a> {
    pub method: &'a str,
    pub target: &'a str,
    pub headers: Vec<(&'a str, &'a str)>,
}

impl<'a> RequestHead<'a> {
    /// Target without the query string.
    pub fn path(&self) -> &'a str {
        self.target.split_once('?').map_or(self.target, |(p, _)| p)
    }

    /// Query string, if any.
    pub fn query(&self) -> Option<&'a str> {
        self.target.split_once('?').map(|(_, q)| q)
    }

    /// First value of a query parameter.
    pub fn query_param(&self, name: &str) -> Option<&'a str> {
        self.query()?
            .split('&')
            .filter_map(|pair| pair.split_once('='))
            .find(|(k, _)| *k == name)
            .map(|(_, v)| v)
    }

    /// First value of a header (case-insensitive name).
    pub fn header(&self, name: &str) -> Option<&'a str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| *v)
    }

    /// All values of a header, comma lists flattened.
    pub fn header_tokens(&self, name: &str) -> impl Iterator<Item = &'a str> + '_ {
        let name = name.to_string();
        self.headers
            .iter()
            .filter(move |(k, _)| k.eq_ignore_ascii_case(&name))
            .flat_map(|(_, v)| v.split(','))
            .map(str::trim)
            .filter(|t| !t.is_empty())
    }
}

/// Parse a head as returned by [`read_head`] (terminator included or not).
pub fn parse_head(raw: &[u8]) -> Result<RequestHead<'_>, MalformedRequest> {
    let text = std::str::from_utf8(raw).map_err(|_| MalformedRequest)?;
    let text = text.strip_suffix("\r\n\r\n").unwrap_or(text);
    let mut lines = text.split("\r\n");

    let request_line = lines.next().ok_or(MalformedRequest)?;
    let mut parts = request_line.split(' ');
    let (Some(method), Some(target), Some(version), None) =
        (parts.next(), parts.next(), parts.next(), parts.next())
    else {
        return Err(MalformedRequest);
    };
    if method.is_empty() || !target.starts_with('/') || version != "HTTP/1.1" {
        return Err(MalformedRequest);
    }

    let mut headers = Vec::with_capacity(16);
    for line in lines {
        let (name, value) = line.split_once(':').ok_or(MalformedRequest)?;
        if name.is_empty() || name.bytes().any(|b| b.is_ascii_whitespace()) {
            return Err(MalformedRequest);
        }
        headers.push((name, value.trim()));
    }

    Ok(RequestHead {
        method,
        target,
        headers,
    })
}

/// What a parsed request asks for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Route {
    /// `GET`/`HEAD` on the status path.
    Status { head_only: bool },
    /// Another method on the status path.
    MethodNotAllowed,
    /// `GET` on the WebSocket path.
    Upgrade,
    /// Anything else.
    Unknown,
}

/// Recognise one of the two supported request shapes.
pub fn route(head: &RequestHead<'_>, status_path: &str, websocket_path: &str) -> Route {
    let path = head.path();
    if path == status_path {
        return match head.method {
            "GET" => Route::Status { head_only: false },
            "HEAD" => Route::Status { head_only: true },
            _ => Route::MethodNotAllowed,
        };
    }
    if path == websocket_path && head.method == "GET" {
        return Route::Upgrade;
    }
    Route::Unknown
}
