//! Plain HTTP/1.1 responses written before closing or hijacking.

use std::io::Write;

/// Reason phrase for the statuses this server emits.
pub fn reason(status: u16) -> &'static str {
    match status {
        101 => "Switching Protocols",
        200 => "OK",
        400 => "Bad Request",
        405 => "Method Not Allowed",
        414 => "URI Too Long",
        426 => "Upgrade Required",
        431 => "Request Header Fields Too Large",
        503 => "Service Unavailable",
        _ => "Error",
    }
}

/// Render the status check answer.
///
/// `ready` selects 200 or 503. HEAD requests get the same headers
/// without the body.
pub fn write_status(out: &mut Vec<u8>, ready: bool, head_only: bool) {
    let (status, body): (u16, &[u8]) = if ready {
        (200, b"ok\n")
    } else {
        (503, b"shutting down\n")
    };
    head(out, status, body.len());
    out.extend_from_slice(b"Content-Type: text/plain\r\n\r\n");
    if !head_only {
        out.extend_from_slice(body);
    }
}

/// Render an error response. The connection closes after it.
pub fn write_error(out: &mut Vec<u8>, status: u16) {
    let body = reason(status);
    head(out, status, body.len() + 1);
    match status {
        405 => out.extend_from_slice(b"Allow: GET, HEAD\r\n"),
        426 => out.extend_from_slice(b"Sec-WebSocket-Version: 13\r\n"),
        _ => {}
    }
    out.extend_from_slice(b"Content-Type: text/plain\r\n\r\n");
    out.extend_from_slice(body.as_bytes());
    out.push(b'\n');
}

/// Render the 101 answer to an accepted upgrade.
pub fn write_switching_protocols(out: &mut Vec<u8>, accept_key: &str, protocol: &str) {
    out.clear();
    // Writing into a Vec cannot fail.
    let _ = write!(
        out,
        "HTTP/1.1 101 Switching Protocols\r\n\
         Upgrade: websocket\r\n\
         Connection: Upgrade\r\n\
         Sec-WebSocket-Accept: {accept_key}\r\n\
         Sec-WebSocket-Protocol: {protocol}\r\n\r\n"
    );
}

fn head(out: &mut Vec<u8>, status: u16, content_length: usize) {
    out.clear();
    let _ = write!(
        out,
        "HTTP/1.1 {status} {}\r\nContent-Length: {content_length}\r\nConnection: close\r\n",
        reason(status)
    );
}
