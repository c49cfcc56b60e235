//! HTTP Host header peeking
//!
//! Reads the request line and headers (never the body) from the client
//! stream and extracts the `Host` header. Line endings may be `\r\n` or a
//! bare `\n`; header parsing stops at the first blank line.

use tokio::io::{AsyncRead, AsyncReadExt};
use tracing::trace;

use super::{is_valid_hostname, SniffError, MAX_HTTP_HEAD_SIZE};

/// Read chunk size for the head scan
const READ_CHUNK_SIZE: usize = 1024;

/// Read the HTTP request head from `stream` and extract the Host header.
///
/// Returns the host (port stripped unless the value is a bracketed IPv6
/// literal) together with every byte consumed, in order, for replay to the
/// backend. Bytes past the blank line that arrived in the same read are
/// included in the replay buffer and never inspected.
///
/// # Errors
///
/// Fails if the request line is malformed, the headers end without a
/// `Host`, or the head exceeds [`MAX_HTTP_HEAD_SIZE`].
pub async fn peek_http_host<R>(stream: &mut R) -> Result<(String, Vec<u8>), SniffError>
where
    R: AsyncRead + Unpin,
{
    let mut peeked: Vec<u8> = Vec::with_capacity(READ_CHUNK_SIZE);
    let mut buf = [0u8; READ_CHUNK_SIZE];

    let head_end = loop {
        if let Some(end) = find_head_end(&peeked) {
            break end;
        }
        if peeked.len() > MAX_HTTP_HEAD_SIZE {
            return Err(SniffError::HeadTooLarge(MAX_HTTP_HEAD_SIZE));
        }

        let n = stream.read(&mut buf).await?;
        if n == 0 {
            // EOF before the blank line
            return Err(SniffError::InvalidHttp);
        }
        peeked.extend_from_slice(&buf[..n]);
    };

    let host = parse_host(&peeked[..head_end])?;
    Ok((host, peeked))
}

/// Find the end of the request head: the index one past the first blank
/// line, accepting `\r\n\r\n`, `\n\n`, and mixed endings.
fn find_head_end(data: &[u8]) -> Option<usize> {
    let mut i = 0;
    while i < data.len() {
        if data[i] == b'\n' {
            if data.get(i + 1) == Some(&b'\n') {
                return Some(i + 2);
            }
            if data.get(i + 1) == Some(&b'\r') && data.get(i + 2) == Some(&b'\n') {
                return Some(i + 3);
            }
        }
        i += 1;
    }
    None
}

/// Parse a complete request head and extract the Host header value.
///
/// # Errors
///
/// `InvalidHttp` when the request line is not three whitespace-separated
/// tokens with the third beginning `HTTP/`; `NoHostHeader` when the
/// headers end without a usable `Host`.
pub fn parse_host(head: &[u8]) -> Result<String, SniffError> {
    let text = std::str::from_utf8(head).map_err(|_| SniffError::InvalidHttp)?;

    let mut lines = text.split('\n').map(|l| l.strip_suffix('\r').unwrap_or(l));

    let request_line = lines.next().ok_or(SniffError::InvalidHttp)?;
    let parts: Vec<&str> = request_line.split_whitespace().collect();
    if parts.len() < 3 || !parts[2].starts_with("HTTP/") {
        return Err(SniffError::InvalidHttp);
    }

    for line in lines {
        if line.is_empty() {
            break;
        }

        let Some(colon) = line.find(':') else {
            continue;
        };
        if !line[..colon].eq_ignore_ascii_case("host") {
            continue;
        }

        let value = line[colon + 1..].trim();
        let host = strip_port(value);
        let bracketed = host.starts_with('[');
        if host.is_empty() || (!bracketed && !is_valid_hostname(host)) {
            return Err(SniffError::NoHostHeader);
        }
        trace!("found Host: {}", host);
        return Ok(host.to_string());
    }

    Err(SniffError::NoHostHeader)
}

/// Strip a trailing `:port`, leaving bracketed IPv6 literals untouched.
fn strip_port(host: &str) -> &str {
    if host.contains('[') {
        return host;
    }

    if let Some(colon) = host.rfind(':') {
        let potential_port = &host[colon + 1..];
        if !potential_port.is_empty() && potential_port.chars().all(|c| c.is_ascii_digit()) {
            return &host[..colon];
        }
    }

    host
}
