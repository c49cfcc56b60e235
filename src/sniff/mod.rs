//! Protocol sniffing for the hostname peek
//!
//! Both peeks are non-destructive in effect: every byte consumed from the
//! client stream is returned alongside the extracted hostname so the caller
//! can replay it to the backend before any further client bytes.

pub mod http;
pub mod tls;

use std::io;

use thiserror::Error;

pub use http::peek_http_host;
pub use tls::peek_client_hello;

/// Maximum accepted HTTP request head (request line + headers)
pub const MAX_HTTP_HEAD_SIZE: usize = 8192;

/// Hostname peek failures
#[derive(Debug, Error)]
pub enum SniffError {
    /// The leading bytes are not a TLS handshake record
    #[error("not a TLS ClientHello: {0}")]
    NotTls(&'static str),

    /// The handshake record does not decode as a ClientHello
    #[error("malformed ClientHello: {0}")]
    MalformedClientHello(&'static str),

    /// ClientHello carried no usable server_name extension
    #[error("ClientHello has no server_name extension")]
    NoServerName,

    /// The request line is not `METHOD SP target SP HTTP/x.y`
    #[error("invalid HTTP request")]
    InvalidHttp,

    /// Headers ended without a Host header
    #[error("no Host header found")]
    NoHostHeader,

    /// Request head exceeded the size cap before the blank line
    #[error("request head exceeds {0} bytes")]
    HeadTooLarge(usize),

    /// I/O error while reading the peeked bytes
    #[error(transparent)]
    Io(#[from] io::Error),
}

/// Validate a hostname: ASCII, bounded length, RFC 1123-ish alphabet.
///
/// IP literals (dots, colons) pass too; the allow-list decides what is
/// actually acceptable.
pub(crate) fn is_valid_hostname(hostname: &str) -> bool {
    if hostname.is_empty() || hostname.len() > 253 {
        return false;
    }

    hostname
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '.' || c == ':')
}
