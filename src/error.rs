//! Error types for spoof-router
//!
//! Errors are categorized by subsystem. Only startup errors (configuration,
//! bind) propagate to process exit; per-query and per-connection errors are
//! confined to the task that owns them.

use std::io;
use std::net::SocketAddr;

use thiserror::Error;

use crate::sniff::SniffError;

/// Top-level error type for spoof-router
#[derive(Debug, Error)]
pub enum RouterError {
    /// Configuration errors (file parsing, validation)
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    /// DNS responder errors
    #[error("DNS error: {0}")]
    Dns(#[from] DnsError),

    /// TCP proxy errors
    #[error("proxy error: {0}")]
    Proxy(#[from] ProxyError),

    /// UDP sink errors
    #[error("sink error: {0}")]
    Sink(#[from] SinkError),

    /// I/O errors not covered by other categories
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

/// Configuration-related errors
#[derive(Debug, Error)]
pub enum ConfigError {
    /// File not found or inaccessible
    #[error("configuration file not found: {path}")]
    FileNotFound { path: String },

    /// JSON parsing error
    #[error("failed to parse configuration: {0}")]
    Parse(String),

    /// Validation error (invalid values, conflicting addresses)
    #[error("configuration validation failed: {0}")]
    Validation(String),

    /// Environment variable override error
    #[error("environment variable {name}: {reason}")]
    Env { name: String, reason: String },

    /// I/O error while reading config
    #[error("I/O error reading configuration: {0}")]
    Io(#[from] io::Error),
}

impl ConfigError {
    /// Create a validation error
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }
}

/// DNS responder and upstream forwarding errors
#[derive(Debug, Error)]
pub enum DnsError {
    /// Failed to bind the responder socket
    #[error("failed to bind DNS socket on {addr}: {source}")]
    Bind { addr: SocketAddr, source: io::Error },

    /// Malformed DNS message
    #[error("DNS message decode failed: {0}")]
    Decode(String),

    /// Failed to serialize a DNS message
    #[error("DNS message encode failed: {0}")]
    Encode(String),

    /// A single upstream attempt timed out
    #[error("upstream {server} timed out")]
    UpstreamTimeout { server: SocketAddr },

    /// Every configured upstream failed
    #[error("all upstream DNS servers failed")]
    AllUpstreamsFailed,

    /// I/O error
    #[error("DNS I/O error: {0}")]
    Io(#[from] io::Error),
}

/// TCP proxy errors
///
/// Everything short of `Bind` and `DrainTimeout` is a per-connection
/// failure: the client socket is dropped silently and the error goes no
/// further than a log line.
#[derive(Debug, Error)]
pub enum ProxyError {
    /// Failed to bind a proxy listener
    #[error("failed to bind proxy listener on {addr}: {source}")]
    Bind { addr: SocketAddr, source: io::Error },

    /// Hostname peek failed (malformed ClientHello, missing Host, ...)
    #[error("hostname peek failed: {0}")]
    Sniff(#[from] SniffError),

    /// Peek did not complete within the peek timeout
    #[error("hostname peek timed out")]
    PeekTimeout,

    /// Host fails the suffix allow-list
    #[error("host not allowed: {host}")]
    HostNotAllowed { host: String },

    /// Backend resolution failed or returned no addresses
    #[error("resolution failed for {host}: {reason}")]
    Resolve { host: String, reason: String },

    /// Backend dial failed
    #[error("backend dial to {addr} failed: {reason}")]
    Dial { addr: SocketAddr, reason: String },

    /// Backend dial did not complete within the dial timeout
    #[error("backend dial to {addr} timed out")]
    DialTimeout { addr: SocketAddr },

    /// Graceful shutdown exceeded the drain deadline
    #[error("shutdown drain deadline exceeded with {active} tunnels active")]
    DrainTimeout { active: usize },

    /// I/O error
    #[error("proxy I/O error: {0}")]
    Io(#[from] io::Error),
}

impl ProxyError {
    /// Create a resolution error
    pub fn resolve(host: impl Into<String>, reason: impl ToString) -> Self {
        Self::Resolve {
            host: host.into(),
            reason: reason.to_string(),
        }
    }
}

/// UDP sink errors
#[derive(Debug, Error)]
pub enum SinkError {
    /// Failed to bind the sink socket
    #[error("failed to bind UDP sink on {addr}: {source}")]
    Bind { addr: SocketAddr, source: io::Error },

    /// I/O error
    #[error("sink I/O error: {0}")]
    Io(#[from] io::Error),
}

/// Whether an I/O error marks an ordinary end of a connection.
///
/// During tunnelling these are expected whenever one side walks away
/// mid-transfer and are treated as normal termination, not logged as
/// failures.
#[must_use]
pub fn is_disconnect(err: &io::Error) -> bool {
    matches!(
        err.kind(),
        io::ErrorKind::ConnectionReset
            | io::ErrorKind::ConnectionAborted
            | io::ErrorKind::BrokenPipe
            | io::ErrorKind::NotConnected
            | io::ErrorKind::UnexpectedEof
            | io::ErrorKind::WriteZero
    )
}

/// Type alias for Result with `RouterError`
pub type Result<T> = std::result::Result<T, RouterError>;
