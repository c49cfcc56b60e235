//! Configuration types for spoof-router
//!
//! Configuration is loaded from a JSON file (all fields optional, with
//! defaults matching the stock deployment) and validated at startup. It is
//! immutable once the services have been started.

use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// Default suffixes steered through the spoof IP.
///
/// Matching is suffix-based: `.openai.com` covers `openai.com` itself and
/// every name below it.
pub const DEFAULT_SPOOF_SUFFIXES: &[&str] = &[
    // OpenAI / ChatGPT
    ".openai.com",
    ".chatgpt.com",
    ".oaistatic.com",
    ".oaiusercontent.com",
    // Google Gemini
    ".gemini.google.com",
    ".aistudio.google.com",
    ".ai.google.dev",
    ".generativelanguage.googleapis.com",
    ".makersuite.google.com",
    // Cursor IDE
    ".cursor.sh",
    ".cursor.com",
    ".cursorapi.com",
    ".cursor-cdn.com",
];

/// Root configuration structure
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Config {
    /// IP address returned for spoofed A/AAAA answers
    #[serde(default = "default_spoof_ip")]
    pub spoof_ip: IpAddr,

    /// Domain suffixes to spoof (case-insensitive, leading dot optional)
    #[serde(default = "default_spoof_suffixes")]
    pub spoof_suffixes: Vec<String>,

    /// Upstream DNS servers tried in order for non-spoofed queries
    #[serde(default = "default_upstream_dns")]
    pub upstream_dns: Vec<SocketAddr>,

    /// DNS server the proxy uses to resolve backend hosts.
    ///
    /// Must point away from this process; the system resolver may well be
    /// aimed at our own port 53.
    #[serde(default = "default_resolver_dns")]
    pub resolver_dns: SocketAddr,

    /// Listen addresses for the three services
    #[serde(default)]
    pub listen: ListenConfig,

    /// Timeouts
    #[serde(default)]
    pub timeouts: TimeoutConfig,

    /// Logging configuration
    #[serde(default)]
    pub log: LogConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            spoof_ip: default_spoof_ip(),
            spoof_suffixes: default_spoof_suffixes(),
            upstream_dns: default_upstream_dns(),
            resolver_dns: default_resolver_dns(),
            listen: ListenConfig::default(),
            timeouts: TimeoutConfig::default(),
            log: LogConfig::default(),
        }
    }
}

impl Config {
    /// Validate the configuration
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::Validation` if validation fails.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.spoof_suffixes.is_empty() {
            return Err(ConfigError::validation(
                "spoof_suffixes must contain at least one suffix",
            ));
        }

        for suffix in &self.spoof_suffixes {
            let cleaned = suffix.trim().trim_start_matches('.');
            if cleaned.is_empty() {
                return Err(ConfigError::validation(format!(
                    "invalid spoof suffix: {suffix:?}"
                )));
            }
        }

        if self.upstream_dns.is_empty() {
            return Err(ConfigError::validation(
                "upstream_dns must contain at least one server",
            ));
        }

        // The resolver must not be this process's own DNS responder, or
        // every backend lookup would loop straight back into the spoof path.
        let dns = self.listen.dns_udp;
        let resolver = self.resolver_dns;
        let resolver_is_local = resolver.ip().is_loopback() || resolver.ip().is_unspecified();
        if resolver.port() == dns.port()
            && (resolver.ip() == dns.ip() || (resolver_is_local && dns.ip().is_unspecified()))
        {
            return Err(ConfigError::validation(format!(
                "resolver_dns {resolver} points at this process's own DNS responder ({dns})"
            )));
        }

        Ok(())
    }
}

/// Listen addresses for the three services
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ListenConfig {
    /// DNS responder (UDP)
    #[serde(default = "default_dns_udp")]
    pub dns_udp: SocketAddr,

    /// HTTP proxy (TCP)
    #[serde(default = "default_http_tcp")]
    pub http_tcp: SocketAddr,

    /// HTTPS proxy (TCP)
    #[serde(default = "default_https_tcp")]
    pub https_tcp: SocketAddr,

    /// QUIC sink (UDP, coerced to IPv4)
    #[serde(default = "default_quic_sink_udp")]
    pub quic_sink_udp: SocketAddr,
}

impl Default for ListenConfig {
    fn default() -> Self {
        Self {
            dns_udp: default_dns_udp(),
            http_tcp: default_http_tcp(),
            https_tcp: default_https_tcp(),
            quic_sink_udp: default_quic_sink_udp(),
        }
    }
}

/// Timeouts, in seconds
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct TimeoutConfig {
    /// Per-attempt timeout for upstream DNS forwarding
    #[serde(default = "default_timeout_secs")]
    pub upstream_secs: u64,

    /// Read deadline for the hostname peek
    #[serde(default = "default_timeout_secs")]
    pub peek_secs: u64,

    /// Timeout for backend dial and backend resolution
    #[serde(default = "default_timeout_secs")]
    pub dial_secs: u64,

    /// Graceful-shutdown drain deadline
    #[serde(default = "default_shutdown_secs")]
    pub shutdown_secs: u64,
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            upstream_secs: default_timeout_secs(),
            peek_secs: default_timeout_secs(),
            dial_secs: default_timeout_secs(),
            shutdown_secs: default_shutdown_secs(),
        }
    }
}

impl TimeoutConfig {
    /// Upstream DNS timeout as a `Duration`
    #[must_use]
    pub fn upstream(&self) -> Duration {
        Duration::from_secs(self.upstream_secs.max(1))
    }

    /// Peek timeout as a `Duration`
    #[must_use]
    pub fn peek(&self) -> Duration {
        Duration::from_secs(self.peek_secs.max(1))
    }

    /// Dial timeout as a `Duration`
    #[must_use]
    pub fn dial(&self) -> Duration {
        Duration::from_secs(self.dial_secs.max(1))
    }

    /// Shutdown drain deadline as a `Duration`
    #[must_use]
    pub fn shutdown(&self) -> Duration {
        Duration::from_secs(self.shutdown_secs.max(1))
    }
}

/// Logging configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct LogConfig {
    /// Log level filter (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub level: String,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

fn default_spoof_ip() -> IpAddr {
    IpAddr::V4(Ipv4Addr::new(95, 164, 123, 192))
}

fn default_spoof_suffixes() -> Vec<String> {
    DEFAULT_SPOOF_SUFFIXES.iter().map(ToString::to_string).collect()
}

fn default_upstream_dns() -> Vec<SocketAddr> {
    vec![
        (Ipv4Addr::new(8, 8, 8, 8), 53).into(),
        (Ipv4Addr::new(1, 1, 1, 1), 53).into(),
    ]
}

fn default_resolver_dns() -> SocketAddr {
    (Ipv4Addr::new(8, 8, 8, 8), 53).into()
}

fn default_dns_udp() -> SocketAddr {
    (Ipv4Addr::UNSPECIFIED, 53).into()
}

fn default_http_tcp() -> SocketAddr {
    (Ipv4Addr::UNSPECIFIED, 80).into()
}

fn default_https_tcp() -> SocketAddr {
    (Ipv4Addr::UNSPECIFIED, 443).into()
}

fn default_quic_sink_udp() -> SocketAddr {
    (Ipv4Addr::UNSPECIFIED, 443).into()
}

fn default_timeout_secs() -> u64 {
    5
}

fn default_shutdown_secs() -> u64 {
    10
}

fn default_log_level() -> String {
    "info".into()
}
