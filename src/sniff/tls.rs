//! TLS SNI (Server Name Indication) peeking
//!
//! Reads exactly one TLS handshake record from the client stream and scans
//! the `ClientHello` for the `server_name` extension. The record is parsed
//! by hand (record layer → handshake header → extension walk); no TLS
//! library is involved and no server response is ever produced, so the peek
//! has no cryptographic side effects.
//!
//! ## TLS record format
//!
//! ```text
//! ContentType (1 byte) = 0x16 (Handshake)
//! ProtocolVersion (2 bytes)
//! Length (2 bytes)
//! Fragment (variable)
//! ```
//!
//! ## `ClientHello` format (simplified)
//!
//! ```text
//! HandshakeType (1 byte) = 0x01
//! Length (3 bytes)
//! ProtocolVersion (2 bytes)
//! Random (32 bytes)
//! SessionID (1 byte length + variable)
//! CipherSuites (2 bytes length + variable)
//! CompressionMethods (1 byte length + variable)
//! Extensions (2 bytes length + variable)
//! ```

use tokio::io::{AsyncRead, AsyncReadExt};
use tracing::trace;

use super::{is_valid_hostname, SniffError};

/// TLS `ContentType` for Handshake
const TLS_CONTENT_TYPE_HANDSHAKE: u8 = 0x16;

/// TLS `HandshakeType` for `ClientHello`
const TLS_HANDSHAKE_TYPE_CLIENT_HELLO: u8 = 0x01;

/// TLS record header size
const TLS_RECORD_HEADER_SIZE: usize = 5;

/// RFC 5246 cap on a single TLS record fragment
const MAX_TLS_RECORD_SIZE: usize = 16384;

/// SNI extension type
const TLS_EXTENSION_TYPE_SNI: u16 = 0x0000;

/// SNI name type for hostname
const TLS_SNI_NAME_TYPE_HOSTNAME: u8 = 0x00;

/// Minimum `ClientHello` size (header + version + random)
const MIN_CLIENT_HELLO_SIZE: usize = 38;

/// Read one TLS record from `stream` and extract the SNI hostname.
///
/// Returns the hostname together with every byte consumed, in order, for
/// replay to the backend.
///
/// # Errors
///
/// Fails if the stream does not carry a TLS handshake record, the record
/// does not parse as a `ClientHello`, or no `server_name` is present.
pub async fn peek_client_hello<R>(stream: &mut R) -> Result<(String, Vec<u8>), SniffError>
where
    R: AsyncRead + Unpin,
{
    let mut peeked = vec![0u8; TLS_RECORD_HEADER_SIZE];
    stream.read_exact(&mut peeked).await?;

    if peeked[0] != TLS_CONTENT_TYPE_HANDSHAKE {
        return Err(SniffError::NotTls("content type is not Handshake"));
    }

    let version = u16::from_be_bytes([peeked[1], peeked[2]]);
    if !(0x0301..=0x0304).contains(&version) {
        return Err(SniffError::NotTls("unrecognized record-layer version"));
    }

    let record_length = u16::from_be_bytes([peeked[3], peeked[4]]) as usize;
    if record_length == 0 || record_length > MAX_TLS_RECORD_SIZE {
        return Err(SniffError::NotTls("record length out of range"));
    }

    peeked.resize(TLS_RECORD_HEADER_SIZE + record_length, 0);
    stream
        .read_exact(&mut peeked[TLS_RECORD_HEADER_SIZE..])
        .await?;

    let sni = parse_sni(&peeked)?;
    Ok((sni, peeked))
}

/// Parse a complete TLS record and extract the SNI hostname.
///
/// # Errors
///
/// Fails on anything other than a `ClientHello` carrying a valid
/// `server_name` extension.
pub fn parse_sni(data: &[u8]) -> Result<String, SniffError> {
    if data.len() < TLS_RECORD_HEADER_SIZE + 1 {
        return Err(SniffError::MalformedClientHello("record too short"));
    }

    let handshake = &data[TLS_RECORD_HEADER_SIZE..];

    if handshake[0] != TLS_HANDSHAKE_TYPE_CLIENT_HELLO {
        return Err(SniffError::MalformedClientHello("not a ClientHello"));
    }

    if handshake.len() < MIN_CLIENT_HELLO_SIZE {
        return Err(SniffError::MalformedClientHello("ClientHello too short"));
    }

    // Skip: type (1) + length (3) + version (2) + random (32)
    let mut pos: usize = MIN_CLIENT_HELLO_SIZE;

    // Session ID
    if pos >= handshake.len() {
        return Err(SniffError::MalformedClientHello("truncated at session ID"));
    }
    let session_id_len = handshake[pos] as usize;
    pos += 1 + session_id_len;

    // Cipher suites
    if pos + 2 > handshake.len() {
        return Err(SniffError::MalformedClientHello(
            "truncated at cipher suites",
        ));
    }
    let cipher_suites_len = u16::from_be_bytes([handshake[pos], handshake[pos + 1]]) as usize;
    pos += 2 + cipher_suites_len;

    // Compression methods
    if pos >= handshake.len() {
        return Err(SniffError::MalformedClientHello(
            "truncated at compression methods",
        ));
    }
    let compression_len = handshake[pos] as usize;
    pos += 1 + compression_len;

    // Extensions
    if pos + 2 > handshake.len() {
        trace!("ClientHello carries no extensions");
        return Err(SniffError::NoServerName);
    }
    let extensions_len = u16::from_be_bytes([handshake[pos], handshake[pos + 1]]) as usize;
    pos += 2;

    let extensions_end = pos + extensions_len;

    while pos + 4 <= handshake.len() && pos < extensions_end {
        let ext_type = u16::from_be_bytes([handshake[pos], handshake[pos + 1]]);
        let ext_len = u16::from_be_bytes([handshake[pos + 2], handshake[pos + 3]]) as usize;
        pos += 4;

        if pos + ext_len > handshake.len() {
            return Err(SniffError::MalformedClientHello(
                "extension exceeds record",
            ));
        }

        if ext_type == TLS_EXTENSION_TYPE_SNI {
            if let Some(sni) = parse_sni_extension(&handshake[pos..pos + ext_len]) {
                trace!("found SNI: {}", sni);
                return Ok(sni);
            }
        }

        pos += ext_len;
    }

    Err(SniffError::NoServerName)
}

/// Parse SNI extension data to extract the hostname
fn parse_sni_extension(data: &[u8]) -> Option<String> {
    if data.len() < 5 {
        return None;
    }

    // Server name list length (2 bytes)
    let list_len = u16::from_be_bytes([data[0], data[1]]) as usize;
    if list_len + 2 > data.len() {
        return None;
    }

    let mut pos: usize = 2;
    let end = 2 + list_len;

    while pos + 3 <= end && pos + 3 <= data.len() {
        let name_type = data[pos];
        let name_len = u16::from_be_bytes([data[pos + 1], data[pos + 2]]) as usize;
        pos += 3;

        if pos + name_len > data.len() {
            return None;
        }

        if name_type == TLS_SNI_NAME_TYPE_HOSTNAME {
            if let Ok(hostname) = std::str::from_utf8(&data[pos..pos + name_len]) {
                if is_valid_hostname(hostname) {
                    return Some(hostname.to_string());
                }
            }
        }

        pos += name_len;
    }

    None
}
