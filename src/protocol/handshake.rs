//! Server side of the opening handshake (RFC 6455).
//!
//! The HTTP parsing that produces a validated `Sec-WebSocket-Key` lives in
//! the embedder; this module turns that key into the 101 Switching Protocols
//! response.

use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use sha1::{Digest, Sha1};

use crate::error::{Error, Result};

/// The GUID appended to the client key before hashing (RFC 6455 section 1.3).
pub const WS_GUID: &str = "258EAFA5-E914-47DA-95CA-C5AB0DC85B11";

/// Headers longer than this are dropped from the response rather than split.
const MAX_NEGOTIATED_HEADER: usize = 200;

/// Computes the `Sec-WebSocket-Accept` value from the client's
/// `Sec-WebSocket-Key`.
///
/// The accept key is Base64(SHA-1(key + GUID)): 28 ASCII characters
/// including one `=` pad.
///
/// # Example
///
/// ```
/// use wsgrid::protocol::handshake::compute_accept_key;
///
/// let accept = compute_accept_key("dGhlIHNhbXBsZSBub25jZQ==");
/// assert_eq!(accept, "s3pPLMBiTxaQ9kYGzzhZRbK+xOo=");
/// ```
#[must_use]
pub fn compute_accept_key(key: &str) -> String {
    let mut hasher = Sha1::new();
    hasher.update(key.as_bytes());
    hasher.update(WS_GUID.as_bytes());
    BASE64.encode(hasher.finalize())
}

/// Assemble the 101 Switching Protocols response into `buf`.
///
/// `extensions` is the already negotiated extension string (possibly empty).
/// If the client offered a comma-separated subprotocol list, the first token
/// is selected. Either header is omitted when empty or implausibly long.
///
/// # Errors
///
/// Returns `Error::InvalidHandshake` if the key is not the 24-byte base64
/// form a compliant client sends.
pub fn build_upgrade_response(
    buf: &mut Vec<u8>,
    sec_key: &str,
    extensions: &str,
    subprotocol: &str,
    server_identity: &str,
) -> Result<()> {
    if sec_key.len() != 24 {
        return Err(Error::InvalidHandshake(format!(
            "Sec-WebSocket-Key must be 24 bytes, got {}",
            sec_key.len()
        )));
    }

    buf.extend_from_slice(b"HTTP/1.1 101 Switching Protocols\r\n");
    buf.extend_from_slice(b"Upgrade: websocket\r\n");
    buf.extend_from_slice(b"Connection: Upgrade\r\n");
    buf.extend_from_slice(b"Sec-WebSocket-Accept: ");
    buf.extend_from_slice(compute_accept_key(sec_key).as_bytes());
    buf.extend_from_slice(b"\r\n");

    if !extensions.is_empty() && extensions.len() < MAX_NEGOTIATED_HEADER {
        buf.extend_from_slice(b"Sec-WebSocket-Extensions: ");
        buf.extend_from_slice(extensions.as_bytes());
        buf.extend_from_slice(b"\r\n");
    }

    let selected = subprotocol.split(',').next().unwrap_or("").trim();
    if !selected.is_empty() && selected.len() < MAX_NEGOTIATED_HEADER {
        buf.extend_from_slice(b"Sec-WebSocket-Protocol: ");
        buf.extend_from_slice(selected.as_bytes());
        buf.extend_from_slice(b"\r\n");
    }

    buf.extend_from_slice(b"Sec-WebSocket-Version: 13\r\n");
    buf.extend_from_slice(b"WebSocket-Server: ");
    buf.extend_from_slice(server_identity.as_bytes());
    buf.extend_from_slice(b"\r\n\r\n");

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE_KEY: &str = "dGhlIHNhbXBsZSBub25jZQ==";

    fn response_text(extensions: &str, subprotocol: &str) -> String {
        let mut buf = Vec::new();
        build_upgrade_response(&mut buf, SAMPLE_KEY, extensions, subprotocol, "wsgrid").unwrap();
        String::from_utf8(buf).unwrap()
    }

    #[test]
    fn test_accept_key_rfc_vector() {
        assert_eq!(
            compute_accept_key(SAMPLE_KEY),
            "s3pPLMBiTxaQ9kYGzzhZRbK+xOo="
        );
    }

    #[test]
    fn test_accept_key_length() {
        assert_eq!(compute_accept_key("AAAAAAAAAAAAAAAAAAAAAA==").len(), 28);
    }

    #[test]
    fn test_response_basic_shape() {
        let text = response_text("", "");
        assert!(text.starts_with("HTTP/1.1 101 Switching Protocols\r\n"));
        assert!(text.contains("Upgrade: websocket\r\n"));
        assert!(text.contains("Connection: Upgrade\r\n"));
        assert!(text.contains("Sec-WebSocket-Accept: s3pPLMBiTxaQ9kYGzzhZRbK+xOo=\r\n"));
        assert!(text.contains("Sec-WebSocket-Version: 13\r\n"));
        assert!(text.contains("WebSocket-Server: wsgrid\r\n"));
        assert!(text.ends_with("\r\n\r\n"));
        assert!(!text.contains("Sec-WebSocket-Extensions"));
        assert!(!text.contains("Sec-WebSocket-Protocol"));
    }

    #[test]
    fn test_response_with_extensions() {
        let text = response_text("permessage-deflate", "");
        assert!(text.contains("Sec-WebSocket-Extensions: permessage-deflate\r\n"));
    }

    #[test]
    fn test_response_selects_first_subprotocol() {
        let text = response_text("", "graphql-ws, chat, superchat");
        assert!(text.contains("Sec-WebSocket-Protocol: graphql-ws\r\n"));
        assert!(!text.contains("superchat"));
    }

    #[test]
    fn test_oversize_negotiated_headers_omitted() {
        let long = "x".repeat(300);
        let text = response_text(&long, &long);
        assert!(!text.contains("Sec-WebSocket-Extensions"));
        assert!(!text.contains("Sec-WebSocket-Protocol"));
    }

    #[test]
    fn test_bad_key_length_rejected() {
        let mut buf = Vec::new();
        let result = build_upgrade_response(&mut buf, "short", "", "", "wsgrid");
        assert!(matches!(result, Err(Error::InvalidHandshake(_))));
    }

    #[test]
    fn test_server_identity_is_configurable() {
        let mut buf = Vec::new();
        build_upgrade_response(&mut buf, SAMPLE_KEY, "", "", "edge-lb-7").unwrap();
        let text = String::from_utf8(buf).unwrap();
        assert!(text.contains("WebSocket-Server: edge-lb-7\r\n"));
    }
}
