//! UTF-8 validation for WebSocket text messages (RFC 6455).
//!
//! Text payloads are validated once fully assembled, right before delivery,
//! so a simple one-shot check is enough.

/// Check that `data` is valid UTF-8.
#[inline]
#[must_use]
pub fn is_valid_utf8(data: &[u8]) -> bool {
    std::str::from_utf8(data).is_ok()
}
