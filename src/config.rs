//! Group configuration: payload limits, extension selection, server identity.

use crate::error::{Error, Result};

/// Default maximum payload size per message, pre- and post-inflation.
pub const DEFAULT_MAX_PAYLOAD: usize = 16 * 1024 * 1024;

/// Extension selection bits for a group.
///
/// Combines with `|`. `SLIDING_DEFLATE_WINDOW` implies `PERMESSAGE_DEFLATE`
/// and is rejected without it at group construction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ExtensionOptions(u8);

impl ExtensionOptions {
    /// No extensions.
    pub const NONE: ExtensionOptions = ExtensionOptions(0);
    /// Negotiate permessage-deflate; compression state shared at group level.
    pub const PERMESSAGE_DEFLATE: ExtensionOptions = ExtensionOptions(1);
    /// Give each connection its own deflate stream, preserving the LZ77
    /// dictionary across messages.
    pub const SLIDING_DEFLATE_WINDOW: ExtensionOptions = ExtensionOptions(2);
    /// Allow this group to receive transferred connections.
    pub const TRANSFERS: ExtensionOptions = ExtensionOptions(4);

    /// Check whether all bits of `other` are set.
    #[inline]
    #[must_use]
    pub const fn contains(self, other: ExtensionOptions) -> bool {
        self.0 & other.0 == other.0
    }

    /// Check whether no bits are set.
    #[inline]
    #[must_use]
    pub const fn is_empty(self) -> bool {
        self.0 == 0
    }
}

impl std::ops::BitOr for ExtensionOptions {
    type Output = ExtensionOptions;

    fn bitor(self, rhs: ExtensionOptions) -> ExtensionOptions {
        ExtensionOptions(self.0 | rhs.0)
    }
}

impl std::ops::BitOrAssign for ExtensionOptions {
    fn bitor_assign(&mut self, rhs: ExtensionOptions) {
        self.0 |= rhs.0;
    }
}

/// Configuration accepted by a group at construction.
#[derive(Debug, Clone)]
pub struct GroupOptions {
    /// Maximum message payload in bytes. Bounds the declared frame length,
    /// the fragment buffer, and the inflater output.
    pub max_payload: usize,

    /// Extension selection for connections accepted into this group.
    pub extensions: ExtensionOptions,

    /// Value of the `WebSocket-Server` header in upgrade responses.
    pub server_identity: String,

    /// Accept unmasked frames at a server connection.
    ///
    /// RFC 6455 requires clients to mask all frames. Setting this to `true`
    /// violates the spec but may be useful for testing or trusted proxies.
    pub accept_unmasked_frames: bool,
}

impl Default for GroupOptions {
    fn default() -> Self {
        Self {
            max_payload: DEFAULT_MAX_PAYLOAD,
            extensions: ExtensionOptions::NONE,
            server_identity: "wsgrid".to_string(),
            accept_unmasked_frames: false,
        }
    }
}

impl GroupOptions {
    /// Create options with defaults.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the maximum message payload (builder pattern).
    #[must_use]
    pub fn max_payload(mut self, bytes: usize) -> Self {
        self.max_payload = bytes;
        self
    }

    /// Set the extension selection (builder pattern).
    #[must_use]
    pub fn extensions(mut self, extensions: ExtensionOptions) -> Self {
        self.extensions = extensions;
        self
    }

    /// Set the server identity header value (builder pattern).
    #[must_use]
    pub fn server_identity(mut self, identity: impl Into<String>) -> Self {
        self.server_identity = identity.into();
        self
    }

    /// Accept unmasked inbound frames at server connections (builder pattern).
    #[must_use]
    pub fn accept_unmasked_frames(mut self, accept: bool) -> Self {
        self.accept_unmasked_frames = accept;
        self
    }

    /// Validate internal consistency.
    ///
    /// # Errors
    ///
    /// Returns `Error::InvalidConfig` if the sliding deflate window is
    /// requested without permessage-deflate, or `max_payload` is zero.
    pub fn validate(&self) -> Result<()> {
        if self.extensions.contains(ExtensionOptions::SLIDING_DEFLATE_WINDOW)
            && !self.extensions.contains(ExtensionOptions::PERMESSAGE_DEFLATE)
        {
            return Err(Error::InvalidConfig(
                "SLIDING_DEFLATE_WINDOW requires PERMESSAGE_DEFLATE".into(),
            ));
        }
        if self.max_payload == 0 {
            return Err(Error::InvalidConfig("max_payload must be non-zero".into()));
        }
        Ok(())
    }

    /// Whether permessage-deflate is negotiated for this group.
    #[inline]
    #[must_use]
    pub fn deflate_enabled(&self) -> bool {
        self.extensions.contains(ExtensionOptions::PERMESSAGE_DEFLATE)
    }

    /// Whether connections get a per-connection deflate stream.
    #[inline]
    #[must_use]
    pub fn sliding_window(&self) -> bool {
        self.extensions.contains(ExtensionOptions::SLIDING_DEFLATE_WINDOW)
    }
}
