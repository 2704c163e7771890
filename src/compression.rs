//! Permessage-deflate plumbing (RFC 7692).
//!
//! Two deflate ownership modes exist. The group owns one shared stream that
//! is reset before every message, equivalent to no context takeover. With
//! the sliding-window option each connection owns its stream for its whole
//! lifetime, keeping the LZ77 dictionary warm across messages. The inflater
//! is always group-owned and reset after each message so state cannot leak
//! between connections.

use flate2::{Compress, Compression, Decompress, FlushCompress, FlushDecompress};

use crate::error::{Error, Result};

/// Sync-flush tail present at the end of every deflate block; stripped on
/// send and re-appended before inflation (RFC 7692 section 7.2.2).
const DEFLATE_TRAILER: [u8; 4] = [0x00, 0x00, 0xff, 0xff];

/// Working-buffer growth step for the (in|de)flate loops.
const CHUNK: usize = 4096;

/// Guard against pathological streams that never make progress.
const MAX_ITERATIONS: usize = 100_000;

/// Raw-deflate compressor.
pub struct Deflater {
    stream: Compress,
    reset_per_message: bool,
}

impl Deflater {
    /// Group-shared compressor: state is reset before each message.
    #[must_use]
    pub fn shared() -> Self {
        Self::new(true)
    }

    /// Connection-owned compressor preserving context across messages.
    #[must_use]
    pub fn sliding_window() -> Self {
        Self::new(false)
    }

    fn new(reset_per_message: bool) -> Self {
        // Raw deflate, no zlib header, full 15-bit window.
        Self {
            stream: Compress::new(Compression::default(), false),
            reset_per_message,
        }
    }

    /// Deflate one message payload, stripping the sync-flush trailer.
    ///
    /// # Errors
    ///
    /// Returns `Error::Compression` when the stream errors or stops making
    /// progress. Fatal for the connection.
    pub fn deflate(&mut self, input: &[u8]) -> Result<Vec<u8>> {
        if self.reset_per_message {
            self.stream.reset();
        }

        let mut out = Vec::with_capacity(input.len() / 2 + CHUNK);
        let mut pos = 0;
        let mut iterations = 0;

        loop {
            iterations += 1;
            if iterations > MAX_ITERATIONS {
                return Err(Error::Compression("deflate made no progress".into()));
            }

            let used = out.len();
            out.resize(used + CHUNK, 0);

            let before_in = self.stream.total_in();
            let before_out = self.stream.total_out();

            self.stream
                .compress(&input[pos..], &mut out[used..], FlushCompress::Sync)
                .map_err(|e| Error::Compression(format!("deflate failed: {e}")))?;

            pos += (self.stream.total_in() - before_in) as usize;
            let produced = (self.stream.total_out() - before_out) as usize;
            out.truncate(used + produced);

            // Input consumed and the flush fit into the buffer we offered.
            if pos == input.len() && produced < CHUNK {
                break;
            }
        }

        if out.ends_with(&DEFLATE_TRAILER) {
            out.truncate(out.len() - DEFLATE_TRAILER.len());
        }

        Ok(out)
    }
}

/// Raw-inflate decompressor with a bounded output size.
pub struct Inflater {
    stream: Decompress,
}

impl Inflater {
    /// Create a group-level inflater.
    #[must_use]
    pub fn new() -> Self {
        Self {
            stream: Decompress::new(false),
        }
    }

    /// Inflate one message payload.
    ///
    /// The wire payload has its sync-flush trailer stripped per RFC 7692
    /// section 7.2.2, so the four tail bytes are appended here before
    /// inflation. Output beyond `max_out` aborts the operation.
    ///
    /// # Errors
    ///
    /// Returns `Error::PayloadOverLimit` when the inflated size exceeds
    /// `max_out` and `Error::Compression` for a corrupt stream. Either is
    /// fatal for the connection.
    pub fn inflate(&mut self, input: &[u8], max_out: usize) -> Result<Vec<u8>> {
        let mut chained = Vec::with_capacity(input.len() + DEFLATE_TRAILER.len());
        chained.extend_from_slice(input);
        chained.extend_from_slice(&DEFLATE_TRAILER);

        let result = self.inflate_chained(&chained, max_out);

        // One message per connection at a time shares this stream, so the
        // dictionary must not survive into the next message.
        self.stream.reset(false);

        result
    }

    fn inflate_chained(&mut self, input: &[u8], max_out: usize) -> Result<Vec<u8>> {
        let mut out = Vec::with_capacity(input.len().min(CHUNK));
        let mut pos = 0;
        let mut iterations = 0;

        loop {
            iterations += 1;
            if iterations > MAX_ITERATIONS {
                return Err(Error::Compression("inflate made no progress".into()));
            }

            let used = out.len();
            out.resize(used + CHUNK, 0);

            let before_in = self.stream.total_in();
            let before_out = self.stream.total_out();

            let status = self
                .stream
                .decompress(&input[pos..], &mut out[used..], FlushDecompress::Sync)
                .map_err(|e| Error::Compression(format!("inflate failed: {e}")))?;

            pos += (self.stream.total_in() - before_in) as usize;
            let produced = (self.stream.total_out() - before_out) as usize;
            out.truncate(used + produced);

            if out.len() > max_out {
                return Err(Error::PayloadOverLimit {
                    size: out.len(),
                    max: max_out,
                });
            }

            if status == flate2::Status::StreamEnd || (pos == input.len() && produced < CHUNK) {
                break;
            }
            if pos < input.len() && produced == 0 && (self.stream.total_in() - before_in) == 0 {
                return Err(Error::Compression("inflate stalled".into()));
            }
        }

        Ok(out)
    }
}

impl Default for Inflater {
    fn default() -> Self {
        Self::new()
    }
}
