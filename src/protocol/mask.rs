//! Payload masking (RFC 6455 section 5.3).

/// Scalar byte-by-byte XOR masking.
#[inline]
pub fn apply_mask(data: &mut [u8], mask: [u8; 4]) {
    for (i, byte) in data.iter_mut().enumerate() {
        *byte ^= mask[i % 4];
    }
}

/// XOR masking processing 4 bytes at a time using u32 operations.
///
/// Falls through to the scalar loop for the tail.
#[inline]
pub fn apply_mask_fast(data: &mut [u8], mask: [u8; 4]) {
    let mask_u32 = u32::from_ne_bytes(mask);
    let mut chunks = data.chunks_exact_mut(4);
    for chunk in &mut chunks {
        let val = u32::from_ne_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]);
        chunk.copy_from_slice(&(val ^ mask_u32).to_ne_bytes());
    }
    for (i, byte) in chunks.into_remainder().iter_mut().enumerate() {
        *byte ^= mask[i % 4];
    }
}

/// Masking that resumes mid-payload.
///
/// `offset` is the number of payload bytes already masked for this frame, so
/// a frame delivered in several read chunks unmasks to the same result as a
/// single pass.
#[inline]
pub fn apply_mask_offset(data: &mut [u8], mask: [u8; 4], offset: usize) {
    let rotation = offset % 4;
    let rotated = [
        mask[rotation],
        mask[(rotation + 1) % 4],
        mask[(rotation + 2) % 4],
        mask[(rotation + 3) % 4],
    ];
    apply_mask_fast(data, rotated);
}
