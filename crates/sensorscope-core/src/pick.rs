//! Identifier color codec for the pick buffer.
//!
//! Each pickable object is drawn into an offscreen buffer with a solid color
//! that encodes its 32-bit identifier, one byte per 8-bit channel. Reading a
//! pixel back and decoding it recovers the identifier exactly, provided the
//! buffer is never filtered or blended (the render side guarantees both).

/// The identifier decoded from the background clear color.
///
/// The pick target is cleared with every channel at maximum intensity, so a
/// pixel nothing was drawn to decodes to this value. It is reserved: the
/// engine's object-id allocator never produces it, and callers must not
/// assign it to real objects.
pub const BACKGROUND_ID: u32 = 0xFFFF_FFFF;

/// Encodes an identifier into 4 color channel bytes.
///
/// Big-endian layout: channel 0 holds bits 24-31, channel 3 holds bits 0-7.
#[must_use]
pub fn encode_id(id: u32) -> [u8; 4] {
    [
        ((id >> 24) & 0xFF) as u8,
        ((id >> 16) & 0xFF) as u8,
        ((id >> 8) & 0xFF) as u8,
        (id & 0xFF) as u8,
    ]
}

/// Decodes 4 color channel bytes back into an identifier.
#[must_use]
pub fn decode_id(channels: [u8; 4]) -> u32 {
    (u32::from(channels[0]) << 24)
        | (u32::from(channels[1]) << 16)
        | (u32::from(channels[2]) << 8)
        | u32::from(channels[3])
}

/// Converts encoded channel bytes to normalized `[0, 1]` floats for a color
/// uniform.
#[must_use]
pub fn encode_id_normalized(id: u32) -> [f32; 4] {
    let c = encode_id(id);
    [
        f32::from(c[0]) / 255.0,
        f32::from(c[1]) / 255.0,
        f32::from(c[2]) / 255.0,
        f32::from(c[3]) / 255.0,
    ]
}

/// Scrambles an identifier for the debug overlay.
///
/// Sequentially allocated identifiers encode to nearly identical colors,
/// which makes the debug view of the pick buffer unreadable. This spreads
/// neighboring values across the color space with rotates, xors, and odd
/// multiplies on wrapping 32-bit arithmetic. Deterministic, and used only
/// for overlay colors - never for the authoritative pick result.
#[must_use]
pub fn debug_scramble(id: u32) -> u32 {
    let mut h = id;
    h ^= h.rotate_left(13);
    h = h.wrapping_mul(0x9E37_79B1);
    h ^= h.rotate_right(17);
    h = h.wrapping_mul(0x85EB_CA77);
    h ^= h >> 16;
    h
}
