//! Helper functions for the ADS131M0x driver.

/// Sign-extend a 24-bit two's complement word to `i32`.
///
/// Only the low 24 bits of `raw` are looked at.
pub fn decode_24bit(raw: u32) -> i32 {
    ((raw << 8) as i32) >> 8
}

/// Build the 24-bit word from three bytes, MSB first.
pub fn ch_sample_to_raw(msb: u8, mid: u8, lsb: u8) -> i32 {
    decode_24bit(((msb as u32) << 16) | ((mid as u32) << 8) | (lsb as u32))
}

/// Inverse of [`ch_sample_to_raw`]. Values outside the 24-bit range wrap.
pub fn raw_to_ch_sample(value: i32) -> [u8; 3] {
    let raw = (value as u32) & 0x00FF_FFFF;
    [(raw >> 16) as u8, (raw >> 8) as u8, raw as u8]
}

/// Apply a read-modify-write mask: bits under `mask` are cleared before
/// `value` is OR-ed in.
pub fn apply_mask(current: u16, value: u16, mask: u16) -> u16 {
    (current & !mask) | value
}
