//! Common Utilities
//!
//! Bit-level helpers shared by the channel-coding chain and the test
//! harness. The PHY works on unpacked bit arrays (one bit per byte,
//! MSB-first ordering throughout).

use bytes::{BufMut, Bytes, BytesMut};
use tracing::trace;

/// Convert a byte slice to hex string for debugging
pub fn bytes_to_hex(data: &[u8]) -> String {
    data.iter()
        .map(|b| format!("{:02x}", b))
        .collect::<Vec<_>>()
        .join(" ")
}

/// Unpack the `bits.len()` least significant bits of `value`, MSB first
pub fn bit_unpack(value: u32, bits: &mut [u8]) {
    let nof_bits = bits.len();
    for (i, bit) in bits.iter_mut().enumerate() {
        *bit = ((value >> (nof_bits - 1 - i)) & 1) as u8;
    }
}

/// Pack an unpacked bit array into an integer, MSB first
pub fn bit_pack(bits: &[u8]) -> u32 {
    bits.iter().fold(0u32, |acc, &b| (acc << 1) | u32::from(b & 1))
}

/// Pack an unpacked bit array into bytes (MSB first, zero-padded tail)
pub fn pack_bits(bits: &[u8]) -> Bytes {
    let mut bytes = BytesMut::with_capacity(bits.len().div_ceil(8));

    for chunk in bits.chunks(8) {
        let mut byte = 0u8;
        for (i, &bit) in chunk.iter().enumerate() {
            if bit & 1 == 1 {
                byte |= 1 << (7 - i);
            }
        }
        bytes.put_u8(byte);
    }

    trace!("Packed {} bits into {} bytes", bits.len(), bytes.len());
    bytes.freeze()
}

/// Time utilities for slot/symbol calculations
pub mod time {
    /// Number of slots per 10 ms frame for subcarrier spacing exponent mu
    pub fn slots_per_frame(numerology: u8) -> u32 {
        10u32 << numerology
    }

    /// Average OFDM symbol duration in seconds, cyclic prefix included
    pub fn symbol_duration_s(numerology: u8) -> f64 {
        let scs = 15_000.0 * f64::from(1u32 << numerology);
        (2048.0 + 144.0) / (2048.0 * scs)
    }
}
