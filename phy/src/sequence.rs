//! Pseudo-random sequence generation (TS 38.211 5.2.1)
//!
//! Length-31 gold sequence used for PDCCH bit scrambling, LLR descrambling
//! and DM-RS pilot generation.

use num_complex::Complex32;

/// Gold sequence fast-forward before the first output bit
const NC: usize = 1600;

/// Length-31 gold sequence generator
#[derive(Debug, Clone)]
pub struct GoldSequence {
    /// First m-sequence state, bit k holds x1(n + k)
    x1: u32,
    /// Second m-sequence state, bit k holds x2(n + k)
    x2: u32,
}

impl GoldSequence {
    /// Create a generator for the given 31-bit initialisation value and
    /// advance it past the Nc = 1600 warm-up
    pub fn new(c_init: u32) -> Self {
        // x1(0) = 1, x1(n) = 0 for n = 1..31; x2 is seeded with c_init
        let mut seq = Self {
            x1: 1,
            x2: c_init & 0x7FFF_FFFF,
        };

        for _ in 0..NC {
            seq.advance();
        }

        seq
    }

    /// Advance both LFSRs by one step
    fn advance(&mut self) {
        // x1(n+31) = (x1(n+3) + x1(n)) mod 2
        let x1_new = ((self.x1 >> 3) ^ self.x1) & 1;
        self.x1 = ((self.x1 >> 1) | (x1_new << 30)) & 0x7FFF_FFFF;

        // x2(n+31) = (x2(n+3) + x2(n+2) + x2(n+1) + x2(n)) mod 2
        let x2_new = ((self.x2 >> 3) ^ (self.x2 >> 2) ^ (self.x2 >> 1) ^ self.x2) & 1;
        self.x2 = ((self.x2 >> 1) | (x2_new << 30)) & 0x7FFF_FFFF;
    }

    /// Next bit c(n) of the sequence
    pub fn next_bit(&mut self) -> u8 {
        let c = ((self.x1 ^ self.x2) & 1) as u8;
        self.advance();
        c
    }

    /// Skip `nof_bits` outputs
    pub fn skip(&mut self, nof_bits: usize) {
        for _ in 0..nof_bits {
            self.advance();
        }
    }

    /// Next QPSK symbol (1 - 2*c(2n), 1 - 2*c(2n+1)) scaled by `amplitude`
    pub fn next_qpsk(&mut self, amplitude: f32) -> Complex32 {
        let c0 = self.next_bit();
        let c1 = self.next_bit();

        Complex32::new(
            amplitude * (1.0 - 2.0 * f32::from(c0)),
            amplitude * (1.0 - 2.0 * f32::from(c1)),
        )
    }
}

/// XOR the sequence for `c_init` onto an unpacked bit stream in place
pub fn apply_bit(bits: &mut [u8], c_init: u32) {
    let mut seq = GoldSequence::new(c_init);
    for b in bits.iter_mut() {
        *b ^= seq.next_bit();
    }
}

/// Descramble a stream of signed LLRs in place, flipping the sign wherever
/// the sequence bit is one
pub fn apply_llr(llrs: &mut [i8], c_init: u32) {
    let mut seq = GoldSequence::new(c_init);
    for llr in llrs.iter_mut() {
        if seq.next_bit() == 1 {
            *llr = llr.saturating_neg();
        }
    }
}
