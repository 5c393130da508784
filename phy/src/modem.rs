//! QPSK modulation, soft demodulation and EVM measurement (TS 38.211 5.1.3)

use crate::PhyError;
use num_complex::Complex32;

/// QPSK amplitude, 1/sqrt(2) for unit symbol power
const QPSK_AMP: f32 = std::f32::consts::FRAC_1_SQRT_2;

/// Soft-demodulator output scale; unit-power symbols land around +-90
const LLR_SCALE: f32 = 128.0;

/// QPSK modulation table
#[derive(Debug, Clone)]
pub struct QpskModem {
    /// Symbol lookup indexed by the bit pair (b0 << 1) | b1
    table: [Complex32; 4],
}

impl Default for QpskModem {
    fn default() -> Self {
        Self::new()
    }
}

impl QpskModem {
    pub fn new() -> Self {
        let mut table = [Complex32::new(0.0, 0.0); 4];
        for (idx, sym) in table.iter_mut().enumerate() {
            let b0 = (idx >> 1) as f32;
            let b1 = (idx & 1) as f32;
            *sym = Complex32::new(QPSK_AMP * (1.0 - 2.0 * b0), QPSK_AMP * (1.0 - 2.0 * b1));
        }
        Self { table }
    }

    /// Modulate `2 * symbols.len()` unpacked bits into QPSK symbols
    pub fn modulate(&self, bits: &[u8], symbols: &mut [Complex32]) {
        for (pair, sym) in bits.chunks_exact(2).zip(symbols.iter_mut()) {
            let idx = usize::from((pair[0] & 1) << 1 | (pair[1] & 1));
            *sym = self.table[idx];
        }
    }

    /// Soft-demodulate QPSK symbols into signed 8-bit LLRs, two per symbol.
    /// Positive LLR means bit zero.
    pub fn demodulate_soft(&self, symbols: &[Complex32], llrs: &mut [i8]) {
        for (sym, pair) in symbols.iter().zip(llrs.chunks_exact_mut(2)) {
            pair[0] = (sym.re * LLR_SCALE).clamp(-127.0, 127.0) as i8;
            pair[1] = (sym.im * LLR_SCALE).clamp(-127.0, 127.0) as i8;
        }
    }

    /// Hard-decide a pair of LLRs back into a reference symbol
    fn hard_symbol(&self, llr0: i8, llr1: i8) -> Complex32 {
        let idx = usize::from(((llr0 < 0) as u8) << 1 | (llr1 < 0) as u8);
        self.table[idx]
    }
}

/// Scratch buffer for error-vector-magnitude measurement
#[derive(Debug, Clone)]
pub struct EvmBuffer {
    capacity: usize,
}

impl EvmBuffer {
    /// Allocate a buffer able to measure up to `capacity` LLRs
    pub fn new(capacity: usize) -> Result<Self, PhyError> {
        if capacity == 0 {
            return Err(PhyError::Allocation("EVM buffer capacity is zero".into()));
        }
        Ok(Self { capacity })
    }

    /// RMS error between `symbols` and the hard decisions of `llrs`
    /// (`nof_bits` LLRs, two per symbol)
    pub fn run(
        &self,
        modem: &QpskModem,
        symbols: &[Complex32],
        llrs: &[i8],
        nof_bits: usize,
    ) -> f32 {
        let nof_bits = nof_bits.min(self.capacity).min(llrs.len());
        let nof_symbols = nof_bits / 2;
        if nof_symbols == 0 {
            return f32::NAN;
        }

        let mut err_pow = 0.0f32;
        for i in 0..nof_symbols {
            let reference = modem.hard_symbol(llrs[2 * i], llrs[2 * i + 1]);
            err_pow += (symbols[i] - reference).norm_sqr();
        }

        (err_pow / nof_symbols as f32).sqrt()
    }
}
