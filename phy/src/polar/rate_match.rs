//! Polar rate matching (TS 38.212 5.4.1)
//!
//! Downlink control: sub-block interleaving followed by repetition,
//! puncturing or shortening. No channel interleaving (I_BIL = 0).

use super::{subblock_index, PolarCode};

/// Transmit-side rate matcher with its interleaver scratch
#[derive(Debug, Clone)]
pub struct RateMatcherTx {
    y: Vec<u8>,
}

impl RateMatcherTx {
    pub fn new(nmax_log: usize) -> Self {
        Self {
            y: vec![0u8; 1 << nmax_log],
        }
    }

    /// Map the `code.n` coded bits `d[..n]` onto `f[..e]`
    pub fn apply(&mut self, code: &PolarCode, d: &[u8], f: &mut [u8]) {
        let n = code.n;
        let e = code.e;
        let y = &mut self.y[..n];

        // Sub-block interleaving
        for (m, out) in y.iter_mut().enumerate() {
            *out = d[subblock_index(m, n)];
        }

        if e >= n {
            // Repetition
            for (k, out) in f[..e].iter_mut().enumerate() {
                *out = y[k % n];
            }
        } else if 16 * code.k <= 7 * e {
            // Puncturing drops the head
            f[..e].copy_from_slice(&y[n - e..]);
        } else {
            // Shortening drops the tail
            f[..e].copy_from_slice(&y[..e]);
        }
    }
}

/// Receive-side rate dematcher operating on signed 8-bit LLRs
#[derive(Debug, Clone)]
pub struct RateMatcherRx {
    y: Vec<i8>,
}

impl RateMatcherRx {
    pub fn new(nmax_log: usize) -> Self {
        Self {
            y: vec![0i8; 1 << nmax_log],
        }
    }

    /// Reassemble `code.n` coded-bit LLRs `d[..n]` from the `code.e`
    /// received LLRs `f[..e]`
    pub fn apply(&mut self, code: &PolarCode, f: &[i8], d: &mut [i8]) {
        let n = code.n;
        let e = code.e;
        let punctured = e < n && 16 * code.k <= 7 * e;
        let y = &mut self.y[..n];

        // Punctured bits carry no information (zero LLR); shortened bits
        // are known zeros (saturated positive LLR)
        y.fill(0);
        if e < n && !punctured {
            y[e..].fill(i8::MAX);
        }

        for (k, &llr) in f[..e].iter().enumerate() {
            let m = if e >= n {
                k % n
            } else if punctured {
                k + n - e
            } else {
                k
            };
            y[m] = y[m].saturating_add(llr);
        }

        // Sub-block deinterleaving
        for (m, &llr) in y.iter().enumerate() {
            d[subblock_index(m, n)] = llr;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::polar::NMAX_LOG;

    fn roundtrip_hard(k: usize, e: usize) {
        let code = PolarCode::get(k, e, NMAX_LOG).unwrap();
        let n = code.n;
        let d: Vec<u8> = (0..n).map(|i| ((i * 7 + 1) % 3 == 0) as u8).collect();

        let mut f = vec![0u8; e];
        RateMatcherTx::new(NMAX_LOG).apply(&code, &d, &mut f);

        // Map hard bits to strong LLRs and invert
        let llr_f: Vec<i8> = f.iter().map(|&b| if b == 1 { -64 } else { 64 }).collect();
        let mut llr_d = vec![0i8; n];
        RateMatcherRx::new(NMAX_LOG).apply(&code, &llr_f, &mut llr_d);

        // Coded positions that were actually transmitted
        let mut carried = vec![false; n];
        if e >= n {
            carried.fill(true);
        } else if 16 * k <= 7 * e {
            for m in (n - e)..n {
                carried[subblock_index(m, n)] = true;
            }
        } else {
            for m in 0..e {
                carried[subblock_index(m, n)] = true;
            }
        }

        for i in 0..n {
            if carried[i] {
                assert_eq!(
                    d[i],
                    (llr_d[i] < 0) as u8,
                    "coded bit {} disagrees after dematching",
                    i
                );
            }
        }
    }

    #[test]
    fn test_repetition_roundtrip() {
        roundtrip_hard(164, 1728);
    }

    #[test]
    fn test_puncture_roundtrip() {
        roundtrip_hard(36, 108);
    }

    #[test]
    fn test_shorten_roundtrip() {
        roundtrip_hard(80, 108);
    }

    #[test]
    fn test_shortened_positions_saturated() {
        // K/E > 7/16 engages shortening
        let code = PolarCode::get(80, 108, NMAX_LOG).unwrap();
        assert!(code.e < code.n);

        let f = vec![0i8; code.e];
        let mut d = vec![0i8; code.n];
        RateMatcherRx::new(NMAX_LOG).apply(&code, &f, &mut d);

        for m in code.e..code.n {
            assert_eq!(d[subblock_index(m, code.n)], i8::MAX);
        }
    }
}
