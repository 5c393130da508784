//! Polar coding for the NR control channels
//!
//! Code construction per 3GPP TS 38.212 Section 5.3.1, rate matching per
//! Section 5.4.1, specialised to downlink control information: CRC-aided,
//! no parity-check bits, no channel interleaving.

pub mod decoder;
pub mod encoder;
pub mod rate_match;

pub use decoder::PolarDecoder;
pub use encoder::PolarEncoder;
pub use rate_match::{RateMatcherRx, RateMatcherTx};

use crate::PhyError;

/// Maximum code length exponent for downlink control (N <= 512)
pub const NMAX_LOG: usize = 9;

/// Minimum code length exponent
const NMIN_LOG: usize = 5;

/// Minimum and maximum payload size including CRC (TS 38.212 7.3.3)
const K_MIN: usize = 36;
const K_MAX: usize = 164;

/// Sub-block interleaver pattern (TS 38.212 Table 5.4.1.1-1)
const SUBBLOCK_PATTERN: [usize; 32] = [
    0, 1, 2, 4, 3, 5, 6, 7, 8, 16, 9, 17, 10, 18, 11, 19, 12, 20, 13, 21, 14, 22, 15, 23, 24, 25,
    26, 28, 27, 29, 30, 31,
];

/// Sub-block interleaved position of bit `m` in a length-`n` block
pub(crate) fn subblock_index(m: usize, n: usize) -> usize {
    SUBBLOCK_PATTERN[(32 * m) / n] * (n / 32) + m % (n / 32)
}

/// Polar code descriptor for one (K, E) combination
#[derive(Debug, Clone)]
pub struct PolarCode {
    /// Code length exponent
    pub n_log: usize,
    /// Code length N = 2^n_log
    pub n: usize,
    /// Number of information bits (payload plus CRC)
    pub k: usize,
    /// Number of rate-matched bits
    pub e: usize,
    /// Frozen-bit indices, ascending
    pub frozen_set: Vec<u16>,
    /// Information-bit indices, ascending
    pub info_set: Vec<u16>,
}

impl PolarCode {
    /// Build the descriptor for `k` information bits rate-matched to `e`
    /// bits, with code length capped at `2^nmax_log`
    pub fn get(k: usize, e: usize, nmax_log: usize) -> Result<Self, PhyError> {
        if !(K_MIN..=K_MAX).contains(&k) {
            return Err(PhyError::UpstreamPrimitive(format!(
                "polar code K={} outside [{}, {}]",
                k, K_MIN, K_MAX
            )));
        }
        if e <= k {
            return Err(PhyError::UpstreamPrimitive(format!(
                "polar code E={} must exceed K={}",
                e, k
            )));
        }
        if nmax_log > NMAX_LOG {
            return Err(PhyError::UpstreamPrimitive(format!(
                "polar code nmax_log={} above limit {}",
                nmax_log, NMAX_LOG
            )));
        }

        let n_log = Self::compute_n_log(k, e, nmax_log);
        let n = 1usize << n_log;

        // Rate-matching pre-frozen positions (TS 38.212 5.3.1.2)
        let mut frozen = vec![false; n];
        if e < n {
            if 16 * k <= 7 * e {
                // Puncturing: the first N - E interleaved positions carry no
                // coded bit, plus a head range of unreliable inputs
                let mut punctured = vec![false; n];
                for m in 0..(n - e) {
                    punctured[subblock_index(m, n)] = true;
                    frozen[subblock_index(m, n)] = true;
                }
                // Inputs the punctured pattern leaves undetermined must be
                // frozen as well
                for (f, erased) in frozen.iter_mut().zip(erased_inputs(&punctured)) {
                    *f |= erased;
                }
                let head = if 4 * e >= 3 * n {
                    (3 * n).saturating_sub(2 * e).div_ceil(4)
                } else {
                    (9 * n).saturating_sub(4 * e).div_ceil(16)
                };
                for f in frozen.iter_mut().take(head) {
                    *f = true;
                }
            } else {
                // Shortening: the last N - E interleaved positions carry
                // known zeros. A shortened coded bit x_j sums the inputs
                // whose index is a bitmask superset of j, so the whole
                // superset closure must stay frozen for x_j to be zero.
                for m in e..n {
                    frozen[subblock_index(m, n)] = true;
                }
                for bit in 0..n_log {
                    for i in 0..n {
                        if i & (1 << bit) != 0 {
                            frozen[i] |= frozen[i ^ (1 << bit)];
                        }
                    }
                }
            }
        }

        // Information set: the K most reliable positions left over
        let order = reliability_order(n);
        let mut info_set: Vec<u16> = Vec::with_capacity(k);
        for &i in order.iter().rev() {
            if !frozen[usize::from(i)] {
                info_set.push(i);
                if info_set.len() == k {
                    break;
                }
            }
        }
        if info_set.len() < k {
            return Err(PhyError::UpstreamPrimitive(format!(
                "polar code cannot place K={} information bits with E={} N={}",
                k, e, n
            )));
        }
        info_set.sort_unstable();

        let mut is_info = vec![false; n];
        for &i in &info_set {
            is_info[usize::from(i)] = true;
        }
        let frozen_set: Vec<u16> = (0..n as u16).filter(|&i| !is_info[usize::from(i)]).collect();

        Ok(Self {
            n_log,
            n,
            k,
            e,
            frozen_set,
            info_set,
        })
    }

    /// Code length selection (TS 38.212 5.3.1.2)
    fn compute_n_log(k: usize, e: usize, nmax_log: usize) -> usize {
        let e_log = (usize::BITS - (e - 1).leading_zeros()) as usize;

        let n1 = if e <= (9 * (1usize << (e_log - 1))) / 8 && 16 * k < 9 * e {
            e_log - 1
        } else {
            e_log
        };

        // Minimum rate 1/8
        let min_n2 = 8 * k;
        let n2 = (usize::BITS - (min_n2 - 1).leading_zeros()) as usize;

        n1.min(n2).min(nmax_log).max(NMIN_LOG)
    }
}

/// Input positions that cannot be resolved by successive cancellation when
/// the coded positions marked in `coded` carry no observation. Upper-half
/// inputs combine through check nodes (either side missing erases them),
/// lower-half inputs keep two observations (both must be missing).
fn erased_inputs(coded: &[bool]) -> Vec<bool> {
    let n = coded.len();
    if n == 1 {
        return coded.to_vec();
    }

    let half = n / 2;
    let upper: Vec<bool> = (0..half).map(|j| coded[j] || coded[j + half]).collect();
    let lower: Vec<bool> = (0..half).map(|j| coded[j] && coded[j + half]).collect();

    let mut out = erased_inputs(&upper);
    out.extend(erased_inputs(&lower));
    out
}

/// Input positions of a length-`n` polar code ordered from least to most
/// reliable, using the polarisation-weight beta-expansion
fn reliability_order(n: usize) -> Vec<u16> {
    let beta = 2f64.powf(0.25);

    let weight = |i: usize| -> f64 {
        let mut acc = 0.0;
        let mut v = i;
        let mut j = 0i32;
        while v != 0 {
            if v & 1 == 1 {
                acc += beta.powi(j);
            }
            v >>= 1;
            j += 1;
        }
        acc
    };

    let w: Vec<f64> = (0..n).map(weight).collect();
    let mut order: Vec<u16> = (0..n as u16).collect();
    order.sort_by(|&a, &b| {
        w[usize::from(a)]
            .partial_cmp(&w[usize::from(b)])
            .unwrap()
            .then(a.cmp(&b))
    });
    order
}
