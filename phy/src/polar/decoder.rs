//! Successive-cancellation list decoding
//!
//! LLR-domain SCL with min-sum check-node updates and path-metric pruning.
//! Consumes signed 8-bit LLRs (positive means bit zero) and returns the
//! information bits of the best surviving path; CRC arbitration between
//! paths is the caller's concern.

use super::encoder::polar_transform;
use super::PolarCode;
use crate::PhyError;

/// Default list size for PDCCH decoding
pub const DEFAULT_LIST_SIZE: usize = 8;

/// One decoding hypothesis
#[derive(Debug, Clone)]
struct Path {
    /// Accumulated penalty, lower is better
    metric: f32,
    /// Decided input bits u_0 .. u_{i-1}
    u: Vec<u8>,
}

/// Min-sum check-node update
fn f_minsum(a: f32, b: f32) -> f32 {
    a.signum() * b.signum() * a.abs().min(b.abs())
}

/// Decision LLR for input bit `u.len()` of a length-`alpha.len()` code,
/// given the previously decided bits `u`
fn bit_llr(alpha: &[f32], u: &[u8]) -> f32 {
    let n = alpha.len();
    if n == 1 {
        return alpha[0];
    }

    let half = n / 2;
    if u.len() < half {
        // Still inside the upper half: combine through the check nodes
        let combined: Vec<f32> = (0..half).map(|j| f_minsum(alpha[j], alpha[j + half])).collect();
        bit_llr(&combined, u)
    } else {
        // Upper half decided: fold its partial sums into the variable nodes
        let mut sums = u[..half].to_vec();
        polar_transform(&mut sums);
        let combined: Vec<f32> = (0..half)
            .map(|j| alpha[j + half] + (1.0 - 2.0 * f32::from(sums[j])) * alpha[j])
            .collect();
        bit_llr(&combined, &u[half..])
    }
}

/// Successive-cancellation list decoder
#[derive(Debug, Clone)]
pub struct PolarDecoder {
    list_size: usize,
    alpha: Vec<f32>,
}

impl PolarDecoder {
    /// Create a decoder with the given list size and scratch for code
    /// lengths up to `2^nmax_log`
    pub fn new(list_size: usize, nmax_log: usize) -> Result<Self, PhyError> {
        if list_size == 0 {
            return Err(PhyError::UpstreamPrimitive(
                "polar decoder list size must be at least one".into(),
            ));
        }
        Ok(Self {
            list_size,
            alpha: vec![0.0; 1 << nmax_log],
        })
    }

    /// Decode `llr[..code.n]` and write the `code.k` information bits of
    /// the most likely path to `c[..k]`
    pub fn decode(&mut self, code: &PolarCode, llr: &[i8], c: &mut [u8]) -> Result<(), PhyError> {
        let n = code.n;
        let alpha = &mut self.alpha[..n];
        for (a, &v) in alpha.iter_mut().zip(llr[..n].iter()) {
            *a = f32::from(v);
        }

        let mut is_frozen = vec![false; n];
        for &i in &code.frozen_set {
            is_frozen[usize::from(i)] = true;
        }

        let mut paths = vec![Path {
            metric: 0.0,
            u: Vec::with_capacity(n),
        }];

        for i in 0..n {
            let mut next: Vec<Path> = Vec::with_capacity(2 * paths.len());

            for path in paths.drain(..) {
                let llr_i = bit_llr(alpha, &path.u);
                let penalty = llr_i.abs();

                if is_frozen[i] {
                    let mut p = path;
                    if llr_i < 0.0 {
                        p.metric += penalty;
                    }
                    p.u.push(0);
                    next.push(p);
                } else {
                    let mut p1 = path.clone();
                    let mut p0 = path;

                    if llr_i < 0.0 {
                        p0.metric += penalty;
                    } else {
                        p1.metric += penalty;
                    }
                    p0.u.push(0);
                    p1.u.push(1);
                    next.push(p0);
                    next.push(p1);
                }
            }

            if next.len() > self.list_size {
                next.sort_by(|a, b| a.metric.partial_cmp(&b.metric).unwrap());
                next.truncate(self.list_size);
            }
            paths = next;
        }

        let best = paths
            .iter()
            .min_by(|a, b| a.metric.partial_cmp(&b.metric).unwrap())
            .ok_or_else(|| PhyError::UpstreamPrimitive("polar decoder list is empty".into()))?;

        for (out, &pos) in c[..code.k].iter_mut().zip(code.info_set.iter()) {
            *out = best.u[usize::from(pos)];
        }

        Ok(())
    }
}
