//! Single-input channel equalisation

use num_complex::Complex32;

/// One-tap MMSE equaliser:
/// `out[i] = scale * conj(h[i]) * y[i] / (|h[i]|^2 + noise_var)`
pub fn predecoding_single(
    y: &[Complex32],
    h: &[Complex32],
    out: &mut [Complex32],
    scale: f32,
    noise_var: f32,
) {
    for ((y_i, h_i), out_i) in y.iter().zip(h.iter()).zip(out.iter_mut()) {
        let denom = h_i.norm_sqr() + noise_var;
        *out_i = if denom > 0.0 {
            scale * h_i.conj() * y_i / denom
        } else {
            Complex32::new(0.0, 0.0)
        };
    }
}
