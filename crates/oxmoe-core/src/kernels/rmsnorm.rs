//! Root Mean Square Layer Normalization.
//!
//! RMSNorm normalizes by the root mean square, without centering.
//!
//! # Formula
//!
//! `RMSNorm(x) = x / sqrt(mean(x^2) + eps) * scale`
//!
//! # Reference
//!
//! [Root Mean Square Layer Normalization](https://arxiv.org/abs/1910.07467)

use crate::checkpoint::Bf16View;
use crate::error::{ensure_len, OxmoeError, Result};

/// Normalize each `hidden`-wide row of `x` into `out`.
pub fn rmsnorm(
    x: &[f32],
    scale: Bf16View<'_>,
    eps: f32,
    hidden: usize,
    out: &mut [f32],
) -> Result<()> {
    if hidden == 0 {
        return Err(OxmoeError::InvalidConfig("rmsnorm over zero features".into()));
    }
    ensure_len("rmsnorm scale", hidden, scale.len())?;
    if x.len() % hidden != 0 {
        return Err(OxmoeError::shape(
            "rmsnorm input",
            (x.len() / hidden + 1) * hidden,
            x.len(),
        ));
    }
    ensure_len("rmsnorm output", x.len(), out.len())?;

    for (x_row, out_row) in x.chunks_exact(hidden).zip(out.chunks_exact_mut(hidden)) {
        let mut mean_sq = 0.0f32;
        for &v in x_row {
            mean_sq += v * v;
        }
        mean_sq /= hidden as f32;
        let inv_rms = 1.0 / (mean_sq + eps).sqrt();
        for ((dst, &v), s) in out_row.iter_mut().zip(x_row).zip(scale.iter()) {
            *dst = v * inv_rms * s;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::checkpoint::encode_bf16;

    #[test]
    fn constant_row_normalizes_to_scale() {
        let scale = encode_bf16(&[1.0; 4]);
        let scale = Bf16View::new(&scale).unwrap();
        let mut out = vec![0.0; 4];
        rmsnorm(&[2.0; 4], scale, 0.0, 4, &mut out).unwrap();
        assert_eq!(out, vec![1.0; 4]);
    }

    #[test]
    fn applies_learned_scale() {
        let scale = encode_bf16(&[1.0, 2.0, -1.0, 0.5]);
        let scale = Bf16View::new(&scale).unwrap();
        let mut out = vec![0.0; 4];
        // mean(x^2) = 1, so the row is unchanged before scaling.
        rmsnorm(&[1.0, -1.0, 1.0, -1.0], scale, 0.0, 4, &mut out).unwrap();
        assert_eq!(out, vec![1.0, -2.0, -1.0, -0.5]);
    }

    #[test]
    fn rows_are_independent() {
        let scale = encode_bf16(&[1.0; 2]);
        let scale = Bf16View::new(&scale).unwrap();
        let mut out = vec![0.0; 4];
        rmsnorm(&[3.0, 4.0, 300.0, 400.0], scale, 0.0, 2, &mut out).unwrap();
        assert!((out[0] - out[2]).abs() < 1e-5);
        assert!((out[1] - out[3]).abs() < 1e-5);
    }

    #[test]
    fn zero_row_stays_finite_with_eps() {
        let scale = encode_bf16(&[1.0; 3]);
        let scale = Bf16View::new(&scale).unwrap();
        let mut out = vec![f32::NAN; 3];
        rmsnorm(&[0.0; 3], scale, 1e-5, 3, &mut out).unwrap();
        assert_eq!(out, vec![0.0; 3]);
    }

    #[test]
    fn rejects_ragged_input() {
        let scale = encode_bf16(&[1.0; 4]);
        let scale = Bf16View::new(&scale).unwrap();
        let mut out = vec![0.0; 6];
        assert!(rmsnorm(&[1.0; 6], scale, 1e-5, 4, &mut out).is_err());
    }

    #[test]
    fn rejects_wrong_scale_len() {
        let scale = encode_bf16(&[1.0; 3]);
        let scale = Bf16View::new(&scale).unwrap();
        let mut out = vec![0.0; 4];
        assert!(rmsnorm(&[1.0; 4], scale, 1e-5, 4, &mut out).is_err());
    }
}
