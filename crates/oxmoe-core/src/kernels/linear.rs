//! Dense and MXFP4 projections.

use super::fill_each;
use crate::checkpoint::{Bf16View, Mxfp4Weight};
use crate::error::{ensure_len, OxmoeError, Result};
use crate::quantization::{decode_nibble, groups_per_row, MXFP4_BYTES_PER_GROUP};

fn check_rows(name: &str, x: &[f32], in_features: usize) -> Result<usize> {
    if in_features == 0 {
        return Err(OxmoeError::InvalidConfig(format!("{name}: zero input features")));
    }
    if x.len() % in_features != 0 {
        return Err(OxmoeError::shape(
            name,
            (x.len() / in_features + 1) * in_features,
            x.len(),
        ));
    }
    Ok(x.len() / in_features)
}

/// `out = x @ weight^T + bias` with a BF16 weight `[out_features, in_features]`.
///
/// `x` is `[seq, in_features]` and `out` is `[seq, out_features]`. The bias,
/// when present, is added after the full dot product.
pub fn linear_bf16(
    x: &[f32],
    weight: Bf16View<'_>,
    bias: Option<Bf16View<'_>>,
    in_features: usize,
    out_features: usize,
    out: &mut [f32],
) -> Result<()> {
    let seq = check_rows("linear input", x, in_features)?;
    ensure_len("linear weight", out_features * in_features, weight.len())?;
    if let Some(bias) = bias {
        ensure_len("linear bias", out_features, bias.len())?;
    }
    ensure_len("linear output", seq * out_features, out.len())?;

    fill_each(out, |idx| {
        let (t, o) = (idx / out_features, idx % out_features);
        let x_row = &x[t * in_features..(t + 1) * in_features];
        let w_row = weight.slice(o * in_features, in_features);
        let mut acc = 0.0f32;
        for (&xv, wv) in x_row.iter().zip(w_row.iter()) {
            acc += xv * wv;
        }
        match bias {
            Some(bias) => acc + bias.get(o),
            None => acc,
        }
    });
    Ok(())
}

/// Matrix-vector product against an MXFP4 weight, decoding on the fly.
///
/// `x` holds one token's `in_features` activations; `out` receives one value
/// per weight row. Each row's groups are walked in order, low nibble before
/// high nibble, and a trailing partial group stops at `in_features`.
pub fn mxfp4_matmul(
    x: &[f32],
    weight: Mxfp4Weight<'_>,
    bias: Option<Bf16View<'_>>,
    out: &mut [f32],
) -> Result<()> {
    let in_features = x.len();
    if !weight.fits(in_features) {
        return Err(OxmoeError::shape(
            "mxfp4 groups per row",
            groups_per_row(in_features),
            weight.groups(),
        ));
    }
    if let Some(bias) = bias {
        ensure_len("mxfp4 bias", weight.rows(), bias.len())?;
    }
    ensure_len("mxfp4 output", weight.rows(), out.len())?;

    fill_each(out, |o| {
        let (blocks, scales) = weight.row(o);
        let mut acc = 0.0f32;
        let mut idx = 0;
        'groups: for (block, &scale) in blocks.chunks_exact(MXFP4_BYTES_PER_GROUP).zip(scales) {
            for &byte in block {
                if idx >= in_features {
                    break 'groups;
                }
                acc += x[idx] * decode_nibble(byte & 0x0F, scale);
                idx += 1;
                if idx >= in_features {
                    break 'groups;
                }
                acc += x[idx] * decode_nibble(byte >> 4, scale);
                idx += 1;
            }
        }
        match bias {
            Some(bias) => acc + bias.get(o),
            None => acc,
        }
    });
    Ok(())
}
