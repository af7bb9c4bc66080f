//! Token embedding and the output projection.

use super::linear_bf16;
use crate::checkpoint::Bf16View;
use crate::error::{ensure_len, Result};

/// Gather one embedding row per token into `out` (`[ids.len(), hidden]`).
///
/// An id outside `[0, vocab)` (negative ones included) produces an all-zero
/// row. It is not an error.
pub fn embedding_lookup(
    table: Bf16View<'_>,
    vocab: usize,
    hidden: usize,
    ids: &[i32],
    out: &mut [f32],
) -> Result<()> {
    ensure_len("embedding table", vocab * hidden, table.len())?;
    ensure_len("embedding output", ids.len() * hidden, out.len())?;

    for (&id, row) in ids.iter().zip(out.chunks_mut(hidden.max(1))) {
        match usize::try_from(id) {
            Ok(id) if id < vocab => {
                let src = table.slice(id * hidden, hidden);
                for (dst, v) in row.iter_mut().zip(src.iter()) {
                    *dst = v;
                }
            }
            _ => row.fill(0.0),
        }
    }
    Ok(())
}

/// Project `[seq, hidden]` activations onto the vocabulary.
///
/// Equivalent to a bias-free [`linear_bf16`] with `table` as the weight.
pub fn unembedding_logits(
    table: Bf16View<'_>,
    vocab: usize,
    hidden: usize,
    x: &[f32],
    out: &mut [f32],
) -> Result<()> {
    ensure_len("unembedding table", vocab * hidden, table.len())?;
    linear_bf16(x, table, None, hidden, vocab, out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::checkpoint::encode_bf16;

    fn table_bytes() -> Vec<u8> {
        // vocab 3, hidden 2
        encode_bf16(&[1.0, 2.0, 3.0, 4.0, 5.0, 6.0])
    }

    #[test]
    fn gathers_rows() {
        let bytes = table_bytes();
        let table = Bf16View::new(&bytes).unwrap();
        let mut out = vec![0.0; 4];
        embedding_lookup(table, 3, 2, &[2, 0], &mut out).unwrap();
        assert_eq!(out, vec![5.0, 6.0, 1.0, 2.0]);
    }

    #[test]
    fn out_of_range_ids_are_zero_rows() {
        let bytes = table_bytes();
        let table = Bf16View::new(&bytes).unwrap();
        let mut out = vec![f32::NAN; 6];
        embedding_lookup(table, 3, 2, &[-1, 3, 1], &mut out).unwrap();
        assert_eq!(out, vec![0.0, 0.0, 0.0, 0.0, 3.0, 4.0]);
    }

    #[test]
    fn rejects_wrong_table_size() {
        let bytes = table_bytes();
        let table = Bf16View::new(&bytes).unwrap();
        let mut out = vec![0.0; 2];
        assert!(embedding_lookup(table, 4, 2, &[0], &mut out).is_err());
    }

    #[test]
    fn rejects_wrong_output_size() {
        let bytes = table_bytes();
        let table = Bf16View::new(&bytes).unwrap();
        let mut out = vec![0.0; 3];
        assert!(embedding_lookup(table, 3, 2, &[0, 1], &mut out).is_err());
    }

    #[test]
    fn unembedding_is_dot_with_each_row() {
        let bytes = table_bytes();
        let table = Bf16View::new(&bytes).unwrap();
        let mut logits = vec![0.0; 3];
        unembedding_logits(table, 3, 2, &[1.0, -1.0], &mut logits).unwrap();
        assert_eq!(logits, vec![-1.0, -1.0, -1.0]);

        unembedding_logits(table, 3, 2, &[0.5, 0.0], &mut logits).unwrap();
        assert_eq!(logits, vec![0.5, 1.5, 2.5]);
    }
}
