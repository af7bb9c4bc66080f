//! Mixture-of-experts routing and expert activation.

use crate::error::{ensure_len, OxmoeError, Result};

use super::softmax_in_place;

/// One routed expert and its combination weight.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ExpertChoice {
    /// Expert index in `[0, num_experts)`.
    pub expert: usize,
    /// Combination weight.
    pub weight: f32,
}

/// Pick the `k` largest gate logits and softmax over just those `k`.
///
/// Choices come back in descending logit order. Equal logits go to the lower
/// expert index first. Experts outside the selection get no probability mass
/// at all: the softmax runs over the selected subset, not over every expert.
pub fn topk_gating(logits: &[f32], k: usize) -> Result<Vec<ExpertChoice>> {
    if k == 0 || k > logits.len() {
        return Err(OxmoeError::InvalidConfig(format!(
            "cannot route to {} of {} experts",
            k,
            logits.len()
        )));
    }

    // Greedy selection, O(k * E): pick the best unselected expert, mark, repeat.
    let mut selected = vec![false; logits.len()];
    let mut experts = Vec::with_capacity(k);
    let mut weights = Vec::with_capacity(k);
    for _ in 0..k {
        let mut best: Option<usize> = None;
        for (e, &v) in logits.iter().enumerate() {
            if selected[e] {
                continue;
            }
            let better = match best {
                None => true,
                Some(b) => v > logits[b] || (logits[b].is_nan() && !v.is_nan()),
            };
            if better {
                best = Some(e);
            }
        }
        // k <= len guarantees an unselected expert remains.
        let Some(best) = best else { break };
        selected[best] = true;
        experts.push(best);
        weights.push(logits[best]);
    }

    softmax_in_place(&mut weights);
    Ok(experts
        .into_iter()
        .zip(weights)
        .map(|(expert, weight)| ExpertChoice { expert, weight })
        .collect())
}

/// Gated activation over interleaved `[gate, linear]` lanes.
///
/// For each pair `(g, l) = (x[2i], x[2i + 1])`:
/// `out[i] = min(g, limit) * sigmoid(alpha * min(g, limit)) * (clamp(l, -limit, limit) + 1)`.
pub fn swiglu(x: &[f32], alpha: f32, limit: f32, out: &mut [f32]) -> Result<()> {
    if x.len() % 2 != 0 {
        return Err(OxmoeError::shape("swiglu input", x.len() + 1, x.len()));
    }
    ensure_len("swiglu output", x.len() / 2, out.len())?;
    if limit.is_nan() || limit < 0.0 {
        return Err(OxmoeError::InvalidConfig(format!(
            "swiglu limit must be non-negative, got {limit}"
        )));
    }

    for (dst, pair) in out.iter_mut().zip(x.chunks_exact(2)) {
        let glu = pair[0].min(limit);
        let lin = pair[1].clamp(-limit, limit);
        let gated = glu * (1.0 / (1.0 + (-alpha * glu).exp()));
        *dst = gated * (lin + 1.0);
    }
    Ok(())
}

/// `out = sum_e weights[e] * expert_outputs[e]` over `[k, hidden]` outputs.
pub fn moe_combine(
    expert_outputs: &[f32],
    weights: &[f32],
    hidden: usize,
    out: &mut [f32],
) -> Result<()> {
    ensure_len("moe expert outputs", weights.len() * hidden, expert_outputs.len())?;
    ensure_len("moe output", hidden, out.len())?;

    out.fill(0.0);
    for (&w, expert) in weights.iter().zip(expert_outputs.chunks_exact(hidden.max(1))) {
        for (o, &v) in out.iter_mut().zip(expert) {
            *o += w * v;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kernels::test_util::assert_close;

    #[test]
    fn topk_picks_largest_in_order() {
        let choices = topk_gating(&[0.1, 3.0, -1.0, 2.0], 2).unwrap();
        let experts: Vec<usize> = choices.iter().map(|c| c.expert).collect();
        assert_eq!(experts, vec![1, 3]);
        assert!(choices[0].weight > choices[1].weight);
    }

    #[test]
    fn topk_softmax_is_over_subset_only() {
        let choices = topk_gating(&[1.0, 0.0, 100.0], 2).unwrap();
        // Softmax of [100, 1], not of all three logits.
        let e = (1.0f32 - 100.0).exp();
        assert_close(
            &[choices[0].weight, choices[1].weight],
            &[1.0 / (1.0 + e), e / (1.0 + e)],
            1e-7,
        );
    }

    #[test]
    fn topk_equal_logits_prefer_lower_index() {
        let choices = topk_gating(&[5.0, 7.0, 7.0, 7.0], 2).unwrap();
        assert_eq!(choices[0].expert, 1);
        assert_eq!(choices[1].expert, 2);
        assert_eq!(choices[0].weight, 0.5);
    }

    #[test]
    fn topk_single_expert_has_full_weight() {
        let choices = topk_gating(&[-3.0, -2.0], 1).unwrap();
        assert_eq!(choices, vec![ExpertChoice { expert: 1, weight: 1.0 }]);
    }

    #[test]
    fn topk_all_experts() {
        let choices = topk_gating(&[0.0, 0.0, 0.0, 0.0], 4).unwrap();
        let experts: Vec<usize> = choices.iter().map(|c| c.expert).collect();
        assert_eq!(experts, vec![0, 1, 2, 3]);
        for c in &choices {
            assert_eq!(c.weight, 0.25);
        }
    }

    #[test]
    fn topk_rejects_too_many() {
        assert!(matches!(
            topk_gating(&[0.0, 1.0], 3),
            Err(OxmoeError::InvalidConfig(_))
        ));
        assert!(topk_gating(&[0.0, 1.0], 0).is_err());
    }

    #[test]
    fn topk_nan_never_beats_a_number() {
        let choices = topk_gating(&[f32::NAN, 1.0, 0.5], 2).unwrap();
        let experts: Vec<usize> = choices.iter().map(|c| c.expert).collect();
        assert_eq!(experts, vec![1, 2]);
    }

    #[test]
    fn swiglu_zero_gate_is_zero() {
        let mut out = [1.0; 2];
        swiglu(&[0.0, 5.0, 0.0, -5.0], 1.702, 7.0, &mut out).unwrap();
        assert_eq!(out, [0.0, 0.0]);
    }

    #[test]
    fn swiglu_reference_value() {
        let mut out = [0.0; 1];
        swiglu(&[1.0, 0.5], 1.702, 7.0, &mut out).unwrap();
        let expected = 1.0 / (1.0 + (-1.702f32).exp()) * 1.5;
        assert_close(&out, &[expected], 1e-6);
    }

    #[test]
    fn swiglu_clamps_lanes() {
        let mut clamped = [0.0; 1];
        let mut at_limit = [0.0; 1];
        swiglu(&[100.0, -100.0], 1.702, 7.0, &mut clamped).unwrap();
        swiglu(&[7.0, -7.0], 1.702, 7.0, &mut at_limit).unwrap();
        assert_eq!(clamped, at_limit);

        // Only the gate's upper side is clamped.
        let mut low_gate = [0.0; 1];
        swiglu(&[-20.0, 0.0], 1.702, 7.0, &mut low_gate).unwrap();
        let expected = -20.0 / (1.0 + (34.04f32).exp());
        assert_close(&low_gate, &[expected], 1e-12);
    }

    #[test]
    fn swiglu_rejects_odd_input() {
        let mut out = [0.0; 1];
        assert!(swiglu(&[1.0, 2.0, 3.0], 1.702, 7.0, &mut out).is_err());
        assert!(swiglu(&[1.0, 2.0], 1.702, 7.0, &mut [0.0; 2]).is_err());
    }

    #[test]
    fn swiglu_rejects_negative_or_nan_limit() {
        let mut out = [0.0; 1];
        for limit in [-1.0, f32::NAN] {
            assert!(matches!(
                swiglu(&[1.0, 2.0], 1.702, limit, &mut out),
                Err(OxmoeError::InvalidConfig(_))
            ));
        }
    }

    #[test]
    fn combine_weighted_sum() {
        let outputs = [1.0, 2.0, 10.0, 20.0];
        let mut out = [f32::NAN; 2];
        moe_combine(&outputs, &[0.25, 0.75], 2, &mut out).unwrap();
        assert_eq!(out, [7.75, 15.5]);
    }

    #[test]
    fn combine_validates_lengths() {
        let mut out = [0.0; 2];
        assert!(moe_combine(&[1.0; 3], &[0.5, 0.5], 2, &mut out).is_err());
        assert!(moe_combine(&[1.0; 4], &[0.5, 0.5], 2, &mut [0.0; 3]).is_err());
    }
}
