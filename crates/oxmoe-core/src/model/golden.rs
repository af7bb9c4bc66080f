//! Golden logits and golden token harness for model validation.
//!
//! Two levels of checking:
//! - [`GoldenLogits`] pins a full `[seq, vocab]` logits array from one
//!   forward pass and reports how far a run drifted from it.
//! - [`GoldenTestHarness`] replays recorded greedy generations
//!   ([`GoldenCase`]) through any generator and collects a [`GoldenSummary`].
//!
//! [`synthetic_checkpoint`] builds a deterministic small model whose weights
//! are cheap to reproduce outside Rust, so pinned logits can be computed by an
//! independent reference.
//!
//! # Example
//!
//! ```rust,ignore
//! use oxmoe_core::model::{GoldenCase, GoldenTestHarness};
//!
//! let mut harness = GoldenTestHarness::new();
//! harness.add_case(GoldenCase::greedy("hello", vec![13225], vec![11, 1495]));
//! let summary = harness.run_with(|prompt, max_new| generate(prompt, max_new));
//! assert!(summary.all_passed());
//! ```

use super::ModelConfig;
use crate::checkpoint::CheckpointBuilder;
use crate::quantization::{groups_per_row, MXFP4_BYTES_PER_GROUP};
use std::collections::HashMap;
use std::fmt;
use std::time::Instant;

/// Token sequence the synthetic model's logits are pinned on.
pub const SYNTHETIC_PROMPT: [i32; 2] = [1, 2];

/// Expected logits for one forward pass.
#[derive(Debug, Clone, PartialEq)]
pub struct GoldenLogits {
    /// Row-major `[seq, vocab]` logits.
    pub expected: Vec<f32>,
    /// Largest allowed absolute difference per element.
    pub tolerance: f32,
}

impl GoldenLogits {
    /// Pin `expected` with an absolute tolerance.
    pub fn new(expected: Vec<f32>, tolerance: f32) -> Self {
        Self {
            expected,
            tolerance,
        }
    }

    /// Compare a run against the pinned values.
    pub fn compare(&self, actual: &[f32]) -> GoldenReport {
        let mut max_abs_diff = 0.0f32;
        let mut first_divergence = None;
        let mut bit_exact = actual.len() == self.expected.len();

        for (i, (&e, &a)) in self.expected.iter().zip(actual).enumerate() {
            if e.to_bits() != a.to_bits() {
                bit_exact = false;
            }
            let diff = (e - a).abs();
            // NaN never compares within tolerance.
            if !(diff <= self.tolerance) && first_divergence.is_none() {
                first_divergence = Some(i);
            }
            if diff > max_abs_diff || diff.is_nan() {
                max_abs_diff = diff;
            }
        }

        GoldenReport {
            expected_len: self.expected.len(),
            actual_len: actual.len(),
            max_abs_diff,
            first_divergence,
            bit_exact,
            tolerance: self.tolerance,
        }
    }
}

/// Outcome of [`GoldenLogits::compare`].
#[derive(Debug, Clone, PartialEq)]
pub struct GoldenReport {
    /// Number of pinned values.
    pub expected_len: usize,
    /// Number of values produced.
    pub actual_len: usize,
    /// Largest absolute difference over the common prefix.
    pub max_abs_diff: f32,
    /// First index outside tolerance.
    pub first_divergence: Option<usize>,
    /// Every value identical at the bit level.
    pub bit_exact: bool,
    /// Tolerance the comparison used.
    pub tolerance: f32,
}

impl GoldenReport {
    /// Same length and every element within tolerance.
    pub fn passed(&self) -> bool {
        self.expected_len == self.actual_len && self.first_divergence.is_none()
    }
}

impl fmt::Display for GoldenReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let status = if self.passed() { "PASS" } else { "FAIL" };
        write!(
            f,
            "[{}] {} values, max |diff| {:.3e} (tol {:.1e}){}",
            status,
            self.actual_len,
            self.max_abs_diff,
            self.tolerance,
            if self.bit_exact { ", bit-exact" } else { "" }
        )?;
        if self.expected_len != self.actual_len {
            write!(f, "\n  Expected {} values", self.expected_len)?;
        }
        if let Some(idx) = self.first_divergence {
            write!(f, "\n  First divergence at index {}", idx)?;
        }
        Ok(())
    }
}

/// Deterministic weights for every tensor `config` needs.
///
/// Every value is a closed-form function of its element index and the
/// tensor's position in load order, so the same checkpoint can be rebuilt
/// anywhere:
/// - BF16 tensors: `((i * 37 + seed * 11) % 17 - 8) / 16`, plus one for norm
///   scales. All values are exact in BF16.
/// - MXFP4 blocks: byte `(i * 29 + seed * 7) % 256`; scales `126 + i % 3`.
pub fn synthetic_checkpoint(config: &ModelConfig) -> CheckpointBuilder {
    let h = config.hidden_size;
    let i = config.intermediate_size;
    let e = config.num_experts;
    let v = config.vocab_size;
    let qkv = config.qkv_dim();

    let mut synth = Synthesizer::default();
    synth.dense("embedding.weight", &[v, h]);
    for layer in 0..config.num_hidden_layers {
        let attn = format!("block.{layer}.attn");
        synth.norm(&format!("{attn}.norm.scale"), h);
        synth.dense(&format!("{attn}.qkv.weight"), &[qkv, h]);
        synth.dense(&format!("{attn}.qkv.bias"), &[qkv]);
        synth.dense(&format!("{attn}.out.weight"), &[h, config.q_dim()]);
        synth.dense(&format!("{attn}.out.bias"), &[h]);
        synth.dense(&format!("{attn}.sinks"), &[config.num_attention_heads]);

        let mlp = format!("block.{layer}.mlp");
        synth.norm(&format!("{mlp}.norm.scale"), h);
        synth.dense(&format!("{mlp}.gate.weight"), &[e, h]);
        synth.dense(&format!("{mlp}.gate.bias"), &[e]);
        synth.mxfp4(&format!("{mlp}.mlp1_weight"), &[e, 2 * i], h);
        synth.dense(&format!("{mlp}.mlp1_bias"), &[e, 2 * i]);
        synth.mxfp4(&format!("{mlp}.mlp2_weight"), &[e, h], i);
        synth.dense(&format!("{mlp}.mlp2_bias"), &[e, h]);
    }
    synth.norm("norm.scale", h);
    synth.dense("unembedding.weight", &[v, h]);
    synth.builder
}

#[derive(Default)]
struct Synthesizer {
    builder: CheckpointBuilder,
    seed: usize,
}

impl Synthesizer {
    fn values(&mut self, n: usize, offset: f32) -> Vec<f32> {
        let seed = self.seed;
        self.seed += 1;
        (0..n)
            .map(|i| offset + (((i * 37 + seed * 11) % 17) as f32 - 8.0) / 16.0)
            .collect()
    }

    fn dense(&mut self, name: &str, shape: &[usize]) {
        let values = self.values(shape.iter().product(), 0.0);
        self.builder.add_bf16(name, shape, &values);
    }

    fn norm(&mut self, name: &str, n: usize) {
        let values = self.values(n, 1.0);
        self.builder.add_bf16(name, &[n], &values);
    }

    fn mxfp4(&mut self, base: &str, prefix: &[usize], in_features: usize) {
        let seed = self.seed;
        self.seed += 1;
        let groups = groups_per_row(in_features);
        let rows: usize = prefix.iter().product();

        let blocks: Vec<u8> = (0..rows * groups * MXFP4_BYTES_PER_GROUP)
            .map(|i| ((i * 29 + seed * 7) % 256) as u8)
            .collect();
        let scales: Vec<u8> = (0..rows * groups).map(|i| 126 + (i % 3) as u8).collect();

        let mut blocks_shape = prefix.to_vec();
        blocks_shape.extend([groups, MXFP4_BYTES_PER_GROUP]);
        let mut scales_shape = prefix.to_vec();
        scales_shape.push(groups);
        self.builder
            .add_u8(&format!("{base}.blocks"), &blocks_shape, &blocks)
            .add_u8(&format!("{base}.scales"), &scales_shape, &scales);
    }
}

/// A recorded greedy generation.
#[derive(Debug, Clone, Default)]
pub struct GoldenCase {
    /// Test case name for identification.
    pub name: String,
    /// Prompt token sequence.
    pub prompt_tokens: Vec<u32>,
    /// Expected generated tokens.
    pub expected_tokens: Vec<u32>,
    /// Generation budget; defaults to the expected length.
    pub max_new_tokens: usize,
}

impl GoldenCase {
    /// Create a greedy decoding case.
    pub fn greedy(name: impl Into<String>, prompt: Vec<u32>, expected: Vec<u32>) -> Self {
        let max_new_tokens = expected.len();
        Self {
            name: name.into(),
            prompt_tokens: prompt,
            expected_tokens: expected,
            max_new_tokens,
        }
    }

    /// Create a case from space-separated decimal token strings.
    pub fn parse(name: impl Into<String>, prompt: &str, expected: &str) -> Self {
        let parse_tokens = |s: &str| -> Vec<u32> {
            s.split_whitespace()
                .filter_map(|t| t.parse().ok())
                .collect()
        };
        Self::greedy(name, parse_tokens(prompt), parse_tokens(expected))
    }

    /// Set the generation budget.
    pub fn with_max_new_tokens(mut self, max: usize) -> Self {
        self.max_new_tokens = max;
        self
    }
}

/// Result of a single golden case.
#[derive(Debug, Clone)]
pub struct GoldenResult {
    /// Test case name.
    pub name: String,
    /// Whether the case passed.
    pub passed: bool,
    /// Expected tokens.
    pub expected: Vec<u32>,
    /// Actual tokens produced.
    pub actual: Vec<u32>,
    /// First divergence index (if any).
    pub first_divergence: Option<usize>,
    /// Error message (if failed).
    pub error: Option<String>,
    /// Execution time in milliseconds.
    pub time_ms: f64,
}

impl GoldenResult {
    /// Compare `actual` against `expected`.
    pub fn compare(name: String, expected: Vec<u32>, actual: Vec<u32>, time_ms: f64) -> Self {
        let first_divergence = (0..expected.len().max(actual.len()))
            .find(|&i| expected.get(i) != actual.get(i));

        let error = first_divergence.map(|idx| {
            let show = |t: Option<&u32>| t.map_or_else(|| "EOF".to_string(), u32::to_string);
            format!(
                "Divergence at index {}: expected {}, got {}",
                idx,
                show(expected.get(idx)),
                show(actual.get(idx))
            )
        });

        Self {
            name,
            passed: first_divergence.is_none(),
            expected,
            actual,
            first_divergence,
            error,
            time_ms,
        }
    }

    /// Create an error result.
    pub fn error(name: String, error: String) -> Self {
        Self {
            name,
            passed: false,
            expected: Vec::new(),
            actual: Vec::new(),
            first_divergence: None,
            error: Some(error),
            time_ms: 0.0,
        }
    }
}

impl fmt::Display for GoldenResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let status = if self.passed { "PASS" } else { "FAIL" };
        write!(f, "[{}] {} ({:.1}ms)", status, self.name, self.time_ms)?;
        if let Some(ref err) = self.error {
            write!(f, "\n  Error: {}", err)?;
        }
        Ok(())
    }
}

/// Summary of golden test results.
#[derive(Debug, Clone, Default)]
pub struct GoldenSummary {
    /// Total number of cases.
    pub total: usize,
    /// Number of passed cases.
    pub passed: usize,
    /// Number of failed cases.
    pub failed: usize,
    /// Total execution time in milliseconds.
    pub total_time_ms: f64,
    /// Results by name.
    pub results: HashMap<String, GoldenResult>,
}

impl GoldenSummary {
    /// Create from results.
    pub fn from_results(results: Vec<GoldenResult>) -> Self {
        let total = results.len();
        let passed = results.iter().filter(|r| r.passed).count();
        let total_time_ms = results.iter().map(|r| r.time_ms).sum();
        Self {
            total,
            passed,
            failed: total - passed,
            total_time_ms,
            results: results.into_iter().map(|r| (r.name.clone(), r)).collect(),
        }
    }

    /// Check if all cases passed.
    pub fn all_passed(&self) -> bool {
        self.failed == 0
    }
}

impl fmt::Display for GoldenSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Golden Test Summary")?;
        writeln!(f, "===================")?;
        writeln!(f, "Total:  {}", self.total)?;
        writeln!(f, "Passed: {}", self.passed)?;
        writeln!(f, "Failed: {}", self.failed)?;
        writeln!(f, "Time:   {:.1}ms", self.total_time_ms)?;

        if self.failed > 0 {
            writeln!(f, "\nFailed cases:")?;
            let mut failed: Vec<_> = self.results.values().filter(|r| !r.passed).collect();
            failed.sort_by(|a, b| a.name.cmp(&b.name));
            for result in failed {
                writeln!(f, "  - {}", result)?;
            }
        }
        Ok(())
    }
}

/// Replays golden cases through a generator.
#[derive(Debug, Clone, Default)]
pub struct GoldenTestHarness {
    cases: Vec<GoldenCase>,
}

impl GoldenTestHarness {
    /// Create an empty harness.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a case.
    pub fn add_case(&mut self, case: GoldenCase) {
        self.cases.push(case);
    }

    /// Get all cases.
    pub fn cases(&self) -> &[GoldenCase] {
        &self.cases
    }

    /// Run every case. The generator receives the prompt and the generation
    /// budget and returns the generated tokens (prompt excluded).
    pub fn run_with<F, E>(&self, mut generator: F) -> GoldenSummary
    where
        F: FnMut(&[u32], usize) -> std::result::Result<Vec<u32>, E>,
        E: fmt::Display,
    {
        let results = self
            .cases
            .iter()
            .map(|case| {
                let start = Instant::now();
                match generator(&case.prompt_tokens, case.max_new_tokens) {
                    Ok(actual) => GoldenResult::compare(
                        case.name.clone(),
                        case.expected_tokens.clone(),
                        actual,
                        start.elapsed().as_secs_f64() * 1000.0,
                    ),
                    Err(err) => GoldenResult::error(case.name.clone(), err.to_string()),
                }
            })
            .collect();
        GoldenSummary::from_results(results)
    }
}
