//! Greedy generation driver.

use anyhow::{bail, Context, Result};
use oxmoe_core::model::{TokenCodec, Transformer};
use std::time::{Duration, Instant};
use tracing::{debug, info};

/// A generation request.
#[derive(Debug, Clone)]
pub struct GenerateRequest {
    /// Prompt text.
    pub prompt: String,
    /// Maximum tokens to generate.
    pub max_new_tokens: usize,
    /// Stop after the tokenizer's end token.
    pub stop_at_eos: bool,
}

impl GenerateRequest {
    /// Create a request with the default budget of 16 tokens.
    pub fn new(prompt: impl Into<String>) -> Self {
        Self {
            prompt: prompt.into(),
            max_new_tokens: 16,
            stop_at_eos: true,
        }
    }

    /// Set maximum tokens to generate.
    pub fn max_new_tokens(mut self, n: usize) -> Self {
        self.max_new_tokens = n;
        self
    }

    /// Keep generating past the end token.
    pub fn ignore_eos(mut self) -> Self {
        self.stop_at_eos = false;
        self
    }
}

/// Result of text generation.
#[derive(Debug, Clone)]
pub struct GenerateResult {
    /// Generated token IDs, prompt excluded.
    pub tokens: Vec<u32>,
    /// Decoded text of the generated tokens, end token excluded.
    pub text: String,
    /// Number of prompt tokens.
    pub prompt_tokens: usize,
    /// Wall time spent generating.
    pub elapsed: Duration,
}

impl GenerateResult {
    /// Generated tokens per second.
    pub fn tokens_per_second(&self) -> f64 {
        let secs = self.elapsed.as_secs_f64();
        if secs > 0.0 {
            self.tokens.len() as f64 / secs
        } else {
            0.0
        }
    }
}

/// Index of the largest value; the first one wins ties.
///
/// A NaN is never larger than anything, so it only wins from position zero.
pub fn argmax(values: &[f32]) -> Option<usize> {
    let mut best = 0;
    for (i, &v) in values.iter().enumerate().skip(1) {
        if values[best] < v {
            best = i;
        }
    }
    (!values.is_empty()).then_some(best)
}

/// Greedy decoder over a model and a tokenizer.
///
/// Every step runs the full forward pass over the whole running sequence and
/// appends the argmax of the last position.
pub struct Engine<'m, C: ?Sized> {
    model: &'m Transformer<'m>,
    codec: &'m C,
}

impl<'m, C: TokenCodec + ?Sized> Engine<'m, C> {
    /// Create an engine.
    pub fn new(model: &'m Transformer<'m>, codec: &'m C) -> Self {
        Self { model, codec }
    }

    /// Get model reference.
    pub fn model(&self) -> &Transformer<'m> {
        self.model
    }

    /// Generate from text, calling `on_token` with each decoded fragment as
    /// soon as it is produced.
    pub fn generate<F>(&self, request: &GenerateRequest, mut on_token: F) -> Result<GenerateResult>
    where
        F: FnMut(&str),
    {
        let start = Instant::now();
        let prompt = self.codec.encode(&request.prompt)?;
        if prompt.is_empty() {
            bail!("prompt {:?} produced no tokens", request.prompt);
        }
        info!(prompt_tokens = prompt.len(), "encoded prompt");

        let eos = request
            .stop_at_eos
            .then(|| self.codec.eos_token_id())
            .flatten();

        let mut text = String::new();
        let tokens = self.generate_tokens(&prompt, request.max_new_tokens, eos, |id| {
            if Some(id) == eos {
                return Ok(());
            }
            let fragment = self.codec.decode(id)?;
            on_token(&fragment);
            text.push_str(&fragment);
            Ok(())
        })?;

        let result = GenerateResult {
            tokens,
            text,
            prompt_tokens: prompt.len(),
            elapsed: start.elapsed(),
        };
        info!(
            generated = result.tokens.len(),
            tokens_per_sec = result.tokens_per_second(),
            "generation finished"
        );
        Ok(result)
    }

    /// Token-level greedy loop. Stops after `max_new_tokens` or right after
    /// emitting `eos`; the end token is included in the output.
    pub fn generate_tokens<F>(
        &self,
        prompt: &[u32],
        max_new_tokens: usize,
        eos: Option<u32>,
        mut on_token: F,
    ) -> Result<Vec<u32>>
    where
        F: FnMut(u32) -> oxmoe_core::Result<()>,
    {
        if prompt.is_empty() {
            bail!("cannot generate from an empty prompt");
        }
        let mut running = prompt
            .iter()
            .copied()
            .map(model_token)
            .collect::<Result<Vec<i32>>>()?;

        let mut generated = Vec::with_capacity(max_new_tokens);
        for step in 0..max_new_tokens {
            let logits = self.model.forward_last(&running)?;
            let next = argmax(&logits).context("model produced no logits")?;
            let next = u32::try_from(next).context("vocabulary exceeds u32")?;
            debug!(step, token = next, "decoded");

            running.push(model_token(next)?);
            generated.push(next);
            on_token(next)?;
            if Some(next) == eos {
                break;
            }
        }
        Ok(generated)
    }
}

/// Codec ids are `u32`; the model takes `i32` positions into its vocabulary.
fn model_token(id: u32) -> Result<i32> {
    i32::try_from(id).with_context(|| format!("token id {id} out of range"))
}

impl<C: ?Sized> std::fmt::Debug for Engine<'_, C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Engine")
            .field("model", self.model.config())
            .finish()
    }
}
