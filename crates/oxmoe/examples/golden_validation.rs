//! Golden token validation against recorded greedy generations.
//!
//! Replays each recorded prompt through the greedy engine and compares the
//! generated tokens with the recorded continuation.
//!
//! Golden cases are a JSON array:
//!
//! ```json
//! [{ "name": "hello", "prompt": "Hello", "prompt_tokens": [13225],
//!    "expected_tokens": [11, 1495, 553], "max_new_tokens": 3 }]
//! ```
//!
//! Run validation:
//!    cargo run --release -p oxmoe --example golden_validation -- \
//!        model.safetensors tokenizer.json golden_cases.json [config.json]

use anyhow::Context;
use oxmoe::model::{GoldenCase, GoldenTestHarness};
use oxmoe::prelude::*;
use serde::Deserialize;
use std::fs;
use std::path::Path;
use std::time::Instant;

/// Golden case as stored in JSON.
#[derive(Debug, Deserialize)]
struct JsonGoldenCase {
    name: String,
    prompt: String,
    prompt_tokens: Vec<u32>,
    expected_tokens: Vec<u32>,
    max_new_tokens: Option<usize>,
}

impl From<JsonGoldenCase> for GoldenCase {
    fn from(json: JsonGoldenCase) -> Self {
        let case = GoldenCase::greedy(json.name, json.prompt_tokens, json.expected_tokens);
        match json.max_new_tokens {
            Some(max) => case.with_max_new_tokens(max),
            None => case,
        }
    }
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .init();

    let args: Vec<String> = std::env::args().collect();
    if args.len() < 4 {
        eprintln!(
            "Usage: golden_validation <model.safetensors> <tokenizer.json> <golden_cases.json> [config.json]"
        );
        std::process::exit(1);
    }

    println!("Golden Token Validation");
    println!("=======================\n");

    println!("Loading golden cases from {}...", args[3]);
    let json_cases: Vec<JsonGoldenCase> = serde_json::from_str(&fs::read_to_string(&args[3])?)
        .with_context(|| format!("failed to parse {}", args[3]))?;
    println!("Loaded {} test cases", json_cases.len());

    let tokenizer = Tokenizer::from_file(&args[2])?;
    let mut harness = GoldenTestHarness::new();
    for json_case in json_cases {
        // Recorded ids must agree with this tokenizer.
        let encoded = tokenizer.encode(&json_case.prompt)?;
        if encoded != json_case.prompt_tokens {
            eprintln!(
                "  warning: {}: tokenizer gives {:?}, recorded {:?}",
                json_case.name, encoded, json_case.prompt_tokens
            );
        }
        println!(
            "  - {}: {} prompt tokens, {} expected tokens",
            json_case.name,
            json_case.prompt_tokens.len(),
            json_case.expected_tokens.len()
        );
        harness.add_case(json_case.into());
    }

    let config = match args.get(4) {
        Some(path) => ModelConfig::from_file(Path::new(path))?,
        None => ModelConfig::default(),
    };
    println!(
        "\nModel: {} layers, {} hidden, {} experts (top {}), {} vocab",
        config.num_hidden_layers,
        config.hidden_size,
        config.num_experts,
        config.experts_per_token,
        config.vocab_size
    );

    let load_start = Instant::now();
    let checkpoint = Checkpoint::open(&args[1])?;
    let model = Transformer::load(&checkpoint, config)?;
    println!("Loaded in {:.2}s\n", load_start.elapsed().as_secs_f64());

    let engine = Engine::new(&model, &tokenizer);
    println!("Running golden validation...\n");
    let summary = harness.run_with(|prompt, max_new_tokens| {
        engine
            .generate_tokens(prompt, max_new_tokens, None, |_| Ok(()))
            .map_err(|e| format!("{e:#}"))
    });

    println!("{}", summary);

    if !summary.all_passed() {
        println!("\n--- Detailed Failure Analysis ---\n");
        for result in summary.results.values().filter(|r| !r.passed) {
            println!("Case: {}", result.name);
            if let Some(ref err) = result.error {
                println!("  Error: {}", err);
            }
            if let Some(idx) = result.first_divergence {
                for (label, token) in [
                    ("Expected", result.expected.get(idx)),
                    ("Actual  ", result.actual.get(idx)),
                ] {
                    if let Some(&id) = token {
                        let text = tokenizer.decode(id).unwrap_or_default();
                        println!("  {}: {} ({:?})", label, id, text);
                    }
                }
            }
            println!();
        }
        eprintln!("\n{} of {} cases failed", summary.failed, summary.total);
        std::process::exit(1);
    }

    println!("\nAll golden cases passed!");
    Ok(())
}
