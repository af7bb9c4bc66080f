use anyhow::{Context, Result};
use clap::{ArgAction, Parser};
use oxmoe::prelude::*;
use std::io::Write;
use std::path::PathBuf;
use tracing::{info, Level};

#[derive(Parser)]
#[command(name = "oxmoe")]
#[command(version)]
#[command(about = "Greedy text generation with a mixture-of-experts checkpoint", long_about = None)]
struct Cli {
    /// Prompt to continue
    #[arg(default_value = "Hello")]
    prompt: String,

    /// Path to the safetensors checkpoint
    #[arg(long)]
    checkpoint: PathBuf,

    /// Path to tokenizer.json (not needed with --inspect)
    #[arg(long, required_unless_present = "inspect")]
    tokenizer: Option<PathBuf>,

    /// Model config JSON; missing fields use the gpt-oss-20b defaults
    #[arg(long)]
    config: Option<PathBuf>,

    /// Number of tokens to generate
    #[arg(long, default_value_t = 16)]
    max_new_tokens: usize,

    /// List the checkpoint's tensors and exit
    #[arg(long)]
    inspect: bool,

    /// Increase log verbosity (-v info, -vv debug, -vvv trace)
    #[arg(short, long, action = ArgAction::Count)]
    verbose: u8,
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let level = match cli.verbose {
        0 => Level::WARN,
        1 => Level::INFO,
        2 => Level::DEBUG,
        _ => Level::TRACE,
    };
    tracing_subscriber::fmt()
        .with_max_level(level)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let checkpoint = Checkpoint::open(&cli.checkpoint)
        .with_context(|| format!("failed to open {}", cli.checkpoint.display()))?;

    if cli.inspect {
        let mut stdout = std::io::stdout().lock();
        for name in checkpoint.tensor_names() {
            writeln!(stdout, "{}", checkpoint.tensor(name)?)?;
        }
        return Ok(());
    }

    let config = match &cli.config {
        Some(path) => ModelConfig::from_file(path)
            .with_context(|| format!("failed to read config {}", path.display()))?,
        None => ModelConfig::default(),
    };
    let tokenizer_path = cli
        .tokenizer
        .as_deref()
        .context("--tokenizer is required for generation")?;
    let tokenizer = Tokenizer::from_file(tokenizer_path)?;
    info!(vocab = tokenizer.vocab_size(), "tokenizer loaded");

    let model = Transformer::load(&checkpoint, config)?;
    let engine = Engine::new(&model, &tokenizer);
    let request = GenerateRequest::new(cli.prompt.as_str()).max_new_tokens(cli.max_new_tokens);

    let mut stdout = std::io::stdout();
    print!("{}", request.prompt);
    stdout.flush()?;
    let result = engine.generate(&request, |fragment| {
        print!("{fragment}");
        // Streaming is best effort; a closed pipe surfaces on the final flush.
        let _ = std::io::stdout().flush();
    })?;
    println!();
    stdout.flush()?;

    info!(
        prompt_tokens = result.prompt_tokens,
        generated = result.tokens.len(),
        elapsed_ms = result.elapsed.as_millis() as u64,
        "done"
    );
    Ok(())
}
