use std::path::PathBuf;
use std::time::{SystemTime, UNIX_EPOCH};

use clap::Parser;
use starcoder_cli::{generate, LoadOptions};
use starcoder_engine::TokenId;
use starcoder_runtime::GenerationRequest;
use tracing_subscriber::EnvFilter;

/// starcoder.rs: code completion from a ggml model file
#[derive(Parser)]
#[command(name = "starcoder-cli", version)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(clap::Subcommand)]
enum Command {
    /// Complete a prompt and print the generated text.
    Generate {
        /// Path to a ggml starcoder model file.
        #[arg(
            short,
            long,
            default_value = "models/bigcode/gpt_bigcode-santacoder-ggml.bin"
        )]
        model: PathBuf,

        /// Input prompt text.
        #[arg(short, long)]
        prompt: String,

        /// Maximum number of tokens to generate.
        #[arg(short, long, default_value_t = GenerationRequest::DEFAULT_N_PREDICT)]
        n_predict: i64,

        #[arg(long, default_value_t = GenerationRequest::DEFAULT_TOP_K)]
        top_k: i64,

        #[arg(long, default_value_t = GenerationRequest::DEFAULT_TOP_P)]
        top_p: f32,

        /// Sampling temperature (must be > 0).
        #[arg(short, long, default_value_t = GenerationRequest::DEFAULT_TEMP)]
        temp: f32,

        /// Random seed for reproducible sampling.
        #[arg(short, long)]
        seed: Option<u64>,

        /// Prompt tokens per evaluation call.
        #[arg(long, default_value_t = 8)]
        batch_size: usize,

        /// End-of-sequence token id. Repeatable.
        #[arg(long = "eos-token-id")]
        eos_token_ids: Vec<TokenId>,
    },
}

/// Seed used when `--seed` is absent, so runs differ.
fn clock_seed() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_nanos() as u64)
        .unwrap_or_default()
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    match cli.command {
        Command::Generate {
            model,
            prompt,
            n_predict,
            top_k,
            top_p,
            temp,
            seed,
            batch_size,
            eos_token_ids,
        } => {
            let options = LoadOptions {
                model,
                batch_size,
                eos_token_ids,
                base_seed: clock_seed(),
            };
            let mut request = GenerationRequest::new(prompt)
                .with_n_predict(n_predict)
                .with_top_k(top_k)
                .with_top_p(top_p)
                .with_temp(temp);
            request.seed = seed;

            match generate(&options, &request) {
                Ok(response) => {
                    println!("{}", response.text);
                }
                Err(e) => {
                    eprintln!("error: {e}");
                    std::process::exit(1);
                }
            }
        }
    }
}
