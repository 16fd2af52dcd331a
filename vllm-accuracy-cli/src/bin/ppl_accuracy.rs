//! Wikitext perplexity accuracy test for a running vLLM server
//!
//! Scores wikitext-2 (or a local text file) through the server's completion
//! API with `echo: true` and prints word perplexity, byte perplexity and
//! bits-per-byte in the format the benchmark harness parses.

use anyhow::{Context, Result, bail};
use clap::Parser;
use serde::Serialize;
use std::path::PathBuf;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use vllm_accuracy_engine::client::{
    CompletionClient, ExploreResult, ProbeOutcome, build_http_client, connect,
};
use vllm_accuracy_engine::perplexity::{PerplexityOptions, PerplexityRun, calculate_perplexity};
use vllm_accuracy_engine::report::{MetricsReport, banner, rule};
use vllm_accuracy_engine::{PerplexityMode, Settings, dataset, load_tokenizer};

/// Perplexity accuracy test against a vLLM OpenAI-compatible server
#[derive(Parser)]
#[command(name = "ppl-accuracy")]
#[command(about = "Wikitext perplexity accuracy test for vLLM via direct API calls")]
struct Cli {
    /// Base URL of the vLLM server (default: http://0.0.0.0:8888)
    #[arg(long)]
    base_url: Option<String>,

    /// Model name for the tokenizer and the `model` request field
    #[arg(long)]
    model: String,

    /// Windowing mode: chunked or sliding
    #[arg(long)]
    mode: Option<PerplexityMode>,

    /// Tokens per request in chunked mode (default: 512)
    #[arg(long)]
    chunk_size: Option<usize>,

    /// Maximum number of chunks to process (for testing)
    #[arg(long)]
    max_chunks: Option<usize>,

    /// Window length in sliding mode (default: 2048)
    #[arg(long)]
    max_length: Option<usize>,

    /// Window advance in sliding mode (default: 512)
    #[arg(long)]
    stride: Option<usize>,

    /// Local tokenizer.json (skips the HuggingFace download)
    #[arg(long)]
    tokenizer: Option<PathBuf>,

    /// Evaluate this text file instead of wikitext-2
    #[arg(long)]
    text_file: Option<PathBuf>,

    /// Settings file merged over the built-in defaults
    #[arg(long)]
    config: Option<PathBuf>,

    /// Save metrics and run statistics to JSON
    #[arg(long)]
    output: Option<PathBuf>,

    /// Skip the diagnostic endpoint sweep
    #[arg(long)]
    skip_explore: bool,

    /// Hide the progress bar
    #[arg(long)]
    no_progress: bool,

    /// Enable verbose logging (debug level)
    #[arg(short, long)]
    verbose: bool,
}

#[derive(Serialize)]
struct JsonReport<'a> {
    model: &'a str,
    base_url: &'a str,
    endpoint: &'a str,
    mode: PerplexityMode,
    #[serde(flatten)]
    run: &'a PerplexityRun,
}

fn init_tracing(verbose: bool) {
    let default_filter = if verbose {
        "ppl_accuracy=debug,vllm_accuracy_engine=debug"
    } else {
        "ppl_accuracy=info,vllm_accuracy_engine=info"
    };

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| default_filter.into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();
}

fn print_explore_table(results: &[ExploreResult]) {
    println!();
    println!("{}", rule());
    println!("Exploring vLLM server endpoints...");
    println!("{}", rule());
    for r in results {
        match &r.outcome {
            ProbeOutcome::Usable(status) | ProbeOutcome::Unusable(status) => {
                println!("✓ {:4} {:30} -> {}", r.method, r.path, status);
            }
            ProbeOutcome::NotFound => {
                println!("✗ {:4} {:30} -> 404 Not Found", r.method, r.path);
            }
            ProbeOutcome::Failed(e) => {
                let short: String = e.chars().take(40).collect();
                println!("✗ {:4} {:30} -> Error: {}", r.method, r.path, short);
            }
        }
    }
    println!("{}", rule());

    let available = results.iter().filter(|r| r.is_available()).count();
    if available > 0 {
        println!("\nFound {} available endpoint(s)", available);
    } else {
        println!("\nWARNING: No available endpoints found!");
    }
    println!();
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let mut settings = Settings::load(cli.config.as_deref()).context("Failed to load settings")?;
    if let Some(url) = &cli.base_url {
        settings.server.base_url = url.clone();
    }
    if let Some(mode) = cli.mode {
        settings.perplexity.mode = mode;
    }
    if let Some(n) = cli.chunk_size {
        settings.perplexity.chunk_size = n;
    }
    if let Some(n) = cli.max_length {
        settings.perplexity.max_length = n;
    }
    if let Some(n) = cli.stride {
        settings.perplexity.stride = n;
    }
    let base_url = settings.server.base_url.clone();

    let mut header = vec![
        ("Base URL", base_url.clone()),
        ("Model", cli.model.clone()),
    ];
    match settings.perplexity.mode {
        PerplexityMode::Chunked => {
            header.push(("Chunk size", settings.perplexity.chunk_size.to_string()));
        }
        PerplexityMode::Sliding => {
            header.push(("Max length", settings.perplexity.max_length.to_string()));
            header.push(("Stride", settings.perplexity.stride.to_string()));
        }
    }
    print!("{}", banner("Alternative Accuracy Test for vLLM", &header));
    println!();

    let http = build_http_client()?;
    let connection = connect(
        &http,
        &base_url,
        Some(cli.model.as_str()),
        &settings,
        !cli.skip_explore,
    )
    .context("Server checks failed")?;
    if !cli.skip_explore {
        print_explore_table(&connection.explored);
    }
    let endpoint = connection.endpoint;

    let text = match &cli.text_file {
        Some(path) => dataset::read_text_file(path)
            .with_context(|| format!("Failed to read {}", path.display()))?,
        None => dataset::download_wikitext(&http, &settings.dataset)
            .context("Failed to download dataset")?,
    };
    tracing::info!("Loaded evaluation text ({} characters)", text.chars().count());

    let tokenizer = load_tokenizer(&cli.model, cli.tokenizer.as_deref())
        .with_context(|| format!("Failed to load tokenizer for {}", cli.model))?;

    let mut client = CompletionClient::new(
        http,
        &base_url,
        settings.probe.endpoints.clone(),
        Some(cli.model.clone()),
        &settings.request,
    )
    .with_endpoint(Some(endpoint.clone()));

    let mut options = PerplexityOptions::from_settings(&settings);
    options.max_chunks = cli.max_chunks;
    options.show_progress = !cli.no_progress;

    let run = calculate_perplexity(&text, &tokenizer, &mut client, &options)
        .context("Perplexity calculation failed")?;
    tracing::info!(
        "{} of {} chunks scored ({} failed)",
        run.chunks_ok,
        run.windows_planned,
        run.chunks_failed
    );

    let Some(metrics) = run.metrics else {
        bail!("Perplexity calculation failed: no chunk returned usable log-probabilities");
    };

    println!();
    print!("{}", MetricsReport::perplexity(&metrics).render());

    if let Some(output_path) = &cli.output {
        let report = JsonReport {
            model: &cli.model,
            base_url: &base_url,
            endpoint: &endpoint,
            mode: settings.perplexity.mode,
            run: &run,
        };
        let json = serde_json::to_string_pretty(&report)?;
        std::fs::write(output_path, &json)
            .with_context(|| format!("Failed to write {}", output_path.display()))?;
        eprintln!("Detailed results saved to {}", output_path.display());
    }

    Ok(())
}
