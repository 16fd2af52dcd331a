//! GPQA accuracy test for a running vLLM server
//!
//! Delegates the evaluation to `python -m gpt_oss.evals --eval gpqa` pointed at
//! the server's `/v1` API, then reprints the score in the format the benchmark
//! harness parses.

use anyhow::{Context, Result, bail};
use clap::Parser;
use serde::Serialize;
use std::path::PathBuf;
use std::time::Duration;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use vllm_accuracy_engine::gpqa::{
    GpqaOutcome, GpqaRequest, ensure_v1_base_url, evaluator_available, run_gpqa_eval,
};
use vllm_accuracy_engine::report::{MetricsReport, banner};
use vllm_accuracy_engine::{Settings, build_http_client, check_server_health};

/// GPQA accuracy test against a vLLM OpenAI-compatible server
#[derive(Parser)]
#[command(name = "gpqa-accuracy")]
#[command(about = "GPQA accuracy test for vLLM using gpt_oss.evals")]
struct Cli {
    /// Base URL of the vLLM server without /v1 (default: http://0.0.0.0:8888)
    #[arg(long)]
    base_url: Option<String>,

    /// Model name passed to the evaluator
    #[arg(long)]
    model: String,

    /// Reasoning effort (default: low)
    #[arg(long, env = "REASONING_EFFORT")]
    reasoning_effort: Option<String>,

    /// Evaluator worker threads (default: 200)
    #[arg(long, env = "GPQA_N_THREADS")]
    n_threads: Option<u32>,

    /// Evaluation timeout in seconds (default: 1800)
    #[arg(long, env = "GPQA_TIMEOUT_S")]
    timeout: Option<u64>,

    /// Python interpreter with gpt_oss installed (default: python3)
    #[arg(long, env = "PYTHON")]
    python: Option<String>,

    /// Settings file merged over the built-in defaults
    #[arg(long)]
    config: Option<PathBuf>,

    /// Save the outcome to JSON
    #[arg(long)]
    output: Option<PathBuf>,

    /// Enable verbose logging (debug level)
    #[arg(short, long)]
    verbose: bool,
}

#[derive(Serialize)]
struct JsonReport<'a> {
    model: &'a str,
    base_url: &'a str,
    reasoning_effort: &'a str,
    n_threads: u32,
    #[serde(flatten)]
    outcome: &'a GpqaOutcome,
}

fn init_tracing(verbose: bool) {
    let default_filter = if verbose {
        "gpqa_accuracy=debug,vllm_accuracy_engine=debug"
    } else {
        "gpqa_accuracy=info,vllm_accuracy_engine=info"
    };

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| default_filter.into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let mut settings = Settings::load(cli.config.as_deref()).context("Failed to load settings")?;
    if let Some(url) = &cli.base_url {
        settings.server.base_url = url.clone();
    }
    if let Some(effort) = &cli.reasoning_effort {
        settings.gpqa.reasoning_effort = effort.clone();
    }
    if let Some(n) = cli.n_threads {
        settings.gpqa.n_threads = n;
    }
    if let Some(secs) = cli.timeout {
        settings.gpqa.timeout_secs = secs;
    }
    if let Some(python) = &cli.python {
        settings.gpqa.python = python.clone();
    }

    let base_url = settings.server.base_url.trim_end_matches('/').to_string();
    let request = GpqaRequest {
        model: cli.model.clone(),
        base_url_v1: ensure_v1_base_url(&base_url),
        reasoning_effort: settings.gpqa.reasoning_effort.clone(),
        n_threads: settings.gpqa.n_threads,
        timeout: Duration::from_secs(settings.gpqa.timeout_secs),
    };

    let header = [
        ("Base URL", base_url.clone()),
        ("Base URL (v1)", request.base_url_v1.clone()),
        ("Model", request.model.clone()),
        ("Reasoning effort", request.reasoning_effort.clone()),
        ("N threads", request.n_threads.to_string()),
        ("Timeout", format!("{}s", settings.gpqa.timeout_secs)),
    ];
    print!("{}", banner("GPQA Accuracy Test (gpt_oss.evals)", &header));
    println!();

    if !evaluator_available(&settings.gpqa) {
        bail!(
            "{} is not importable with {}. Install it with:\n  \
             git clone https://github.com/openai/gpt-oss.git\n  \
             cd gpt-oss && pip install -e .",
            settings.gpqa.module,
            settings.gpqa.python
        );
    }

    let http = build_http_client()?;
    tracing::info!("Checking server health...");
    if !check_server_health(&http, &base_url, settings.server.health_timeout()) {
        bail!("vLLM server is not responding at {}/health", base_url);
    }
    tracing::info!("Server is healthy");

    tracing::info!(
        "Running GPQA evaluation (this may take up to {}s)...",
        settings.gpqa.timeout_secs
    );
    let outcome = run_gpqa_eval(&settings.gpqa, &request).context("GPQA evaluation failed")?;

    print!("{}", outcome.output_block());

    if let Some(output_path) = &cli.output {
        let report = JsonReport {
            model: &cli.model,
            base_url: &base_url,
            reasoning_effort: &request.reasoning_effort,
            n_threads: request.n_threads,
            outcome: &outcome,
        };
        let json = serde_json::to_string_pretty(&report)?;
        std::fs::write(output_path, &json)
            .with_context(|| format!("Failed to write {}", output_path.display()))?;
        eprintln!("Detailed results saved to {}", output_path.display());
    }

    let Some(metric) = outcome.metric else {
        match outcome.exit_code {
            Some(code) if code != 0 => bail!("Evaluator exited with code {}", code),
            None => bail!("Evaluator was terminated by a signal"),
            _ => bail!("Failed to extract 'metric' from the evaluator output"),
        }
    };

    println!();
    print!("{}", MetricsReport::gpqa(metric).render());

    Ok(())
}
