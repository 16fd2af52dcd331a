//! GPQA accuracy through the external `gpt_oss.evals` evaluator
//!
//! The evaluator does all the work against the server's `/v1` API. This module
//! only builds its command line, enforces the timeout, and pulls the
//! `'metric': <float>` line out of its stdout.

use std::io::Read;
use std::process::{Child, Command, ExitStatus, Stdio};
use std::sync::OnceLock;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use regex::Regex;
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::config::GpqaSettings;
use crate::error::EvalError;

type Result<T> = crate::error::Result<T>;

const POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Strip trailing slashes and make sure the URL ends in `/v1`.
pub fn ensure_v1_base_url(base_url: &str) -> String {
    let base_url = base_url.trim_end_matches('/');
    if base_url.ends_with("/v1") {
        base_url.to_string()
    } else {
        format!("{base_url}/v1")
    }
}

fn metric_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"'metric':\s*([\d.]+)").expect("metric pattern must compile"))
}

/// First `'metric': <float>` value in `stdout`.
pub fn extract_metric(stdout: &str) -> Option<f64> {
    let caps = metric_regex().captures(stdout)?;
    caps.get(1)?.as_str().parse().ok()
}

/// Top-level package of a dotted module path (`gpt_oss.evals` -> `gpt_oss`).
fn top_level_package(module: &str) -> &str {
    module.split('.').next().unwrap_or(module)
}

/// `true` when `python -c "import <package>"` succeeds.
pub fn evaluator_available(settings: &GpqaSettings) -> bool {
    let package = top_level_package(&settings.module);
    match Command::new(&settings.python)
        .args(["-c", &format!("import {package}")])
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status()
    {
        Ok(status) => status.success(),
        Err(e) => {
            debug!("Could not run {}: {}", settings.python, e);
            false
        }
    }
}

/// Parameters of one evaluator run
#[derive(Debug, Clone)]
pub struct GpqaRequest {
    pub model: String,
    /// Server URL including the `/v1` suffix
    pub base_url_v1: String,
    pub reasoning_effort: String,
    pub n_threads: u32,
    pub timeout: Duration,
}

/// What the evaluator produced
#[derive(Debug, Clone, Serialize)]
pub struct GpqaOutcome {
    /// `None` on non-zero exit or when no metric line was printed
    pub metric: Option<f64>,
    /// stdout, then stderr on a new line when there was any
    pub output: String,
    pub exit_code: Option<i32>,
}

impl GpqaOutcome {
    /// Evaluator output as echoed to stdout before the metric blocks.
    pub fn output_block(&self) -> String {
        format!("Evaluation process output:\n {}\n", self.output)
    }
}

/// Arguments passed after the interpreter.
pub fn evaluator_args(settings: &GpqaSettings, request: &GpqaRequest) -> Vec<String> {
    vec![
        "-m".to_string(),
        settings.module.clone(),
        "--eval".to_string(),
        settings.eval.clone(),
        "--model".to_string(),
        request.model.clone(),
        "--reasoning-effort".to_string(),
        request.reasoning_effort.clone(),
        "--base-url".to_string(),
        request.base_url_v1.clone(),
        "--n-threads".to_string(),
        request.n_threads.to_string(),
    ]
}

fn drain<R: Read + Send + 'static>(pipe: Option<R>) -> JoinHandle<Vec<u8>> {
    std::thread::spawn(move || {
        let mut buf = Vec::new();
        if let Some(mut pipe) = pipe {
            pipe.read_to_end(&mut buf).ok();
        }
        buf
    })
}

fn wait_with_timeout(child: &mut Child, timeout: Duration) -> Result<ExitStatus> {
    let start = Instant::now();
    loop {
        match child.try_wait() {
            Ok(Some(status)) => return Ok(status),
            Ok(None) => {
                if start.elapsed() >= timeout {
                    child.kill().ok();
                    child.wait().ok();
                    return Err(EvalError::Timeout(timeout.as_secs()));
                }
                std::thread::sleep(POLL_INTERVAL);
            }
            Err(source) => {
                return Err(EvalError::Spawn {
                    program: "evaluator".to_string(),
                    source,
                });
            }
        }
    }
}

/// Run the evaluator and parse its metric.
///
/// Spawn failures and timeouts are errors. A non-zero exit or a missing metric
/// line is an `Ok` outcome with `metric: None`, so the caller can still show
/// the evaluator's output.
pub fn run_gpqa_eval(settings: &GpqaSettings, request: &GpqaRequest) -> Result<GpqaOutcome> {
    let args = evaluator_args(settings, request);
    info!("Running {} {}", settings.python, args.join(" "));

    let mut cmd = Command::new(&settings.python);
    cmd.args(&args)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped());
    if std::env::var_os("OPENAI_API_KEY").is_none() {
        cmd.env("OPENAI_API_KEY", &settings.api_key);
    }

    let mut child = cmd.spawn().map_err(|source| EvalError::Spawn {
        program: settings.python.clone(),
        source,
    })?;
    let stdout_reader = drain(child.stdout.take());
    let stderr_reader = drain(child.stderr.take());

    let status = wait_with_timeout(&mut child, request.timeout);
    let stdout_bytes = stdout_reader.join().unwrap_or_default();
    let stderr_bytes = stderr_reader.join().unwrap_or_default();
    let status = status?;

    // The evaluator echoes model output, which is not guaranteed to be UTF-8.
    let stdout = String::from_utf8_lossy(&stdout_bytes).into_owned();
    let stderr = String::from_utf8_lossy(&stderr_bytes);
    let mut output = stdout.clone();
    if !stderr.is_empty() {
        output.push('\n');
        output.push_str(&stderr);
    }

    let metric = if status.success() {
        let metric = extract_metric(&stdout);
        if metric.is_none() {
            warn!("Evaluator output has no 'metric' line");
        }
        metric
    } else {
        warn!("Evaluator exited with {}", status);
        None
    };

    Ok(GpqaOutcome {
        metric,
        output,
        exit_code: status.code(),
    })
}
