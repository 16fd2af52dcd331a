use std::time::Duration;

use indicatif::{ProgressBar, ProgressStyle};
use serde::Serialize;
use tracing::{info, warn};

use super::accumulator::{NllAccumulator, PerplexityMetrics};
use super::window::{Window, expected_sliding_requests, fixed_chunks, sliding_windows};
use super::{LogprobSource, TokenCodec};
use crate::config::{PerplexityMode, Settings};

type Result<T> = crate::error::Result<T>;

/// Knobs for one perplexity run
#[derive(Debug, Clone)]
pub struct PerplexityOptions {
    pub mode: PerplexityMode,
    /// Tokens per request in chunked mode
    pub chunk_size: usize,
    /// Window length in sliding mode
    pub max_length: usize,
    /// Window advance in sliding mode
    pub stride: usize,
    /// Stop after this many windows
    pub max_chunks: Option<usize>,
    /// Sleep between consecutive requests
    pub delay: Duration,
    pub show_progress: bool,
}

impl PerplexityOptions {
    pub fn from_settings(settings: &Settings) -> Self {
        Self {
            mode: settings.perplexity.mode,
            chunk_size: settings.perplexity.chunk_size,
            max_length: settings.perplexity.max_length,
            stride: settings.perplexity.stride,
            max_chunks: None,
            delay: settings.request.delay(),
            show_progress: true,
        }
    }
}

/// Outcome of [`calculate_perplexity`]
#[derive(Debug, Clone, Serialize)]
pub struct PerplexityRun {
    pub total_tokens: usize,
    pub windows_planned: usize,
    pub chunks_ok: usize,
    pub chunks_failed: usize,
    /// `None` when not a single chunk could be scored
    pub metrics: Option<PerplexityMetrics>,
}

fn progress_bar(len: usize, show: bool) -> ProgressBar {
    if !show {
        return ProgressBar::hidden();
    }
    let pb = ProgressBar::new(len as u64);
    if let Ok(style) = ProgressStyle::default_bar()
        .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} ({per_sec}, ETA: {eta})")
    {
        pb.set_style(style.progress_chars("=>-"));
    }
    pb
}

/// Score `text` window by window against `source`.
///
/// Per-window failures (decode, HTTP, malformed body, missing log-probs) are
/// logged and the window is skipped. Only tokenization of the whole text,
/// decoding the covered prefix of a truncated run, and invalid window sizes
/// are errors; a run where every window failed comes back with
/// `metrics: None`.
pub fn calculate_perplexity<C, S>(
    text: &str,
    codec: &C,
    source: &mut S,
    options: &PerplexityOptions,
) -> Result<PerplexityRun>
where
    C: TokenCodec + ?Sized,
    S: LogprobSource + ?Sized,
{
    info!("Tokenizing text...");
    let tokens = codec.encode(text)?;
    let seq_len = tokens.len();
    info!("Total tokens: {}", seq_len);

    let mut windows: Vec<Window> = match options.mode {
        PerplexityMode::Chunked => {
            info!("Chunk size: {}", options.chunk_size);
            fixed_chunks(seq_len, options.chunk_size)?
        }
        PerplexityMode::Sliding => {
            info!(
                "Using sliding window with max_length={}, stride={}",
                options.max_length, options.stride
            );
            sliding_windows(seq_len, options.max_length, options.stride)?
        }
    };
    if let Some(max) = options.max_chunks
        && windows.len() > max
    {
        info!("Limiting run to {} of {} windows", max, windows.len());
        windows.truncate(max);
    }

    // Sliding mode normalises by the covered sequence, which is shorter than
    // the text when --max-chunks cut the plan.
    let covered_len = windows.iter().map(|w| w.end).max().unwrap_or(0);
    let planned = match options.mode {
        PerplexityMode::Chunked => windows.len(),
        PerplexityMode::Sliding => expected_sliding_requests(&windows, covered_len),
    };
    info!("Processing {} windows...", planned);

    let pb = progress_bar(planned, options.show_progress);
    let mut acc = NllAccumulator::new(options.mode);
    let mut chunks_ok = 0usize;
    let mut chunks_failed = 0usize;

    for (i, window) in windows.iter().enumerate() {
        if i > 0 && !options.delay.is_zero() {
            std::thread::sleep(options.delay);
        }

        let prompt = match codec.decode(&tokens[window.begin..window.end]) {
            Ok(p) => p,
            Err(e) => {
                warn!("Failed to decode chunk {}: {}, skipping", i, e);
                chunks_failed += 1;
                continue;
            }
        };

        let logprobs = match source.prompt_logprobs(&prompt) {
            Ok(lps) => lps,
            Err(e) => {
                warn!("Chunk {} failed: {}, skipping", i, error_chain(&e));
                chunks_failed += 1;
                continue;
            }
        };

        acc.record(*window, &logprobs);
        chunks_ok += 1;
        pb.inc(1);

        if options.mode == PerplexityMode::Sliding && window.end == covered_len {
            break;
        }
    }
    pb.finish_and_clear();

    // Byte metrics are normalised by the text the windows actually cover.
    let text_bytes = if covered_len < seq_len {
        codec.decode(&tokens[..covered_len])?.len()
    } else {
        text.len()
    };
    let metrics = acc.finish(covered_len, text_bytes);
    if metrics.is_none() {
        warn!("No valid perplexity values calculated");
    }

    Ok(PerplexityRun {
        total_tokens: seq_len,
        windows_planned: planned,
        chunks_ok,
        chunks_failed,
        metrics,
    })
}

/// `outer: inner: innermost` rendering for log lines.
fn error_chain(err: &dyn std::error::Error) -> String {
    let mut msg = err.to_string();
    let mut source = err.source();
    while let Some(s) = source {
        msg.push_str(": ");
        msg.push_str(&s.to_string());
        source = s.source();
    }
    msg
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::EvalError;
    use std::collections::VecDeque;

    /// One token per byte; decode is lossless for ASCII.
    struct ByteCodec;

    impl TokenCodec for ByteCodec {
        fn encode(&self, text: &str) -> Result<Vec<u32>> {
            Ok(text.bytes().map(u32::from).collect())
        }

        fn decode(&self, ids: &[u32]) -> Result<String> {
            Ok(ids.iter().map(|&b| b as u8 as char).collect())
        }
    }

    /// Replays scripted answers and records the prompts it saw.
    struct Scripted {
        answers: VecDeque<Result<Vec<Option<f64>>>>,
        prompts: Vec<String>,
    }

    impl Scripted {
        fn new(answers: Vec<Result<Vec<Option<f64>>>>) -> Self {
            Self {
                answers: answers.into(),
                prompts: Vec::new(),
            }
        }
    }

    impl LogprobSource for Scripted {
        fn prompt_logprobs(&mut self, prompt: &str) -> Result<Vec<Option<f64>>> {
            self.prompts.push(prompt.to_string());
            self.answers.pop_front().unwrap_or(Err(EvalError::NoChoices))
        }
    }

    /// Echoes a constant log-probability for every prompt token.
    struct Constant(f64);

    impl LogprobSource for Constant {
        fn prompt_logprobs(&mut self, prompt: &str) -> Result<Vec<Option<f64>>> {
            let mut lps = vec![None];
            lps.extend(std::iter::repeat_n(Some(self.0), prompt.len().saturating_sub(1)));
            Ok(lps)
        }
    }

    fn options(mode: PerplexityMode, size: usize) -> PerplexityOptions {
        PerplexityOptions {
            mode,
            chunk_size: size,
            max_length: size,
            stride: size / 2,
            max_chunks: None,
            delay: Duration::ZERO,
            show_progress: false,
        }
    }

    #[test]
    fn test_chunk_prompts_are_decoded_windows() {
        let mut source = Scripted::new(vec![
            Ok(vec![None, Some(-1.0), Some(-1.0), Some(-1.0)]),
            Ok(vec![None, Some(-1.0), Some(-1.0), Some(-1.0)]),
            Ok(vec![None, Some(-1.0)]),
        ]);
        let run = calculate_perplexity(
            "abcdefghij",
            &ByteCodec,
            &mut source,
            &options(PerplexityMode::Chunked, 4),
        )
        .unwrap();
        assert_eq!(source.prompts, vec!["abcd", "efgh", "ij"]);
        assert_eq!(run.chunks_ok, 3);
        assert_eq!(run.windows_planned, 3);
        let m = run.metrics.unwrap();
        assert_eq!(m.token_denominator, 7);
        assert!((m.word_perplexity - 1f64.exp()).abs() < 1e-12);
        assert_eq!(m.text_bytes, 10);
    }

    #[test]
    fn test_failed_chunk_is_skipped() {
        let mut source = Scripted::new(vec![
            Ok(vec![None, Some(-2.0)]),
            Err(EvalError::Status {
                url: "http://x/v1/completions".into(),
                status: 500,
            }),
            Err(EvalError::NoLogprobs),
        ]);
        let run = calculate_perplexity(
            "aabbcc",
            &ByteCodec,
            &mut source,
            &options(PerplexityMode::Chunked, 2),
        )
        .unwrap();
        assert_eq!(run.chunks_ok, 1);
        assert_eq!(run.chunks_failed, 2);
        let m = run.metrics.unwrap();
        assert_eq!(m.token_denominator, 1);
        assert!((m.word_perplexity - 2f64.exp()).abs() < 1e-12);
    }

    #[test]
    fn test_every_chunk_failing_gives_no_metrics() {
        let mut source = Scripted::new(vec![]);
        let run = calculate_perplexity(
            "abcdefgh",
            &ByteCodec,
            &mut source,
            &options(PerplexityMode::Chunked, 4),
        )
        .unwrap();
        assert_eq!(run.chunks_ok, 0);
        assert_eq!(run.chunks_failed, 2);
        assert!(run.metrics.is_none());
    }

    #[test]
    fn test_max_chunks_limits_requests() {
        let mut source = Constant(-0.5);
        let mut opts = options(PerplexityMode::Chunked, 4);
        opts.max_chunks = Some(2);
        let run = calculate_perplexity("abcdefghijklmnop", &ByteCodec, &mut source, &opts)
            .unwrap();
        assert_eq!(run.windows_planned, 2);
        assert_eq!(run.chunks_ok, 2);
    }

    #[test]
    fn test_max_chunks_normalises_bytes_by_covered_text() {
        let text = "x".repeat(4000);

        let mut opts = options(PerplexityMode::Chunked, 4);
        opts.max_chunks = Some(1);
        let run = calculate_perplexity(&text, &ByteCodec, &mut Constant(-0.5), &opts).unwrap();
        let m = run.metrics.unwrap();
        assert_eq!(m.text_bytes, 4);
        assert!((m.bits_per_byte - 1.5 / (4.0 * std::f64::consts::LN_2)).abs() < 1e-12);

        let mut opts = options(PerplexityMode::Sliding, 8);
        opts.max_chunks = Some(1);
        let run = calculate_perplexity(&text, &ByteCodec, &mut Constant(-0.5), &opts).unwrap();
        let m = run.metrics.unwrap();
        assert_eq!(m.token_denominator, 8);
        assert_eq!(m.text_bytes, 8);
        assert!((m.bits_per_byte - 3.5 / (8.0 * std::f64::consts::LN_2)).abs() < 1e-12);
    }

    #[test]
    fn test_full_run_uses_whole_text_bytes() {
        let text = "abcdefghijklmnop";
        let run = calculate_perplexity(
            text,
            &ByteCodec,
            &mut Constant(-0.5),
            &options(PerplexityMode::Sliding, 8),
        )
        .unwrap();
        assert_eq!(run.metrics.unwrap().text_bytes, text.len());
    }

    #[test]
    fn test_sliding_matches_constant_logprob() {
        // Every scored token has log-prob -0.5, so per-token NLL is 0.5 on
        // every covered position except the very first one.
        let text = "abcdefghijklmnopqrstuvwxyz0123";
        let mut source = Constant(-0.5);
        let run = calculate_perplexity(
            text,
            &ByteCodec,
            &mut source,
            &options(PerplexityMode::Sliding, 8),
        )
        .unwrap();
        let m = run.metrics.unwrap();
        assert_eq!(m.token_denominator, text.len());
        assert!((m.total_nll - 0.5 * (text.len() - 1) as f64).abs() < 1e-9);
        assert_eq!(run.chunks_ok, run.windows_planned);
    }

    #[test]
    fn test_sliding_stops_at_first_window_reaching_end() {
        let mut source = Constant(-1.0);
        let run = calculate_perplexity(
            "abcdefghij",
            &ByteCodec,
            &mut source,
            &options(PerplexityMode::Sliding, 6),
        )
        .unwrap();
        // windows [0,6) [3,9) [6,10) then stop before [9,10)
        assert_eq!(run.chunks_ok, 3);
    }

    #[test]
    fn test_sliding_retries_tail_when_last_window_fails() {
        let mut source = Scripted::new(vec![
            Ok(vec![None, Some(-1.0), Some(-1.0), Some(-1.0), Some(-1.0), Some(-1.0)]),
            Ok(vec![None, Some(-1.0), Some(-1.0), Some(-1.0), Some(-1.0), Some(-1.0)]),
            Err(EvalError::NoChoices),
            Ok(vec![Some(-1.0)]),
        ]);
        let run = calculate_perplexity(
            "abcdefghij",
            &ByteCodec,
            &mut source,
            &options(PerplexityMode::Sliding, 6),
        )
        .unwrap();
        assert_eq!(source.prompts.len(), 4);
        assert_eq!(source.prompts[3], "j");
        assert_eq!(run.chunks_failed, 1);
        assert_eq!(run.chunks_ok, 3);
    }

    #[test]
    fn test_empty_text_has_no_metrics() {
        let mut source = Constant(-1.0);
        let run = calculate_perplexity(
            "",
            &ByteCodec,
            &mut source,
            &options(PerplexityMode::Chunked, 4),
        )
        .unwrap();
        assert_eq!(run.windows_planned, 0);
        assert!(run.metrics.is_none());
    }

    #[test]
    fn test_zero_chunk_size_is_error() {
        let mut source = Constant(-1.0);
        let result = calculate_perplexity(
            "abc",
            &ByteCodec,
            &mut source,
            &options(PerplexityMode::Chunked, 0),
        );
        assert!(matches!(result, Err(EvalError::Config(_))));
    }

    #[test]
    fn test_error_chain() {
        let err = EvalError::MalformedResponse("expected value at line 1".into());
        assert_eq!(
            error_chain(&err),
            "malformed response body: expected value at line 1"
        );
    }
}
