//! Running negative log-likelihood and the metrics derived from it

use serde::Serialize;

use super::window::Window;
use crate::config::PerplexityMode;

/// Final perplexity figures for one run
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct PerplexityMetrics {
    /// `exp(total_nll / tokens)`
    pub word_perplexity: f64,
    /// `exp(total_nll / text_bytes)`
    pub byte_perplexity: f64,
    /// `total_nll / (text_bytes * ln 2)`
    pub bits_per_byte: f64,
    pub total_nll: f64,
    /// Token count the word perplexity was normalised by
    pub token_denominator: usize,
    pub text_bytes: usize,
}

/// Accumulates echoed log-probabilities chunk by chunk.
///
/// Only successfully parsed chunks reach [`NllAccumulator::record`]; a failed
/// chunk leaves every field untouched.
#[derive(Debug, Clone)]
pub struct NllAccumulator {
    mode: PerplexityMode,
    total_nll: f64,
    scored_tokens: usize,
    /// End of the last window that was recorded (sliding mode)
    prev_end: usize,
}

impl NllAccumulator {
    pub fn new(mode: PerplexityMode) -> Self {
        Self {
            mode,
            total_nll: 0.0,
            scored_tokens: 0,
            prev_end: 0,
        }
    }

    pub fn total_nll(&self) -> f64 {
        self.total_nll
    }

    pub fn scored_tokens(&self) -> usize {
        self.scored_tokens
    }

    /// Add one chunk's echoed `token_logprobs` and return how many tokens
    /// were scored.
    ///
    /// `null` entries (the first prompt token has no log-probability) are
    /// skipped. In sliding mode only the trailing `window.end - prev_end`
    /// entries count, so overlapping context is never scored twice.
    pub fn record(&mut self, window: Window, token_logprobs: &[Option<f64>]) -> usize {
        if window.is_empty() {
            return 0;
        }
        let considered = match self.mode {
            PerplexityMode::Chunked => token_logprobs,
            PerplexityMode::Sliding => {
                let trg_len = window.end.saturating_sub(self.prev_end);
                &token_logprobs[token_logprobs.len().saturating_sub(trg_len)..]
            }
        };

        let mut n = 0;
        let mut sum = 0.0;
        for lp in considered.iter().flatten() {
            sum += lp;
            n += 1;
        }
        self.total_nll -= sum;
        self.scored_tokens += n;
        self.prev_end = window.end;
        n
    }

    /// Turn the accumulated NLL into metrics.
    ///
    /// `seq_len` normalises word perplexity in sliding mode; chunked mode uses
    /// the number of scored tokens. Returns `None` when nothing was scored.
    pub fn finish(&self, seq_len: usize, text_bytes: usize) -> Option<PerplexityMetrics> {
        if self.scored_tokens == 0 {
            return None;
        }
        let token_denominator = match self.mode {
            PerplexityMode::Chunked => self.scored_tokens,
            PerplexityMode::Sliding => seq_len,
        };
        if token_denominator == 0 || text_bytes == 0 {
            return None;
        }

        let nll = self.total_nll;
        let bytes = text_bytes as f64;
        Some(PerplexityMetrics {
            word_perplexity: (nll / token_denominator as f64).exp(),
            byte_perplexity: (nll / bytes).exp(),
            bits_per_byte: nll / (bytes * std::f64::consts::LN_2),
            total_nll: nll,
            token_denominator,
            text_bytes,
        })
    }
}
