//! Perplexity and bits-per-byte over echoed prompt log-probabilities
//!
//! The text is tokenized locally, cut into windows, each window is decoded back
//! to text and sent with `echo: true`, and the returned per-token
//! log-probabilities are summed into a single negative log-likelihood.

mod accumulator;
mod runner;
pub mod window;

pub use accumulator::{NllAccumulator, PerplexityMetrics};
pub use runner::{PerplexityOptions, PerplexityRun, calculate_perplexity};
pub use window::Window;

use crate::client::CompletionClient;

type Result<T> = crate::error::Result<T>;

/// Text <-> token id conversion used to build window prompts.
pub trait TokenCodec {
    /// Encode without adding special tokens.
    fn encode(&self, text: &str) -> Result<Vec<u32>>;
    fn decode(&self, ids: &[u32]) -> Result<String>;
}

/// Anything that can score a prompt and hand back one log-probability per
/// echoed token (`None` where the server has none).
pub trait LogprobSource {
    fn prompt_logprobs(&mut self, prompt: &str) -> Result<Vec<Option<f64>>>;
}

impl LogprobSource for CompletionClient {
    fn prompt_logprobs(&mut self, prompt: &str) -> Result<Vec<Option<f64>>> {
        let response = self.complete(prompt)?;
        Ok(response.token_logprobs()?.to_vec())
    }
}
