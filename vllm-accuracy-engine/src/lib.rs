pub mod client;
pub mod config;
pub mod dataset;
pub mod error;
pub mod gpqa;
pub mod perplexity;
pub mod report;
pub mod tokenizer;

pub use client::{
    CompletionClient, ServerConnection, build_http_client, check_server_health, connect,
    detect_api_endpoint,
};
pub use config::{PerplexityMode, Settings};
pub use error::EvalError;
pub use perplexity::{LogprobSource, PerplexityMetrics, TokenCodec, calculate_perplexity};
pub use report::MetricsReport;
pub use tokenizer::{HfTokenizer, load_tokenizer};
