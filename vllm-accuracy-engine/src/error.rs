//! Error types for accuracy evaluation

/// Errors that can occur while talking to the server, loading inputs, or
/// running the external evaluator.
#[derive(Debug, thiserror::Error)]
pub enum EvalError {
    #[error("request to {url} failed")]
    Transport {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("server is not responding at {url}")]
    Unhealthy { url: String },

    #[error("{url} returned HTTP {status}")]
    Status { url: String, status: u16 },

    #[error("all API endpoints failed (tried {tried:?}): {last}")]
    AllEndpointsFailed { tried: Vec<String>, last: String },

    #[error("no choices in response")]
    NoChoices,

    #[error("no logprobs in response")]
    NoLogprobs,

    #[error("malformed response body")]
    MalformedResponse(#[source] Box<dyn std::error::Error + Send + Sync>),

    #[error("dataset load failed")]
    Dataset(#[source] Box<dyn std::error::Error + Send + Sync>),

    #[error("download failed")]
    Download(#[source] Box<dyn std::error::Error + Send + Sync>),

    #[error("tokenizer load failed")]
    TokenizerLoad(#[source] Box<dyn std::error::Error + Send + Sync>),

    #[error("tokenization failed")]
    Tokenize(#[source] Box<dyn std::error::Error + Send + Sync>),

    #[error("failed to run evaluator `{program}`")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("evaluator timed out after {0}s")]
    Timeout(u64),

    #[error("invalid configuration: {0}")]
    Config(String),
}

impl EvalError {
    /// `true` when the server answered 404 (the endpoint does not exist).
    pub fn is_not_found(&self) -> bool {
        matches!(self, EvalError::Status { status: 404, .. })
    }
}

pub type Result<T> = std::result::Result<T, EvalError>;
