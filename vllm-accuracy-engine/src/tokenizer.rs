//! HuggingFace tokenizer download and loading
//!
//! The server tokenizes prompts itself, but window boundaries are chosen in
//! token space, so the same `tokenizer.json` is needed locally.

use std::path::{Path, PathBuf};

use hf_hub::{Repo, RepoType, api::sync::ApiBuilder};

use crate::error::EvalError;
use crate::perplexity::TokenCodec;

type Result<T> = crate::error::Result<T>;

/// Download a file from a HuggingFace model repository.
///
/// Returns the local path to the downloaded file.
/// The file is cached in the HuggingFace cache directory (~/.cache/huggingface/hub/).
///
/// # Environment Variables
/// * `HF_TOKEN` - HuggingFace API token (required for gated repositories)
pub fn download_model_file(repo_id: &str, filename: &str) -> Result<PathBuf> {
    let mut builder = ApiBuilder::new();
    if let Ok(token) = std::env::var("HF_TOKEN") {
        builder = builder.with_token(Some(token));
    }
    let api = builder
        .build()
        .map_err(|e| EvalError::Download(e.into()))?;

    let repo = api.repo(Repo::new(repo_id.to_string(), RepoType::Model));

    tracing::info!("Downloading {} from {}...", filename, repo_id);

    let path = repo
        .get(filename)
        .map_err(|e| EvalError::Download(e.into()))?;

    tracing::info!("Downloaded to {:?}", path);

    Ok(path)
}

/// Get the local path to `tokenizer.json` for a model repo, downloading if necessary.
pub fn get_tokenizer_path(repo_id: &str) -> Result<PathBuf> {
    download_model_file(repo_id, "tokenizer.json")
}

/// A `tokenizers::Tokenizer` with padding and truncation disabled.
pub struct HfTokenizer {
    inner: tokenizers::Tokenizer,
}

impl HfTokenizer {
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let mut inner =
            tokenizers::Tokenizer::from_file(path.as_ref()).map_err(EvalError::TokenizerLoad)?;
        // Windows are cut by us; padding or truncation would shift them.
        inner.with_padding(None);
        inner.with_truncation(None).ok();
        Ok(Self { inner })
    }

    pub fn vocab_size(&self) -> usize {
        self.inner.get_vocab_size(true)
    }
}

impl TokenCodec for HfTokenizer {
    fn encode(&self, text: &str) -> Result<Vec<u32>> {
        let encoding = self
            .inner
            .encode(text, false)
            .map_err(EvalError::Tokenize)?;
        Ok(encoding.get_ids().to_vec())
    }

    fn decode(&self, ids: &[u32]) -> Result<String> {
        self.inner.decode(ids, false).map_err(EvalError::Tokenize)
    }
}

/// Load the tokenizer for `model`: from `override_path` when given, otherwise
/// `tokenizer.json` from the model's HuggingFace repo.
pub fn load_tokenizer(model: &str, override_path: Option<&Path>) -> Result<HfTokenizer> {
    let path = match override_path {
        Some(p) => p.to_path_buf(),
        None => get_tokenizer_path(model)?,
    };
    tracing::info!("Loading tokenizer from {}", path.display());
    let tokenizer = HfTokenizer::from_file(&path)?;
    tracing::info!("Tokenizer loaded ({} tokens in vocabulary)", tokenizer.vocab_size());
    Ok(tokenizer)
}
