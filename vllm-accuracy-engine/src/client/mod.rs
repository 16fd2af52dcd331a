//! HTTP plumbing for an OpenAI-compatible completion server
//!
//! Everything here is blocking and sequential: one request in flight at a time.

mod completion;
mod endpoint;
mod health;

pub use completion::{
    Choice, ChoiceLogprobs, CompletionClient, CompletionRequest, CompletionResponse,
};
pub use endpoint::{
    EXPLORE_PROBES, ExploreResult, Method, ProbeOutcome, detect_api_endpoint,
    explore_server_endpoints, probe_endpoint,
};
pub use health::check_server_health;

use crate::config::Settings;
use crate::error::EvalError;
type Result<T> = crate::error::Result<T>;

const USER_AGENT: &str = concat!("vllm-accuracy/", env!("CARGO_PKG_VERSION"));

/// Build the shared blocking HTTP client.
///
/// No client-wide timeout is set; each call site passes its own.
pub fn build_http_client() -> Result<reqwest::blocking::Client> {
    reqwest::blocking::Client::builder()
        .user_agent(USER_AGENT)
        .build()
        .map_err(|e| EvalError::Config(format!("HTTP client initialization failed: {e}")))
}

/// Join a base URL and an absolute path without doubling the slash.
pub fn join_url(base_url: &str, path: &str) -> String {
    format!("{}{}", base_url.trim_end_matches('/'), path)
}

/// What [`connect`] learned about the server
#[derive(Debug, Clone)]
pub struct ServerConnection {
    /// Completion path that answered the probe with a usable status
    pub endpoint: String,
    /// Diagnostic sweep rows, empty when exploration was skipped
    pub explored: Vec<ExploreResult>,
}

/// Health check, optional diagnostic sweep, then endpoint detection.
///
/// Everything a perplexity run needs from the server before any text or
/// tokenizer is loaded. An unhealthy server or no usable endpoint is an error.
pub fn connect(
    http: &reqwest::blocking::Client,
    base_url: &str,
    model: Option<&str>,
    settings: &Settings,
    explore: bool,
) -> Result<ServerConnection> {
    tracing::info!("Checking server health...");
    if !check_server_health(http, base_url, settings.server.health_timeout()) {
        return Err(EvalError::Unhealthy {
            url: join_url(base_url, "/health"),
        });
    }
    tracing::info!("Server is healthy");

    let explored = if explore {
        explore_server_endpoints(http, base_url, model, settings.probe.explore_timeout())
    } else {
        Vec::new()
    };

    tracing::info!("Detecting completion API endpoint...");
    let endpoint = detect_api_endpoint(http, base_url, model, &settings.probe).ok_or_else(|| {
        EvalError::AllEndpointsFailed {
            tried: settings.probe.endpoints.clone(),
            last: "no endpoint answered with a usable status".to_string(),
        }
    })?;
    tracing::info!("Will use endpoint: {}", endpoint);

    Ok(ServerConnection { endpoint, explored })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_join_url() {
        assert_eq!(
            join_url("http://0.0.0.0:8888", "/v1/completions"),
            "http://0.0.0.0:8888/v1/completions"
        );
        assert_eq!(
            join_url("http://0.0.0.0:8888/", "/health"),
            "http://0.0.0.0:8888/health"
        );
    }

    #[test]
    fn test_build_http_client() {
        assert!(build_http_client().is_ok());
    }
}
