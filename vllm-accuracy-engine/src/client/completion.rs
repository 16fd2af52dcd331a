//! `/v1/completions` wire types and the chunk request client

use std::time::Duration;

use reqwest::blocking::Client;
use serde::{Deserialize, Serialize};

use super::join_url;
use crate::config::RequestSettings;
use crate::error::EvalError;

type Result<T> = crate::error::Result<T>;

/// JSON body of a completion request.
///
/// `echo` makes the server return log-probabilities for the prompt tokens,
/// which is what perplexity scoring needs.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CompletionRequest {
    pub prompt: String,
    pub max_tokens: u32,
    pub temperature: f32,
    pub logprobs: u32,
    pub echo: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
}

impl CompletionRequest {
    /// Minimal payload used to find out whether an endpoint exists.
    pub fn probe(model: Option<&str>) -> Self {
        Self {
            prompt: "test".to_string(),
            max_tokens: 1,
            temperature: 0.0,
            logprobs: 1,
            echo: true,
            model: model.map(str::to_string),
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct CompletionResponse {
    #[serde(default)]
    pub choices: Option<Vec<Choice>>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Choice {
    #[serde(default)]
    pub logprobs: Option<ChoiceLogprobs>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ChoiceLogprobs {
    /// One entry per echoed token; the first prompt token has no
    /// log-probability and comes back as `null`.
    #[serde(default)]
    pub token_logprobs: Option<Vec<Option<f64>>>,
}

impl CompletionResponse {
    /// `choices[0].logprobs.token_logprobs`, rejecting empty or missing lists.
    pub fn token_logprobs(&self) -> Result<&[Option<f64>]> {
        let choice = self
            .choices
            .as_deref()
            .and_then(|choices| choices.first())
            .ok_or(EvalError::NoChoices)?;
        match choice
            .logprobs
            .as_ref()
            .and_then(|lp| lp.token_logprobs.as_deref())
        {
            Some(lps) if !lps.is_empty() => Ok(lps),
            _ => Err(EvalError::NoLogprobs),
        }
    }
}

/// Sends chunk prompts to the completion endpoint.
///
/// Until an endpoint has worked, every configured candidate is tried in order
/// and a 404 moves on to the next one. Once a call succeeds its endpoint is
/// remembered and used exclusively.
pub struct CompletionClient {
    http: Client,
    base_url: String,
    candidates: Vec<String>,
    working_endpoint: Option<String>,
    model: Option<String>,
    max_tokens: u32,
    logprobs: u32,
    temperature: f32,
    timeout: Duration,
}

impl CompletionClient {
    pub fn new(
        http: Client,
        base_url: &str,
        candidates: Vec<String>,
        model: Option<String>,
        request: &RequestSettings,
    ) -> Self {
        Self {
            http,
            base_url: base_url.to_string(),
            candidates,
            working_endpoint: None,
            model,
            max_tokens: request.max_tokens,
            logprobs: request.logprobs,
            temperature: request.temperature,
            timeout: request.timeout(),
        }
    }

    /// Pin the endpoint found by detection so no other candidate is tried.
    pub fn with_endpoint(mut self, endpoint: Option<String>) -> Self {
        self.working_endpoint = endpoint;
        self
    }

    pub fn working_endpoint(&self) -> Option<&str> {
        self.working_endpoint.as_deref()
    }

    fn request_for(&self, prompt: &str) -> CompletionRequest {
        CompletionRequest {
            prompt: prompt.to_string(),
            max_tokens: self.max_tokens,
            temperature: self.temperature,
            logprobs: self.logprobs,
            echo: true,
            model: self.model.clone(),
        }
    }

    /// POST `prompt` and return the parsed response.
    ///
    /// 404 falls through to the next candidate. Any other error status or a
    /// transport failure ends the call immediately.
    pub fn complete(&mut self, prompt: &str) -> Result<CompletionResponse> {
        let endpoints: Vec<String> = match &self.working_endpoint {
            Some(ep) => vec![ep.clone()],
            None => self.candidates.clone(),
        };
        let payload = self.request_for(prompt);

        let mut last_error: Option<EvalError> = None;
        for endpoint in &endpoints {
            let url = join_url(&self.base_url, endpoint);
            let response = self
                .http
                .post(&url)
                .timeout(self.timeout)
                .json(&payload)
                .send()
                .map_err(|source| EvalError::Transport {
                    url: url.clone(),
                    source,
                })?;

            let status = response.status();
            if status.as_u16() == 404 {
                last_error = Some(EvalError::Status { url, status: 404 });
                continue;
            }
            if !status.is_success() {
                return Err(EvalError::Status {
                    url,
                    status: status.as_u16(),
                });
            }

            let body: CompletionResponse = response
                .json()
                .map_err(|e| EvalError::MalformedResponse(e.into()))?;

            if self.working_endpoint.is_none() {
                tracing::info!("Using API endpoint: {}", endpoint);
                self.working_endpoint = Some(endpoint.clone());
            }
            return Ok(body);
        }

        Err(EvalError::AllEndpointsFailed {
            tried: endpoints,
            last: last_error.map_or_else(
                || "no endpoints configured".to_string(),
                |e| e.to_string(),
            ),
        })
    }
}
