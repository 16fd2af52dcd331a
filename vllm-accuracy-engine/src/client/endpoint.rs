//! Completion endpoint detection
//!
//! Servers disagree on where the completion API lives, so the path is found by
//! POSTing a tiny probe payload and looking at the status code.

use std::fmt;
use std::time::Duration;

use reqwest::blocking::Client;
use tracing::{info, warn};

use super::completion::CompletionRequest;
use super::join_url;
use crate::config::ProbeSettings;

/// HTTP method of a diagnostic probe
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Method {
    Get,
    Post,
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(match self {
            Method::Get => "GET",
            Method::Post => "POST",
        })
    }
}

/// What a single probe found out about a path
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProbeOutcome {
    /// Path exists and accepted (or validated) the probe payload
    Usable(u16),
    /// Path exists but answered with some other status
    Unusable(u16),
    NotFound,
    /// No HTTP status at all (connection refused, timeout, ...)
    Failed(String),
}

impl ProbeOutcome {
    fn from_status(status: u16, usable_statuses: &[u16]) -> Self {
        if status == 404 {
            ProbeOutcome::NotFound
        } else if usable_statuses.contains(&status) {
            ProbeOutcome::Usable(status)
        } else {
            ProbeOutcome::Unusable(status)
        }
    }

    /// Status code for anything that is not a 404 or a transport failure.
    pub fn existing_status(&self) -> Option<u16> {
        match self {
            ProbeOutcome::Usable(s) | ProbeOutcome::Unusable(s) => Some(*s),
            ProbeOutcome::NotFound | ProbeOutcome::Failed(_) => None,
        }
    }
}

/// POST the probe payload to `base_url + path` and classify the answer.
pub fn probe_endpoint(
    http: &Client,
    base_url: &str,
    path: &str,
    model: Option<&str>,
    timeout: Duration,
    usable_statuses: &[u16],
) -> ProbeOutcome {
    send_probe(http, base_url, path, Method::Post, model, timeout, usable_statuses)
}

fn send_probe(
    http: &Client,
    base_url: &str,
    path: &str,
    method: Method,
    model: Option<&str>,
    timeout: Duration,
    usable_statuses: &[u16],
) -> ProbeOutcome {
    let url = join_url(base_url, path);
    let request = match method {
        Method::Get => http.get(&url),
        Method::Post => http.post(&url).json(&CompletionRequest::probe(model)),
    };
    match request.timeout(timeout).send() {
        Ok(response) => ProbeOutcome::from_status(response.status().as_u16(), usable_statuses),
        Err(e) => ProbeOutcome::Failed(e.to_string()),
    }
}

/// Return the first candidate endpoint that answers with a usable status.
///
/// A 404 means the path does not exist. Any other status means it exists, but
/// only the configured usable statuses (200/400/422 by default) end the
/// search. `None` means nothing usable was found.
pub fn detect_api_endpoint(
    http: &Client,
    base_url: &str,
    model: Option<&str>,
    probe: &ProbeSettings,
) -> Option<String> {
    for endpoint in &probe.endpoints {
        let outcome = probe_endpoint(
            http,
            base_url,
            endpoint,
            model,
            probe.timeout(),
            &probe.usable_statuses,
        );
        match outcome {
            ProbeOutcome::Usable(status) => {
                info!("Testing {}... HTTP {}", endpoint, status);
                info!("Detected working API endpoint: {}", endpoint);
                return Some(endpoint.clone());
            }
            ProbeOutcome::Unusable(status) => {
                info!("Testing {}... HTTP {}", endpoint, status);
                warn!("Endpoint {} exists but returned {}", endpoint, status);
            }
            ProbeOutcome::NotFound => {
                info!("Testing {}... HTTP 404", endpoint);
            }
            ProbeOutcome::Failed(e) => {
                warn!("Testing {}... error: {}", endpoint, e);
            }
        }
    }

    warn!("Could not detect API endpoint");
    None
}

/// Paths swept by [`explore_server_endpoints`]
pub const EXPLORE_PROBES: &[(&str, Method)] = &[
    ("/", Method::Get),
    ("/health", Method::Get),
    ("/v1/models", Method::Get),
    ("/models", Method::Get),
    ("/docs", Method::Get),
    ("/openapi.json", Method::Get),
    ("/v1/completions", Method::Get),
    ("/v1/completions", Method::Post),
    ("/v1/chat/completions", Method::Post),
];

/// One row of the exploration sweep
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExploreResult {
    pub path: String,
    pub method: Method,
    pub outcome: ProbeOutcome,
}

impl ExploreResult {
    pub fn is_available(&self) -> bool {
        self.outcome.existing_status().is_some()
    }
}

/// Diagnostic sweep over common server paths.
///
/// Purely informational: the caller prints the rows and carries on whatever
/// they say.
pub fn explore_server_endpoints(
    http: &Client,
    base_url: &str,
    model: Option<&str>,
    timeout: Duration,
) -> Vec<ExploreResult> {
    EXPLORE_PROBES
        .iter()
        .map(|&(path, method)| ExploreResult {
            path: path.to_string(),
            method,
            outcome: send_probe(http, base_url, path, method, model, timeout, &[]),
        })
        .collect()
}
