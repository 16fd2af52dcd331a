use std::time::Duration;

use reqwest::blocking::Client;

use super::join_url;

/// `true` iff `GET {base_url}/health` answers 200 within `timeout`.
pub fn check_server_health(http: &Client, base_url: &str, timeout: Duration) -> bool {
    let url = join_url(base_url, "/health");
    match http.get(&url).timeout(timeout).send() {
        Ok(response) => response.status().as_u16() == 200,
        Err(e) => {
            tracing::debug!("Health check against {} failed: {}", url, e);
            false
        }
    }
}
