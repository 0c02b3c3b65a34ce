//! Outbound execution of a prepared request.

use super::PreparedRequest;
use std::time::Duration;
use tracing::debug;

/// Status and body of an attempted outbound call. Upstream failures are
/// surfaced by the caller as the item's recorded result, never a panic.
#[derive(Debug, Clone)]
pub struct ExecutionOutput {
    pub status: u16,
    pub body: String,
}

/// Build the shared outbound client: bounded timeouts, no redirects.
pub fn build_client(timeout_secs: u64) -> anyhow::Result<reqwest::Client> {
    let timeout_secs = if timeout_secs == 0 { 30 } else { timeout_secs };
    Ok(reqwest::Client::builder()
        .timeout(Duration::from_secs(timeout_secs))
        .connect_timeout(Duration::from_secs(10))
        .redirect(reqwest::redirect::Policy::none())
        .build()?)
}

/// Send a prepared request and capture status plus body text.
pub async fn send(
    client: &reqwest::Client,
    prepared: &PreparedRequest,
) -> anyhow::Result<ExecutionOutput> {
    debug!(url = %prepared.url, method = %prepared.method, "dispatching action call");

    let mut request = client.request(prepared.method.clone(), &prepared.url);
    for (name, value) in &prepared.headers {
        request = request.header(name, value);
    }
    if let Some(body) = &prepared.body {
        request = request.body(body.clone());
    }

    let response = request.send().await?;
    let status = response.status().as_u16();
    let body = response.text().await.unwrap_or_default();
    Ok(ExecutionOutput { status, body })
}
