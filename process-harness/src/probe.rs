use anyhow::{anyhow, Context, Result};
use std::net::{Ipv4Addr, TcpListener};
use std::time::Duration;

/// Status and body of a successful probe.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProbeResponse {
    pub status: u16,
    pub body: String,
}

/// Poll `http://127.0.0.1:{port}{path}` until a response arrives.
///
/// Sleeps `interval` before every one of the `attempts`, and gives each request a second to complete.
/// Any HTTP response counts as success, whatever its status.
pub async fn probe_http(
    port: u16,
    path: &str,
    attempts: usize,
    interval: Duration,
) -> Result<ProbeResponse> {
    let url = format!("http://127.0.0.1:{port}{path}");
    let client = reqwest::Client::builder()
        .timeout(Duration::from_secs(1))
        .no_proxy()
        .build()
        .context("Failed to build the HTTP client")?;

    let mut last_error = None;
    for _ in 0..attempts {
        tokio::time::sleep(interval).await;
        match client.get(&url).send().await {
            Ok(response) => {
                let status = response.status().as_u16();
                let body = response
                    .text()
                    .await
                    .with_context(|| format!("Failed to read the body of {url}"))?;
                return Ok(ProbeResponse { status, body });
            }
            Err(err) => last_error = Some(err),
        }
    }

    match last_error {
        Some(err) => Err(anyhow!(err).context(format!("No response from {url} after {attempts} attempts"))),
        None => Err(anyhow!("No attempts were made to probe {url}")),
    }
}

/// A port that nothing was listening on a moment ago.
///
/// Another process may still claim it before it is used, which is acceptable for tests.
pub fn free_port() -> u16 {
    TcpListener::bind((Ipv4Addr::LOCALHOST, 0))
        .and_then(|listener| listener.local_addr())
        .map(|addr| addr.port())
        .expect("Failed to ask the OS for a free port")
}
