//! Shared helpers for integration tests.

use anyhow::Context as _;
use std::time::{Duration, Instant};

/// Pick an unused TCP port on localhost.
///
/// Note: this does not reserve the port; it's still possible for another
/// process to bind it before you do.
///
/// # Errors
///
/// Returns an error if binding an ephemeral localhost port fails or if the
/// bound socket's local address cannot be read.
pub fn pick_unused_port() -> anyhow::Result<u16> {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").context("bind ephemeral port")?;
    Ok(listener.local_addr()?.port())
}

/// Serve an axum router on an ephemeral localhost port in the background.
/// Returns the base URL, e.g. `http://127.0.0.1:49231`.
///
/// # Errors
///
/// Returns an error if the listener cannot be bound.
pub async fn serve_in_background(app: axum::Router) -> anyhow::Result<String> {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .context("bind ephemeral port")?;
    let addr = listener.local_addr()?;
    tokio::spawn(async move {
        let _ = axum::serve(listener, app).await;
    });
    Ok(format!("http://{addr}"))
}

/// Poll an HTTP URL until it returns a 2xx status.
///
/// # Errors
///
/// Returns an error if the timeout elapses before the endpoint returns a
/// success status.
pub async fn wait_http_ok(url: &str, timeout_dur: Duration) -> anyhow::Result<()> {
    let client = reqwest::Client::new();
    let start = Instant::now();
    loop {
        if start.elapsed() > timeout_dur {
            anyhow::bail!("timed out waiting for {url}");
        }

        match client.get(url).send().await {
            Ok(resp) if resp.status().is_success() => return Ok(()),
            _ => tokio::time::sleep(Duration::from_millis(200)).await,
        }
    }
}
