pub mod hub;

use anyhow::{Context, Result};
use hublink_client::{ConnectionState, Session};
use std::time::Duration;

use crate::test_config;

/// How long scenario steps wait before giving up.
pub const STEP_TIMEOUT: Duration = Duration::from_secs(5);

/// Open a WebSocket session to `endpoint` and wait for the hub's welcome.
pub async fn connect_ready(endpoint: &str) -> Result<Session> {
    let session = Session::websocket(test_config(endpoint));
    session.connect().await;
    tokio::time::timeout(STEP_TIMEOUT, session.wait_ready())
        .await
        .context("timed out waiting for welcome")??;
    Ok(session)
}

/// Wait until the session reports `state`.
pub async fn wait_for_state(session: &Session, state: ConnectionState) -> Result<()> {
    let mut watch = session.watch_state();
    tokio::time::timeout(STEP_TIMEOUT, watch.wait_for(|current| *current == state))
        .await
        .with_context(|| format!("timed out waiting for {state}"))?
        .context("session dropped")?;
    Ok(())
}

/// Poll `check` until it holds, or fail after [`STEP_TIMEOUT`].
pub async fn poll_until<F>(what: &str, mut check: F) -> Result<()>
where
    F: FnMut() -> bool,
{
    let deadline = tokio::time::Instant::now() + STEP_TIMEOUT;
    while !check() {
        if tokio::time::Instant::now() >= deadline {
            anyhow::bail!("timed out waiting for {what}");
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    Ok(())
}
