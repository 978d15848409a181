use anyhow::{Context, bail};
use futures_util::StreamExt;
use hublink_client::{ClientConfig, ConnectionState, Session, SessionError};
use serde_json::Value;
use std::path::Path;
use std::time::Duration;
use tracing::debug;

/// How long to wait for the close handshake before exiting.
const CLOSE_GRACE: Duration = Duration::from_millis(500);

/// Settings shared by every subcommand.
pub struct Options {
    pub config: ClientConfig,
    pub timeout: Duration,
    pub wait_welcome: bool,
}

impl Options {
    pub fn load(
        config_path: Option<&Path>,
        endpoint: Option<String>,
        timeout_ms: u64,
        wait_welcome: bool,
    ) -> anyhow::Result<Self> {
        let mut config = match config_path {
            Some(path) => ClientConfig::load_from(path)?,
            None => ClientConfig::load()?,
        };
        if let Some(endpoint) = endpoint {
            config.endpoint = endpoint;
        }
        config.request_timeout_ms = Some(timeout_ms);
        Ok(Self {
            config,
            timeout: Duration::from_millis(timeout_ms),
            wait_welcome,
        })
    }
}

/// Send one command and print the reply.
pub async fn send(options: &Options, key: &str, payload: Option<&str>) -> anyhow::Result<()> {
    let payload = payload.map(parse_json).transpose()?;
    let session = open(options).await?;

    match session.send(key, payload).await {
        Ok(reply) => println!("{}", serde_json::to_string_pretty(&reply)?),
        Err(SessionError::Remote(message)) => {
            eprintln!("error: {message}");
            shutdown(&session).await;
            std::process::exit(1);
        }
        Err(err) => return Err(err).with_context(|| format!("{key} failed")),
    }

    shutdown(&session).await;
    Ok(())
}

/// Subscribe and print updates until `count` is reached, the connection
/// drops, or Ctrl+C.
pub async fn subscribe(
    options: &Options,
    key: &str,
    args: Option<&str>,
    count: Option<usize>,
) -> anyhow::Result<()> {
    let args = args.map(parse_json).transpose()?;
    let session = open(options).await?;
    let mut updates = session
        .subscribe_stream(key, args)
        .with_context(|| format!("failed to subscribe to {key}"))?;
    let mut state = session.watch_state();

    let mut received = 0usize;
    let outcome = loop {
        if count.is_some_and(|limit| received >= limit) {
            break Ok(());
        }
        tokio::select! {
            update = updates.next() => {
                let Some(update) = update else {
                    break Ok(());
                };
                println!("{}", serde_json::to_string(&update)?);
                received += 1;
            }
            closed = state.wait_for(|s| *s == ConnectionState::Closed) => {
                drop(closed);
                break Err(anyhow::anyhow!("connection to {} closed", session.endpoint()));
            }
            _ = tokio::signal::ctrl_c() => break Ok(()),
        }
    };

    // Dropping the stream sends the unsubscribe frame ahead of the close.
    drop(updates);
    shutdown(&session).await;
    outcome
}

/// Connect and report the connection state.
pub async fn status(options: &Options) -> anyhow::Result<()> {
    let session = Session::websocket(options.config.clone());
    session.connect().await;

    let opened = tokio::time::timeout(options.timeout, session.wait_open()).await;
    if matches!(opened, Ok(Ok(()))) && options.wait_welcome {
        let _ = tokio::time::timeout(options.timeout, session.wait_ready()).await;
    }

    let state = session.state();
    println!("endpoint: {}", session.endpoint());
    println!("state:    {state}");
    println!("ready:    {}", session.is_ready());

    shutdown(&session).await;
    if state != ConnectionState::Open {
        std::process::exit(1);
    }
    Ok(())
}

async fn open(options: &Options) -> anyhow::Result<Session> {
    let session = Session::websocket(options.config.clone());
    session.connect().await;

    let endpoint = session.endpoint().to_string();
    debug!(endpoint = %endpoint, wait_welcome = options.wait_welcome, "waiting for hub");
    let waited = if options.wait_welcome {
        tokio::time::timeout(options.timeout, session.wait_ready()).await
    } else {
        tokio::time::timeout(options.timeout, session.wait_open()).await
    };
    match waited {
        Ok(Ok(())) => Ok(session),
        Ok(Err(_)) => bail!("could not connect to hub at {endpoint}"),
        Err(_) => bail!(
            "hub at {endpoint} was not ready within {}ms",
            options.timeout.as_millis()
        ),
    }
}

async fn shutdown(session: &Session) {
    session.close();
    let mut state = session.watch_state();
    let _ = tokio::time::timeout(
        CLOSE_GRACE,
        state.wait_for(|s| *s == ConnectionState::Closed),
    )
    .await;
}

fn parse_json(raw: &str) -> anyhow::Result<Value> {
    serde_json::from_str(raw).with_context(|| format!("invalid JSON: {raw}"))
}
