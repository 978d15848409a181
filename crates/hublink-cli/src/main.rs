mod commands;

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "hublink", about = "Send commands to and follow subscriptions on a hub socket")]
struct Cli {
    /// Hub WebSocket URL (overrides the config file and HUBLINK_ENDPOINT)
    #[arg(long, global = true)]
    endpoint: Option<String>,

    /// Config file to load instead of the default location
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// How long to wait for the connection and for each reply
    #[arg(long, global = true, default_value = "10000")]
    timeout_ms: u64,

    /// Do not wait for the hub's welcome frame before sending
    #[arg(long, global = true)]
    no_wait_welcome: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Send one command and print the reply
    Send {
        /// Command key, e.g. WALLET:BALANCE
        key: String,

        /// JSON payload
        payload: Option<String>,
    },

    /// Subscribe and print every update as a JSON line
    Subscribe {
        /// Subscription key, e.g. MARKET:PRICE
        key: String,

        /// JSON arguments sent with the subscribe frame
        args: Option<String>,

        /// Stop after this many updates
        #[arg(long)]
        count: Option<usize>,
    },

    /// Connect and report the connection state
    Status,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "hublink=info,hublink_client=warn".into()),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let options = commands::Options::load(
        cli.config.as_deref(),
        cli.endpoint,
        cli.timeout_ms,
        !cli.no_wait_welcome,
    )?;

    match cli.command {
        Commands::Send { key, payload } => commands::send(&options, &key, payload.as_deref()).await,
        Commands::Subscribe { key, args, count } => {
            commands::subscribe(&options, &key, args.as_deref(), count).await
        }
        Commands::Status => commands::status(&options).await,
    }
}
