//! chainfeed CLI: watch feeds and send requests from the terminal.
//!
//! Usage:
//! ```bash
//! # Print new blocks from a gateway
//! chainfeed subscribe --gateway-url ws://127.0.0.1:28333/ws --auth $AUTH --feed newBlocks
//!
//! # Send a raw request to the cloud API
//! chainfeed request --ws-url wss://api.blxrbdn.com/ws --auth $AUTH \
//!     --method blxr_tx --params '{"transaction":"f86b..."}'
//!
//! # List built-in feeds
//! chainfeed feeds
//! ```

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use serde_json::Value;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter};

use chainfeed::{Client, Config, Feed, Notification};

#[derive(Parser)]
#[command(
    name = "chainfeed",
    about = "Subscribe to blockchain feeds and send requests",
    long_about = "
Subscribe to blockchain feeds and send requests over one self-healing
connection to a cloud API or a self-hosted gateway.

ENVIRONMENT VARIABLES:
  RUST_LOG    Log filter (default: info)
",
    version
)]
struct Cli {
    /// Log as JSON to stderr
    #[arg(long, global = true)]
    json_logs: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Print notifications of one feed until Ctrl-C
    Subscribe {
        #[command(flatten)]
        conn: ConnectionArgs,
        /// Feed name, e.g. newTxs
        #[arg(long)]
        feed: String,
        /// Subscribe params as JSON
        #[arg(long, default_value = "{}")]
        params: String,
        /// Exit after N notifications
        #[arg(long)]
        count: Option<usize>,
    },

    /// Send one request and print its result
    Request {
        #[command(flatten)]
        conn: ConnectionArgs,
        /// Method, e.g. blxr_tx
        #[arg(long)]
        method: String,
        /// Request params as JSON
        #[arg(long, default_value = "{}")]
        params: String,
    },

    /// List built-in feeds
    Feeds,
}

#[derive(Args, Default)]
struct ConnectionArgs {
    /// JSON config file; flags override it
    #[arg(long)]
    config: Option<PathBuf>,
    /// Cloud API WebSocket URL
    #[arg(long)]
    ws_url: Option<String>,
    /// Gateway WebSocket URL
    #[arg(long)]
    gateway_url: Option<String>,
    /// Gateway gRPC address
    #[arg(long)]
    grpc_url: Option<String>,
    /// Authorization header value
    #[arg(long)]
    auth: Option<String>,
    /// Blockchain network [default: Mainnet]
    #[arg(long)]
    network: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.json_logs);
    chainfeed_core::init_client_version(format!("chainfeed-cli/{}", env!("CARGO_PKG_VERSION")));

    match cli.command {
        Commands::Subscribe {
            conn,
            feed,
            params,
            count,
        } => cmd_subscribe(&conn, Feed::new(feed), &params, count).await,
        Commands::Request {
            conn,
            method,
            params,
        } => cmd_request(&conn, &method, &params).await,
        Commands::Feeds => {
            cmd_feeds();
            Ok(())
        }
    }
}

fn init_tracing(json: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let registry = tracing_subscriber::registry().with(filter);
    if json {
        registry.with(fmt::layer().json().with_writer(std::io::stderr)).init();
    } else {
        registry.with(fmt::layer().with_writer(std::io::stderr)).init();
    }
}

fn load_config(args: &ConnectionArgs) -> Result<Config> {
    let mut config = match &args.config {
        Some(path) => Config::from_json_file(path)?,
        None => Config::default(),
    };
    if let Some(url) = &args.ws_url {
        config.ws_cloud_api_url = Some(url.clone());
    }
    if let Some(url) = &args.gateway_url {
        config.ws_gateway_url = Some(url.clone());
    }
    if let Some(url) = &args.grpc_url {
        config.grpc_gateway_url = Some(url.clone());
    }
    if let Some(auth) = &args.auth {
        config.auth_header = Some(auth.clone());
    }
    if let Some(network) = &args.network {
        config.blockchain_network = network.clone();
    }
    config.validate()?;
    Ok(config)
}

fn parse_params(raw: &str) -> Result<Value> {
    serde_json::from_str(raw).context("--params is not valid JSON")
}

async fn cmd_subscribe(
    conn: &ConnectionArgs,
    feed: Feed,
    params: &str,
    limit: Option<usize>,
) -> Result<()> {
    let params = parse_params(params)?;
    let config = load_config(conn)?;

    let client = Client::connect(&config).await?;
    let mut rx = client.subscribe_channel(feed.clone(), params).await?;
    tracing::info!(%feed, kind = %client.kind(), "subscribed");

    let mut seen = 0usize;
    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => break,
            next = rx.recv() => match next {
                Some(Ok(notification)) => {
                    println!("{}", notification_json(&notification)?);
                    seen += 1;
                    if limit.is_some_and(|n| seen >= n) {
                        break;
                    }
                }
                Some(Err(e)) => tracing::warn!(%feed, error = %e, "notification error"),
                None => break,
            },
        }
    }

    if let Err(e) = client.unsubscribe(&feed).await {
        tracing::warn!(%feed, error = %e, "unsubscribe failed");
    }
    client.close().await?;
    Ok(())
}

async fn cmd_request(conn: &ConnectionArgs, method: &str, params: &str) -> Result<()> {
    let params = parse_params(params)?;
    let config = load_config(conn)?;

    let client = Client::connect(&config).await?;
    let result = client.request(method, params).await;
    client.close().await?;

    println!("{}", serde_json::to_string_pretty(&result?)?);
    Ok(())
}

fn cmd_feeds() {
    println!("Built-in feeds:\n");
    for feed in Feed::BUILTIN {
        let note = match feed.as_str() {
            "transactionStatus" => "cloud API only",
            "userIntentFeed" | "userIntentSolutionsFeed" | "quotesFeed" => "gateway only",
            _ if chainfeed::STREAMED_FEEDS.contains(&feed) => "WebSocket and gRPC",
            _ => "WebSocket",
        };
        println!("  {:<26} {note}", feed.as_str());
    }
}

fn notification_json(notification: &Notification) -> Result<String> {
    let value = match notification {
        Notification::NewTx(n) => serde_json::to_value(n)?,
        Notification::Block(n) => serde_json::to_value(n)?,
        Notification::OnBlock(n) => serde_json::to_value(n)?,
        Notification::TxStatus(n) => serde_json::to_value(n)?,
        Notification::TxReceipt(n) => serde_json::to_value(n)?,
        Notification::Intent(n) => serde_json::to_value(n)?,
        Notification::IntentSolution(n) => serde_json::to_value(n)?,
        Notification::Quote(n) => serde_json::to_value(n)?,
        Notification::Raw(v) => v.clone(),
    };
    Ok(value.to_string())
}
