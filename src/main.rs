//! walletbridge binary: run the relay server, or poll a session with a
//! local wallet signer.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::{Parser, Subcommand};
use url::Url;
use uuid::Uuid;

use walletbridge::browser::BrowserProvisioner;
use walletbridge::client::RelayClient;
use walletbridge::config::Config;
use walletbridge::poller::{PollerEvent, PollerSet, WalletPoller};
use walletbridge::relay::RelayService;
use walletbridge::server::{RateLimiter, RelayState, start_server};
use walletbridge::store::MemoryStore;
use walletbridge::wallet::{LocalWallet, WalletSigner};

#[derive(Parser)]
#[command(name = "walletbridge", version, about = "Session relay between browser-automation agents and human wallets")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run the relay HTTP server.
    Serve {
        /// Bind host (overrides WALLETBRIDGE_HOST).
        #[arg(long)]
        host: Option<String>,
        /// Bind port (overrides WALLETBRIDGE_PORT).
        #[arg(long)]
        port: Option<u16>,
    },
    /// Poll a session and answer signing requests with a local key.
    Poll {
        /// Session to poll.
        #[arg(long)]
        session: Uuid,
        /// Relay base URL.
        #[arg(long, default_value = "http://127.0.0.1:3000")]
        relay_url: Url,
        /// Hex-encoded private key; prefer the env var to keep it off the
        /// command line.
        #[arg(long, env = "WALLETBRIDGE_SIGNER_KEY", hide_env_values = true)]
        key: String,
        /// Poll interval in seconds (overrides WALLETBRIDGE_POLL_INTERVAL_SECS).
        #[arg(long)]
        interval_secs: Option<u64>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("walletbridge=info,tower_http=warn")),
        )
        .init();

    let cli = Cli::parse();
    match cli.command {
        Command::Serve { host, port } => serve(host, port).await,
        Command::Poll {
            session,
            relay_url,
            key,
            interval_secs,
        } => poll(session, relay_url, key, interval_secs).await,
    }
}

async fn serve(host: Option<String>, port: Option<u16>) -> anyhow::Result<()> {
    let mut config = Config::resolve()?;
    if let Some(host) = host {
        config.server.host = host;
    }
    if let Some(port) = port {
        config.server.port = port;
    }

    let store = Arc::new(MemoryStore::new());
    let _sweeper = MemoryStore::spawn_sweeper(
        store.clone(),
        config.relay.sweep_interval,
        config.relay.session_ttl,
    );
    let relay = Arc::new(RelayService::new(store, config.relay.clone()));

    let browser = match config.browser.clone() {
        Some(browser_config) => Some(Arc::new(BrowserProvisioner::new(browser_config)?)),
        None => None,
    };

    let state = Arc::new(RelayState {
        relay,
        browser,
        public_url: config.server.public_base_url(),
        create_rate_limiter: RateLimiter::new(60, 60),
        shutdown_tx: tokio::sync::RwLock::new(None),
    });

    let addr: SocketAddr = format!("{}:{}", config.server.host, config.server.port)
        .parse()
        .context("invalid bind address")?;
    let bound = start_server(addr, state.clone()).await?;
    tracing::info!("relay listening on http://{bound}");

    tokio::signal::ctrl_c()
        .await
        .context("failed to listen for shutdown signal")?;
    state.shutdown().await;
    Ok(())
}

async fn poll(
    session: Uuid,
    relay_url: Url,
    key: String,
    interval_secs: Option<u64>,
) -> anyhow::Result<()> {
    let config = Config::resolve()?;
    let mut poller_config = config.poller;
    if let Some(secs) = interval_secs {
        poller_config.poll_interval = Duration::from_secs(secs);
    }

    let signer = LocalWallet::from_hex_key(&key)?;
    tracing::info!(address = %signer.address(), %session, "polling as local wallet");

    let client = RelayClient::new(relay_url)?;
    let poller = WalletPoller::new(client, signer, poller_config);

    // Surface each consent moment on the terminal, the CLI's stand-in for
    // wallet toasts.
    let mut events = poller.subscribe();
    tokio::spawn(async move {
        while let Ok(event) = events.recv().await {
            match event {
                PollerEvent::RequestReceived { method } => {
                    tracing::info!(%method, "signing request pending")
                }
                PollerEvent::Signed { method } => tracing::info!(%method, "signed"),
                PollerEvent::SignFailed { method, error } => {
                    tracing::warn!(%method, %error, "signing failed")
                }
                PollerEvent::SessionDone { success } => {
                    tracing::info!(success, "session done")
                }
            }
        }
    });

    let set = PollerSet::new();
    let outcome = poller.run_guarded(&set, session).await?;
    tracing::info!(
        success = ?outcome.success,
        cycles = outcome.cycles,
        "polling finished"
    );
    Ok(())
}
