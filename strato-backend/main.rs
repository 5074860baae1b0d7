mod auth;
mod config;
mod server;
mod session;
mod shell;
mod vfs;

use std::error::Error;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use dotenvy::dotenv;
use tokio::net::TcpListener;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

use crate::auth::apikeys::MongoApiKeyStore;
use crate::server::AppState;
use crate::session::tracking::SessionRegistry;
use crate::shell::commands::init_commands;
use crate::vfs::FsStore;
use crate::vfs::bootstrap::ensure_base_tree;
use crate::vfs::mongo::{GridFsBlobStore, MongoFsBackend};

#[derive(Parser)]
#[command(name = "strato", about = "Multiplexed remote-shell cloud backend")]
enum Cli {
    /// Start the HTTP/WebSocket server (default when no subcommand is given)
    #[command(alias = "run")]
    Serve {
        /// Override the configured port
        #[arg(long)]
        port: Option<u16>,
    },
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
    dotenv().ok();

    let args: Vec<String> = std::env::args().collect();
    let cli = if args.len() <= 1 {
        Cli::Serve { port: None }
    } else {
        Cli::parse()
    };

    match cli {
        Cli::Serve { port } => run_server(port).await,
    }
}

async fn run_server(port_override: Option<u16>) -> Result<(), Box<dyn Error>> {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("strato=info,tower_http=warn,hyper=warn"));
    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer())
        .init();

    let mut config = config::Config::from_env();
    if let Some(port) = port_override {
        config.port = port;
    }

    let client = mongodb::Client::with_uri_str(&config.mongodb_uri)
        .await
        .context("failed to connect to mongodb")?;
    let db = client.database(&config.db_name);
    tracing::info!(db = %config.db_name, "connected to mongodb");

    let store = FsStore::new(
        Arc::new(MongoFsBackend::new(&db)),
        Arc::new(GridFsBlobStore::new(&db)),
    );
    ensure_base_tree(&store)
        .await
        .context("failed to bootstrap the filesystem tree")?;

    let state = AppState {
        store,
        registry: Arc::new(SessionRegistry::new()),
        commands: Arc::new(init_commands()),
        api_keys: Arc::new(MongoApiKeyStore::new(&db)),
        config: Arc::new(config.clone()),
    };
    let app = server::create_app(state);

    let listener = TcpListener::bind(("0.0.0.0", config.port))
        .await
        .with_context(|| format!("failed to bind port {}", config.port))?;
    tracing::info!(port = config.port, "strato listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("server error")?;
    Ok(())
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %err, "failed to install ctrl-c handler");
        return;
    }
    tracing::info!("shutdown signal received");
}
