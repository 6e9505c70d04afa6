use anyhow::Context;
use clap::{Parser, Subcommand};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::{TcpListener, UdpSocket};
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

use distributed_mutex::config::PeerConfig;
use distributed_mutex::directory::{Directory, HttpDirectory, InMemoryDirectory};
use distributed_mutex::peer::{self, Peer};
use distributed_mutex::transport::HttpTransport;
use distributed_mutex::transport::handlers::heartbeat_listener;

#[derive(Parser)]
#[command(name = "distributed-mutex")]
#[command(about = "Ricart-Agrawala mutual exclusion between peers")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the name registry
    Directory {
        /// HTTP bind address
        #[arg(short, long, default_value = "127.0.0.1:9000")]
        bind: SocketAddr,
    },
    /// Run a mutex peer
    Peer {
        /// Config file (TOML, optional)
        #[arg(short, long, default_value = "config/peer")]
        config: String,
        /// Peer name, overrides the config file
        #[arg(short, long)]
        name: Option<String>,
        /// Registry base URL
        #[arg(short, long)]
        directory: Option<String>,
        /// HTTP bind address for RPCs and the control API
        #[arg(long)]
        rpc: Option<SocketAddr>,
        /// UDP bind address for heartbeats
        #[arg(long)]
        heartbeat: Option<SocketAddr>,
        /// Fixed roster entry (repeatable); omit to follow the registry
        #[arg(short, long)]
        peer: Vec<String>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Directory { bind } => {
            init_logging("info");
            run_directory(bind).await
        }
        Commands::Peer {
            config,
            name,
            directory,
            rpc,
            heartbeat,
            peer,
        } => {
            let mut settings = PeerConfig::from_file(&config)
                .with_context(|| format!("failed to load config from {}", config))?;
            if let Some(name) = name {
                settings.name = name;
            }
            if let Some(directory) = directory {
                settings.directory_url = directory;
            }
            if let Some(rpc) = rpc {
                settings.rpc_addr = rpc;
            }
            if let Some(heartbeat) = heartbeat {
                settings.heartbeat_addr = heartbeat;
            }
            if !peer.is_empty() {
                settings.peers = peer;
            }

            init_logging(&settings.log_level);
            run_peer(settings).await
        }
    }
}

fn init_logging(default_level: &str) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

async fn run_directory(bind: SocketAddr) -> anyhow::Result<()> {
    let registry = Arc::new(InMemoryDirectory::new());
    let app = distributed_mutex::directory::handlers::router(registry);

    let listener = TcpListener::bind(bind)
        .await
        .with_context(|| format!("failed to bind directory on {}", bind))?;
    tracing::info!("Directory listening on {}", bind);

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            tracing::info!("Directory shutting down");
        })
        .await?;

    Ok(())
}

async fn run_peer(config: PeerConfig) -> anyhow::Result<()> {
    config.validate()?;
    let name = config.peer_name();

    tracing::info!("Starting peer {}", name);
    tracing::info!("  RPC:       {}", config.rpc_addr);
    tracing::info!("  Heartbeat: {}", config.heartbeat_addr);
    tracing::info!("  Directory: {}", config.directory_url);
    if config.peers.is_empty() {
        tracing::info!("  Roster:    everyone in the directory");
    } else {
        tracing::info!("  Roster:    {:?}", config.roster());
    }

    // 1. Sockets
    let socket = Arc::new(
        UdpSocket::bind(config.heartbeat_addr)
            .await
            .with_context(|| format!("failed to bind heartbeat socket {}", config.heartbeat_addr))?,
    );
    let listener = TcpListener::bind(config.rpc_addr)
        .await
        .with_context(|| format!("failed to bind RPC listener {}", config.rpc_addr))?;

    // 2. Peer
    let directory: Arc<dyn Directory> = Arc::new(HttpDirectory::new(&config.directory_url));
    let transport = Arc::new(HttpTransport::new(
        socket.clone(),
        config.timing.rpc_timeout(),
    ));
    let peer = Peer::new(
        name.clone(),
        config.timing.clone(),
        directory.clone(),
        transport,
        config.roster(),
    );

    // 3. Registration
    directory
        .register(&name, config.address())
        .await
        .context("failed to register with directory")?;
    tracing::info!("Registered as {}", name);

    // 4. Background loops and servers
    let token = CancellationToken::new();
    let mut handles = peer.start(token.clone());
    handles.push(tokio::spawn(heartbeat_listener(
        socket,
        peer.clone(),
        token.clone(),
    )));

    let app = peer::handlers::router(peer.clone());
    let server_token = token.clone();
    let server = tokio::spawn(async move {
        axum::serve(listener, app)
            .with_graceful_shutdown(async move { server_token.cancelled().await })
            .await
    });

    tracing::info!("Peer {} ready", name);

    // 5. Shutdown
    tokio::signal::ctrl_c().await?;
    tracing::info!("Shutting down peer {}", name);

    peer.shutdown().await;
    token.cancel();

    if let Err(e) = directory.remove(&name).await {
        tracing::warn!("Failed to remove {} from directory: {}", name, e);
    }

    for handle in handles {
        let _ = handle.await;
    }
    server.await??;

    Ok(())
}
