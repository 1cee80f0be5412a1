//! wg-embed main entry point
//!
//! This binary brings a WireGuard interface up from a config file and serves
//! the HTTP control API until it is told to stop. It also has small key
//! helpers in the style of `wg genkey` / `wg pubkey`.

use clap::{Parser, Subcommand};
use std::io::BufRead;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::signal;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use wg_embed::{
    control::DEFAULT_SOCKET_DIR,
    http,
    wireguard::{KeyPair, PrivateKey},
    BackendKind, Interface, Options, APP_NAME, VERSION,
};

/// Embeddable WireGuard interface manager
#[derive(Parser, Debug)]
#[command(name = APP_NAME, version = VERSION, about, long_about = None)]
struct Cli {
    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Bring an interface up and serve the HTTP API
    Up {
        /// Configuration file path
        #[arg(short, long)]
        config: PathBuf,

        /// Interface name
        #[arg(short, long, default_value = "wg0")]
        name: String,

        /// Try the kernel module before the userspace engine
        #[arg(long)]
        kernel: bool,

        /// Directory for UAPI sockets
        #[arg(long, default_value = DEFAULT_SOCKET_DIR)]
        socket_dir: PathBuf,

        /// HTTP API listen address
        #[arg(long, default_value = "127.0.0.1:9090")]
        listen: SocketAddr,
    },

    /// Generate a private key
    Genkey,

    /// Derive a public key from a private key read on stdin
    Pubkey,

    /// Show version information
    Version,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    // Initialize logging
    init_logging(cli.verbose);

    // Execute command
    if let Err(e) = run(cli).await {
        error!("Error: {:#}", e);
        std::process::exit(1);
    }
}

/// Initialize structured logging with tracing
fn init_logging(verbose: bool) {
    let filter = if verbose {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("debug"))
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();
}

/// Run the CLI command
async fn run(cli: Cli) -> anyhow::Result<()> {
    match cli.command {
        Commands::Up {
            config,
            name,
            kernel,
            socket_dir,
            listen,
        } => {
            info!("Starting {} v{}", APP_NAME, VERSION);
            let options = Options::new(name)
                .allow_kernel_module(kernel)
                .socket_dir(socket_dir);
            let iface = wg_embed::new_with_options(options).await?;
            info!(
                "Interface {} running on the {} backend",
                iface.name(),
                iface.backend_kind()
            );

            if let Err(e) = iface.load_config_file(&config).await {
                if let Err(close) = iface.close().await {
                    warn!("Failed to close interface: {}", close);
                }
                return Err(e.into());
            }

            let iface = Arc::new(iface);
            let app = http::router(iface.clone());

            let listener = tokio::net::TcpListener::bind(listen).await?;
            info!("HTTP server listening on {}", listen);

            axum::serve(listener, app)
                .with_graceful_shutdown(shutdown(iface.clone()))
                .await?;

            info!("Shutting down interface");
            match reclaim(iface, RECLAIM_TIMEOUT).await {
                Ok(iface) => iface.close().await?,
                Err(iface) => {
                    error!(
                        "Interface {} still referenced after {:?}; it was not torn down",
                        iface.name(),
                        RECLAIM_TIMEOUT
                    );
                    anyhow::bail!("failed to tear down interface {}", iface.name());
                }
            }
            Ok(())
        }
        Commands::Genkey => {
            println!("{}", KeyPair::generate().private.to_base64());
            Ok(())
        }
        Commands::Pubkey => {
            let mut line = String::new();
            std::io::stdin().lock().read_line(&mut line)?;
            let key = PrivateKey::from_base64(line.trim())?;
            println!("{}", key.public_key());
            Ok(())
        }
        Commands::Version => {
            println!("{} v{}", APP_NAME, VERSION);
            Ok(())
        }
    }
}

/// How long in-flight HTTP handlers get to drop their interface handles
const RECLAIM_TIMEOUT: Duration = Duration::from_secs(5);

/// Take sole ownership of `shared` once every other handle is dropped
///
/// Gives the shared value back if other handles remain after `timeout`.
async fn reclaim<T>(mut shared: Arc<T>, timeout: Duration) -> Result<T, Arc<T>> {
    let deadline = tokio::time::Instant::now() + timeout;
    loop {
        match Arc::try_unwrap(shared) {
            Ok(value) => return Ok(value),
            Err(still_shared) if tokio::time::Instant::now() < deadline => {
                shared = still_shared;
                tokio::time::sleep(Duration::from_millis(50)).await;
            }
            Err(still_shared) => return Err(still_shared),
        }
    }
}

/// Resolve on a shutdown signal, or when a userspace interface stops serving
async fn shutdown(iface: Arc<Interface>) {
    let stopped = async {
        match iface.backend_kind() {
            BackendKind::Userspace => {
                if let Err(e) = iface.wait().await {
                    error!("Interface stopped: {}", e);
                }
            }
            BackendKind::Kernel => std::future::pending::<()>().await,
        }
    };

    tokio::select! {
        _ = shutdown_signal() => {},
        _ = stopped => {},
    }
}

/// Wait for shutdown signal (Ctrl+C or SIGTERM)
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!("Failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C signal");
        },
        _ = terminate => {
            info!("Received SIGTERM signal");
        },
    }
}
