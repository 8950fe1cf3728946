use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use tokio_rustls::TlsAcceptor;

use termgate_protocol::LineTelnet;
use termgate_server::{init_logging, AppConfig, Dialer, Gateway, SessionOrchestrator};

/// Terminal gateway - shows a menu of backend hosts and relays the chosen session
#[derive(Parser, Debug)]
#[command(name = "termgate")]
#[command(about = "Terminal gateway with a menu of backend hosts")]
struct Args {
    /// Port to listen on for plain connections
    #[arg(long, default_value_t = 3270)]
    port: u16,

    /// Port to listen on for TLS connections
    #[arg(long, default_value_t = 3271)]
    tlsport: u16,

    /// Also listen for TLS connections on --tlsport
    #[arg(long, requires_all = ["pubkey", "privkey"])]
    tlsenable: bool,

    /// PEM certificate chain for the TLS listener
    #[arg(long)]
    pubkey: Option<PathBuf>,

    /// PEM private key for the TLS listener
    #[arg(long)]
    privkey: Option<PathBuf>,

    /// Path to the menu configuration file
    #[arg(long, default_value = "config.json")]
    config: PathBuf,

    /// Seconds to wait while taking a client out of screen mode
    #[arg(
        long = "telnetTimeout",
        default_value_t = 1,
        value_parser = clap::value_parser!(u64).range(1..)
    )]
    telnet_timeout: u64,

    /// Enable debug logging
    #[arg(long)]
    debug: bool,

    /// Enable trace logging
    #[arg(long)]
    trace: bool,

    /// Also write logs to this file
    #[arg(long)]
    log: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    init_logging(args.debug, args.trace, args.log.as_deref())?;

    // Install crypto provider before any TLS operations
    if rustls::crypto::ring::default_provider()
        .install_default()
        .is_err()
    {
        tracing::debug!("rustls crypto provider already installed");
    }

    let config = AppConfig::load(&args.config)
        .with_context(|| format!("Failed to load config from {}", args.config.display()))?;
    tracing::info!("Menu title: {}", config.title);

    let tls_acceptor = if args.tlsenable {
        let (Some(cert), Some(key)) = (&args.pubkey, &args.privkey) else {
            anyhow::bail!("--tlsenable requires --pubkey and --privkey");
        };
        let tls_config = termgate_common::load_listener_config(cert, key)
            .context("Failed to load TLS configuration")?;
        Some(TlsAcceptor::from(Arc::new(tls_config)))
    } else {
        None
    };

    let dialer = Dialer::new().context("Failed to build backend TLS configuration")?;
    let orchestrator = SessionOrchestrator::new(Arc::new(config), Arc::new(LineTelnet::new()), dialer)
        .with_unnegotiate_timeout(Duration::from_secs(args.telnet_timeout));
    let gateway = Gateway::new(Arc::new(orchestrator));

    let plain_addr = SocketAddr::from(([0, 0, 0, 0], args.port));
    let plain = gateway.clone().run(plain_addr);

    let tls = async {
        match tls_acceptor {
            Some(acceptor) => {
                let tls_addr = SocketAddr::from(([0, 0, 0, 0], args.tlsport));
                gateway.clone().run_tls(tls_addr, acceptor).await
            }
            None => std::future::pending().await,
        }
    };

    tracing::info!("Press Ctrl-C to stop the server");

    tokio::select! {
        result = plain => {
            result.context("Plain listener stopped")?;
        }
        result = tls => {
            result.context("TLS listener stopped")?;
        }
        _ = shutdown_signal() => {
            tracing::info!("Shutdown signal received, exiting");
        }
    }

    Ok(())
}

/// Wait for shutdown signals (SIGTERM, SIGINT)
async fn shutdown_signal() {
    use tokio::signal;

    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!("Failed to listen for Ctrl-C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                tracing::error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            tracing::info!("Received Ctrl-C");
        }
        _ = terminate => {
            tracing::info!("Received SIGTERM");
        }
    }
}
