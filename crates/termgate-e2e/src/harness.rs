//! Gateway harness for E2E tests
//!
//! Starts the real gateway on ephemeral ports with a short relay poll interval
//! and unnegotiate timeout so sessions finish quickly.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tokio_rustls::TlsAcceptor;

use termgate_protocol::{LineTelnet, ScreenProtocol};
use termgate_server::{AppConfig, Dialer, Gateway, Relay, ServerTarget, SessionOrchestrator};

use crate::certificates::TestCertificates;

/// Relay poll interval used by test gateways
pub const TEST_POLL_INTERVAL: Duration = Duration::from_millis(20);

/// Unnegotiate timeout used by test gateways
pub const TEST_UNNEGOTIATE_TIMEOUT: Duration = Duration::from_millis(50);

/// Build a plain target on localhost
pub fn target(name: &str, port: u16) -> ServerTarget {
    ServerTarget {
        name: name.to_string(),
        host: "127.0.0.1".to_string(),
        port,
        use_tls: false,
        ignore_cert_validation: false,
    }
}

/// Build a menu config around `servers`
pub fn app_config(servers: Vec<ServerTarget>) -> AppConfig {
    AppConfig {
        title: "Test Gateway".to_string(),
        disclaimer: "Authorized use only.".to_string(),
        servers,
    }
}

/// A running gateway instance
pub struct TestGateway {
    /// Plain listener address
    pub addr: SocketAddr,
    /// TLS listener address, when started with certificates
    pub tls_addr: Option<SocketAddr>,
    tasks: Vec<JoinHandle<()>>,
}

impl TestGateway {
    /// Start a gateway speaking line-mode telnet
    pub async fn start(config: AppConfig) -> Self {
        Self::launch(config, Arc::new(LineTelnet::new()), None).await
    }

    /// Start a gateway that also accepts TLS clients using the test server certificate
    pub async fn start_with_tls(config: AppConfig, certs: &TestCertificates) -> Self {
        let acceptor = TlsAcceptor::from(Arc::new(certs.server_config()));
        Self::launch(config, Arc::new(LineTelnet::new()), Some(acceptor)).await
    }

    /// Start a gateway driven by a custom screen protocol
    pub async fn start_with_protocol(config: AppConfig, protocol: Arc<dyn ScreenProtocol>) -> Self {
        Self::launch(config, protocol, None).await
    }

    async fn launch(
        config: AppConfig,
        protocol: Arc<dyn ScreenProtocol>,
        tls_acceptor: Option<TlsAcceptor>,
    ) -> Self {
        let dialer = Dialer::new()
            .expect("Failed to build dialer")
            .with_connect_timeout(Duration::from_secs(2));
        let orchestrator = SessionOrchestrator::new(Arc::new(config), protocol, dialer)
            .with_relay(Relay::new().with_poll_interval(TEST_POLL_INTERVAL))
            .with_unnegotiate_timeout(TEST_UNNEGOTIATE_TIMEOUT);
        let gateway = Gateway::new(Arc::new(orchestrator));

        let listener = TcpListener::bind("127.0.0.1:0")
            .await
            .expect("Failed to bind gateway");
        let addr = listener.local_addr().unwrap();

        let mut tasks = Vec::new();
        let plain = gateway.clone();
        tasks.push(tokio::spawn(async move {
            if let Err(e) = plain.run_with_listener(listener).await {
                tracing::error!("Gateway listener error: {}", e);
            }
        }));

        let tls_addr = match tls_acceptor {
            Some(acceptor) => {
                let listener = TcpListener::bind("127.0.0.1:0")
                    .await
                    .expect("Failed to bind TLS gateway");
                let tls_addr = listener.local_addr().unwrap();
                tasks.push(tokio::spawn(async move {
                    if let Err(e) = gateway.run_tls_with_listener(listener, acceptor).await {
                        tracing::error!("Gateway TLS listener error: {}", e);
                    }
                }));
                Some(tls_addr)
            }
            None => None,
        };

        Self {
            addr,
            tls_addr,
            tasks,
        }
    }

    /// Stop accepting connections
    pub fn shutdown(&mut self) {
        for task in self.tasks.drain(..) {
            task.abort();
        }
    }
}

impl Drop for TestGateway {
    fn drop(&mut self) {
        self.shutdown();
    }
}
