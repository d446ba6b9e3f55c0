//! TLS front end
//!
//! Accepts TCP connections, reads the ClientHello before committing to a
//! server configuration, asks the [`CertificateManager`] for a certificate,
//! then either finishes a validation handshake or forwards the decrypted
//! stream to the backend for the requested host.
//!
//! rustls resolves certificates synchronously, so issuance cannot happen
//! inside a `ResolvesServerCert`. The lazy acceptor lets the connection task
//! wait for the manager and build a per-connection config afterwards.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use rustls::server::{Acceptor, ClientHello, ResolvesServerCert};
use rustls::sign::CertifiedKey;
use rustls::ServerConfig;
use thiserror::Error;
use tokio::io::AsyncWriteExt;
use tokio::net::{TcpListener, TcpStream};
use tokio_rustls::LazyConfigAcceptor;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, trace, warn};

use tlsgate_common::DomainName;
use tlsgate_config::BackendsConfig;

use crate::acme::{
    crypto_provider, CertificateManager, ClientHelloInfo, HandshakeKind, ACME_TLS_ALPN_PROTOCOL,
};
use crate::drain::ConnectionTracker;

const HTTP_1_1: &[u8] = b"http/1.1";

/// Errors on the connection path
#[derive(Debug, Error)]
pub enum TlsError {
    #[error("Failed to accept connection: {0}")]
    Accept(#[source] std::io::Error),

    #[error("TLS handshake failed: {0}")]
    Handshake(#[source] std::io::Error),

    #[error("ClientHello carried no usable server name")]
    MissingServerName,

    #[error("No certificate available for '{0}'")]
    NoCertificate(DomainName),

    #[error("Failed to build TLS configuration: {0}")]
    Config(#[from] rustls::Error),

    #[error("No backend configured for '{0}'")]
    NoBackend(DomainName),

    #[error("Failed to connect to backend {address}: {source}")]
    BackendConnect {
        address: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Timed out connecting to backend {0}")]
    BackendTimeout(String),

    #[error("Forwarding failed: {0}")]
    Forward(#[source] std::io::Error),
}

/// Always answers with the certificate picked before the handshake
#[derive(Debug)]
struct ResolvedCert(Arc<CertifiedKey>);

impl ResolvesServerCert for ResolvedCert {
    fn resolve(&self, _: ClientHello<'_>) -> Option<Arc<CertifiedKey>> {
        Some(Arc::clone(&self.0))
    }
}

/// Server config for one handshake
///
/// Probes get exactly `acme-tls/1`. Normal requests get `http/1.1` when the
/// client offered it and no ALPN otherwise.
fn server_config(
    cert: Arc<CertifiedKey>,
    kind: &HandshakeKind,
    hello: &ClientHelloInfo,
) -> Result<Arc<ServerConfig>, TlsError> {
    let mut config = ServerConfig::builder_with_provider(crypto_provider())
        .with_safe_default_protocol_versions()?
        .with_no_client_auth()
        .with_cert_resolver(Arc::new(ResolvedCert(cert)));

    config.alpn_protocols = if kind.is_probe() {
        vec![ACME_TLS_ALPN_PROTOCOL.to_vec()]
    } else if hello.alpn.iter().any(|p| p.as_slice() == HTTP_1_1) {
        vec![HTTP_1_1.to_vec()]
    } else {
        Vec::new()
    };

    Ok(Arc::new(config))
}

/// TLS-terminating listener
#[derive(Clone)]
pub struct TlsFrontend {
    manager: CertificateManager,
    backends: Arc<BackendsConfig>,
    tracker: ConnectionTracker,
    connect_timeout: Duration,
}

impl TlsFrontend {
    pub fn new(
        manager: CertificateManager,
        backends: BackendsConfig,
        tracker: ConnectionTracker,
        connect_timeout: Duration,
    ) -> Self {
        Self {
            manager,
            backends: Arc::new(backends),
            tracker,
            connect_timeout,
        }
    }

    /// Accept connections until `shutdown` fires
    ///
    /// Connections already accepted keep running; use the tracker to drain
    /// them.
    pub async fn serve(
        &self,
        listener: TcpListener,
        shutdown: CancellationToken,
    ) -> Result<(), TlsError> {
        if let Ok(addr) = listener.local_addr() {
            info!(address = %addr, "TLS listener started");
        }

        loop {
            let (stream, peer) = tokio::select! {
                _ = shutdown.cancelled() => break,
                accepted = listener.accept() => match accepted {
                    Ok(accepted) => accepted,
                    Err(e) => {
                        warn!(error = %e, "Failed to accept connection");
                        continue;
                    }
                },
            };

            let frontend = self.clone();
            let guard = self.tracker.track();
            tokio::spawn(async move {
                let _guard = guard;
                if let Err(e) = frontend.handle_connection(stream, peer).await {
                    debug!(peer = %peer, error = %e, "Connection ended with error");
                }
            });
        }

        info!("TLS listener stopped accepting connections");
        Ok(())
    }

    async fn handle_connection(&self, stream: TcpStream, peer: SocketAddr) -> Result<(), TlsError> {
        trace!(peer = %peer, "Accepted connection");

        let start = LazyConfigAcceptor::new(Acceptor::default(), stream)
            .await
            .map_err(TlsError::Handshake)?;

        let hello = ClientHelloInfo::from(&start.client_hello());
        let kind = HandshakeKind::classify(&hello).ok_or(TlsError::MissingServerName)?;

        let cert = self
            .manager
            .get_certificate(&hello)
            .await
            .map_err(|_| TlsError::NoCertificate(kind.domain().clone()))?;

        let config = server_config(cert, &kind, &hello)?;
        let mut tls = start
            .into_stream(config)
            .await
            .map_err(TlsError::Handshake)?;

        let domain = match kind {
            HandshakeKind::ValidationProbe(domain) => {
                debug!(peer = %peer, domain = %domain, "Validation handshake completed");
                // the probe only needs the handshake
                let _ = tls.shutdown().await;
                return Ok(());
            }
            HandshakeKind::NormalRequest(domain) => domain,
        };

        let address = self
            .backends
            .backend_for(&domain)
            .ok_or_else(|| TlsError::NoBackend(domain.clone()))?
            .to_string();

        let mut backend = tokio::time::timeout(self.connect_timeout, TcpStream::connect(&address))
            .await
            .map_err(|_| TlsError::BackendTimeout(address.clone()))?
            .map_err(|source| TlsError::BackendConnect {
                address: address.clone(),
                source,
            })?;

        debug!(peer = %peer, domain = %domain, backend = %address, "Forwarding connection");

        match tokio::io::copy_bidirectional(&mut tls, &mut backend).await {
            Ok((to_backend, to_client)) => {
                trace!(
                    peer = %peer,
                    domain = %domain,
                    bytes_to_backend = to_backend,
                    bytes_to_client = to_client,
                    "Connection closed"
                );
                Ok(())
            }
            Err(e) => {
                error!(peer = %peer, domain = %domain, error = %e, "Forwarding failed");
                Err(TlsError::Forward(e))
            }
        }
    }
}
