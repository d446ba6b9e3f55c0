//! tlsgate proxy library
//!
//! A TLS-terminating proxy that obtains certificates on demand, during the
//! handshake that needs them, from an ACME CA using the TLS-ALPN-01
//! challenge, then forwards decrypted traffic to backend services.
//!
//! # Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use tlsgate_proxy::acme::{CertificateManager, InstantAcmeClient};
//!
//! let client = InstantAcmeClient::from_config(&config.acme).await?;
//! let manager = CertificateManager::new(Arc::new(client), &config.acme);
//! ```

// ============================================================================
// Module Declarations
// ============================================================================

pub mod acme;
pub mod drain;
pub mod tls;

// ============================================================================
// Public API Re-exports
// ============================================================================

// Certificate management
pub use acme::{AcmeClient, CertError, CertificateManager, ClientHelloInfo, NoCertificate};

// Connection handling
pub use drain::ConnectionTracker;
pub use tls::{TlsError, TlsFrontend};
