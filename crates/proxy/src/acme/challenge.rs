//! TLS-ALPN-01 challenge fulfillment
//!
//! Holds the validation certificates the CA sees when it connects with the
//! `acme-tls/1` ALPN protocol. Entries live only for one challenge round.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;
use rcgen::{CertificateParams, CustomExtension, KeyPair};
use rustls::sign::CertifiedKey;
use sha2::{Digest, Sha256};
use tracing::{debug, trace, warn};

use tlsgate_common::DomainName;

use super::client::Challenge;
use super::error::CertError;
use super::keys;

/// ALPN protocol identifier of TLS-ALPN-01 validation handshakes
pub const ACME_TLS_ALPN_PROTOCOL: &[u8] = b"acme-tls/1";

/// Concurrent map from domain to its validation certificate
///
/// `get` takes the read lock for one map lookup; writers are exclusive.
/// The lock is never held across I/O.
#[derive(Debug, Default)]
pub struct ChallengeTokenStore {
    tokens: RwLock<HashMap<DomainName, Arc<CertifiedKey>>>,
}

impl ChallengeTokenStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Publish a validation certificate, replacing any existing one
    pub fn put(&self, domain: DomainName, cert: Arc<CertifiedKey>) {
        let previous = self.tokens.write().insert(domain.clone(), cert);
        if previous.is_some() {
            warn!(domain = %domain, "Replaced existing challenge token; attempts overlap");
        } else {
            debug!(domain = %domain, "Published challenge token");
        }
    }

    pub fn get(&self, domain: &DomainName) -> Option<Arc<CertifiedKey>> {
        let found = self.tokens.read().get(domain).cloned();
        trace!(domain = %domain, found = found.is_some(), "Challenge token lookup");
        found
    }

    /// Remove a domain's token; absent keys are tolerated
    pub fn delete(&self, domain: &DomainName) {
        if self.tokens.write().remove(domain).is_some() {
            debug!(domain = %domain, "Removed challenge token");
        } else {
            warn!(domain = %domain, "Challenge token already gone");
        }
    }

    pub fn len(&self) -> usize {
        self.tokens.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Removes a published token when the challenge round ends
///
/// Removal is synchronous: the token is gone from the store by the time
/// `drop` returns, including when the round's future is abandoned.
#[must_use = "the token is removed as soon as the guard is dropped"]
pub struct TokenCleanup {
    store: Arc<ChallengeTokenStore>,
    domain: DomainName,
}

impl TokenCleanup {
    pub fn new(store: Arc<ChallengeTokenStore>, domain: DomainName) -> Self {
        Self { store, domain }
    }
}

impl Drop for TokenCleanup {
    fn drop(&mut self) {
        self.store.delete(&self.domain);
    }
}

/// Self-signed certificate answering a TLS-ALPN-01 challenge
///
/// Carries `domain` as its only SAN and the SHA-256 of the key
/// authorization in the critical `id-pe-acmeIdentifier` extension (RFC 8737).
pub fn tls_alpn01_certificate(
    domain: &DomainName,
    challenge: &Challenge,
) -> Result<CertifiedKey, CertError> {
    let build_err = |message: String| CertError::ChallengeCertificate {
        domain: domain.to_string(),
        message,
    };

    let digest = Sha256::digest(challenge.key_authorization.as_bytes());

    let key = KeyPair::generate().map_err(|e| build_err(e.to_string()))?;
    let mut params =
        CertificateParams::new(vec![domain.to_string()]).map_err(|e| build_err(e.to_string()))?;
    params.custom_extensions = vec![CustomExtension::new_acme_identifier(&digest)];

    let cert = params
        .self_signed(&key)
        .map_err(|e| build_err(e.to_string()))?;

    keys::certified_key(vec![cert.der().clone()], &key)
}
