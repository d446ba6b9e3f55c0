//! ACME CA client boundary
//!
//! The certificate core talks to the CA through [`AcmeClient`]. It never
//! sees orders, nonces or JWS; it sees authorizations for one domain, the
//! challenges offered on them, and a CSR-in/chain-out issuance call.
//! [`InstantAcmeClient`](super::InstantAcmeClient) is the production
//! implementation.

use std::fmt;

use async_trait::async_trait;
use rustls::pki_types::CertificateDer;

use tlsgate_common::DomainName;

use super::error::CertError;

/// ACME challenge types
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ChallengeKind {
    /// RFC 8737 validation certificate presented over `acme-tls/1`
    TlsAlpn01,
    /// Token served under `/.well-known/acme-challenge/`
    Http01,
    /// TXT record under `_acme-challenge.`
    Dns01,
}

impl ChallengeKind {
    /// Wire name of the challenge type
    pub fn as_str(&self) -> &'static str {
        match self {
            ChallengeKind::TlsAlpn01 => "tls-alpn-01",
            ChallengeKind::Http01 => "http-01",
            ChallengeKind::Dns01 => "dns-01",
        }
    }
}

impl fmt::Display for ChallengeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Authorization status as far as the driver cares
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthorizationStatus {
    /// Still needs a challenge fulfilled
    Pending,
    /// Domain control already proven
    Valid,
    /// Terminal failure (invalid, revoked, expired or deactivated)
    Invalid,
}

/// One challenge offered on an authorization
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Challenge {
    pub kind: ChallengeKind,
    /// URL the CA is told to validate
    pub url: String,
    pub token: String,
    /// `token || '.' || base64url(account key thumbprint)`
    pub key_authorization: String,
}

/// An authorization for a single domain
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Authorization {
    /// Opaque identifier the client uses to address this authorization
    pub uri: String,
    pub domain: DomainName,
    pub status: AuthorizationStatus,
    pub challenges: Vec<Challenge>,
}

/// Operations the certificate core needs from an ACME CA
///
/// Implementations must be cancel-safe: the caller drops the returned future
/// when the issuance deadline passes.
#[async_trait]
pub trait AcmeClient: Send + Sync {
    /// Request a fresh authorization for `domain`
    async fn authorize(&self, domain: &DomainName) -> Result<Authorization, CertError>;

    /// Tell the CA the challenge is ready to be validated
    async fn accept(&self, authz: &Authorization, challenge: &Challenge)
        -> Result<(), CertError>;

    /// Wait until the CA reaches a final verdict on the authorization.
    /// Resolves to `Ok` only when it became valid.
    async fn wait_authorization(&self, uri: &str) -> Result<(), CertError>;

    /// Submit a DER CSR and return the issued DER chain, leaf first
    async fn create_cert(
        &self,
        domain: &DomainName,
        csr_der: &[u8],
    ) -> Result<Vec<CertificateDer<'static>>, CertError>;

    /// Give up an authorization that was started but never completed
    async fn revoke_authorization(&self, uri: &str) -> Result<(), CertError>;
}
