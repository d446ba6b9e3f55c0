//! ACME error types

use thiserror::Error;

use super::client::ChallengeKind;

/// Errors that can occur while obtaining or serving a certificate
///
/// Payloads are strings so one outcome can be recorded in a domain's issue
/// state and handed to every caller waiting on it.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum CertError {
    /// Hostname is outside the configured allow-list
    #[error("Domain '{0}' is not in the allowed domain list")]
    DomainNotAllowed(String),

    /// CA reported the authorization as invalid
    #[error("Authorization for domain '{domain}' is invalid")]
    AuthorizationInvalid { domain: String },

    /// Every allowed challenge type was exhausted or never offered
    #[error("No compatible challenge type left for domain '{domain}'")]
    NoCompatibleChallenge { domain: String },

    /// Challenge type this proxy cannot fulfill
    #[error("Challenge type {0} is not supported")]
    UnsupportedChallenge(ChallengeKind),

    /// Failed to build the TLS-ALPN-01 validation certificate
    #[error("Failed to build challenge certificate for '{domain}': {message}")]
    ChallengeCertificate { domain: String, message: String },

    /// ACME account could not be loaded or registered
    #[error("Failed to set up ACME account: {0}")]
    Account(String),

    /// ACME protocol error reported by the CA client
    #[error("ACME protocol error: {0}")]
    Protocol(String),

    /// Private key generation failed
    #[error("Failed to generate private key: {0}")]
    KeyGeneration(String),

    /// CSR construction failed
    #[error("Failed to build CSR: {0}")]
    Csr(String),

    /// CA returned an empty certificate chain
    #[error("CA returned an empty certificate chain for '{domain}'")]
    EmptyChain { domain: String },

    /// Leaf certificate could not be parsed
    #[error("Failed to parse certificate: {0}")]
    CertificateParse(String),

    /// Leaf certificate is outside its validity window
    #[error("Certificate for '{domain}' is not valid now (valid {not_before} to {not_after})")]
    OutsideValidity {
        domain: String,
        not_before: String,
        not_after: String,
    },

    /// Leaf certificate does not cover the requested hostname
    #[error("Certificate does not cover hostname '{domain}'")]
    HostnameMismatch { domain: String },

    /// Leaf public key does not belong to the issuance private key
    #[error("Certificate public key for '{domain}' does not match the private key")]
    KeyMismatch { domain: String },

    /// Private key could not be loaded into the TLS stack
    #[error("Failed to load private key: {0}")]
    SigningKey(String),

    /// The issuance context deadline passed
    #[error("Issuance deadline exceeded")]
    DeadlineExceeded,

    /// The issuance context was cancelled
    #[error("Issuance cancelled")]
    Canceled,

    /// Waiting for another caller's issuance timed out
    #[error("Timed out waiting for in-flight issuance of '{domain}'")]
    WaitTimeout { domain: String },

    /// `finish_issue` without a matching `start_issue`
    #[error("Issue state for '{domain}' finished without being started")]
    FinishWithoutStart { domain: String },

    /// No issuance has completed for this domain yet
    #[error("No certificate has been issued for '{domain}'")]
    NotIssued { domain: String },
}

impl CertError {
    /// Deadline or cancellation of the issuance context
    pub fn is_context(&self) -> bool {
        matches!(
            self,
            CertError::DeadlineExceeded | CertError::Canceled | CertError::WaitTimeout { .. }
        )
    }

    /// Failures that end an attempt without retry
    pub fn is_permanent(&self) -> bool {
        matches!(
            self,
            CertError::AuthorizationInvalid { .. } | CertError::NoCompatibleChallenge { .. }
        )
    }
}

impl From<instant_acme::Error> for CertError {
    fn from(e: instant_acme::Error) -> Self {
        CertError::Protocol(e.to_string())
    }
}

/// Errors from the optional persistence cache
#[derive(Debug, Error)]
pub enum CacheError {
    /// No entry stored under the key
    #[error("Cache entry not found")]
    NotFound,

    /// Backend failure
    #[error("Cache backend error: {0}")]
    Backend(String),
}
