//! On-demand ACME certificate management
//!
//! Certificates are obtained while the handshake that needs them is in
//! progress, using the TLS-ALPN-01 challenge so validation happens on the
//! same listener.
//!
//! # Architecture
//!
//! - [`CertificateManager`] - Handshake hook; classifies hellos and converges
//!   concurrent callers onto one issuance per domain
//! - [`DomainIssueState`] - Per-domain Idle/Issuing exclusion with broadcast
//!   wake-up
//! - [`AuthorizationDriver`] - Walks one domain through the CA's
//!   authorization protocol
//! - [`CertificateIssuer`] - Key, CSR, submission and leaf validation
//! - [`ChallengeTokenStore`] - Validation certificates served to `acme-tls/1`
//!   probes
//! - [`AcmeClient`] - CA boundary, implemented by [`InstantAcmeClient`]
//! - [`CertCache`] - Optional persistence consulted around issuance
//!
//! # Issuance Flow
//!
//! 1. A ClientHello for `example.com` arrives without `acme-tls/1` as its
//!    only ALPN protocol
//! 2. The first caller wins [`DomainIssueState::start_issue`] and spawns the
//!    issuance; later callers wait on the same state
//! 3. [`AuthorizationDriver`] publishes a validation certificate, tells the
//!    CA to validate, and waits for the verdict
//! 4. The CA connects with `acme-tls/1`; the manager answers from the
//!    token store
//! 5. [`CertificateIssuer`] submits a CSR and validates the returned chain
//! 6. The outcome is recorded and every waiter is released

mod authorizer;
mod cache;
mod challenge;
mod client;
mod context;
mod error;
mod instant;
mod issue_state;
mod issuer;
mod keys;
mod manager;
mod validation;

pub use authorizer::{AuthorizationDriver, ChallengeCursor, ALLOWED_CHALLENGES};
pub use cache::{CertCache, MemoryCache};
pub use challenge::{tls_alpn01_certificate, ChallengeTokenStore, ACME_TLS_ALPN_PROTOCOL};
pub use client::{AcmeClient, Authorization, AuthorizationStatus, Challenge, ChallengeKind};
pub use context::IssueContext;
pub use error::{CacheError, CertError};
pub use instant::InstantAcmeClient;
pub use issue_state::{DomainIssueState, IssueOutcome, IssuePhase};
pub use issuer::{CertificateHandle, CertificateIssuer};
pub use keys::crypto_provider;
pub use manager::{CertificateManager, ClientHelloInfo, HandshakeKind, NoCertificate};
pub use validation::{hostname_matches, validate_leaf, LeafValidity};
