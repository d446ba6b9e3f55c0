//! Certificate manager
//!
//! Entry point for the TLS front end. Each handshake is classified as either
//! an ACME validation probe, answered from the challenge token store, or a
//! normal request, answered with the domain's certificate after issuing one
//! if needed. Concurrent handshakes for the same domain converge on a single
//! issuance.

use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use parking_lot::RwLock;
use rustls::server::ClientHello;
use rustls::sign::CertifiedKey;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, trace, warn};

use tlsgate_common::DomainName;
use tlsgate_config::AcmeConfig;

use super::authorizer::AuthorizationDriver;
use super::cache::CertCache;
use super::challenge::{ChallengeTokenStore, ACME_TLS_ALPN_PROTOCOL};
use super::client::AcmeClient;
use super::context::IssueContext;
use super::error::{CacheError, CertError};
use super::issue_state::DomainIssueState;
use super::issuer::{CertificateHandle, CertificateIssuer};

/// The only error a handshake ever sees
///
/// The cause is logged where it happened and never reaches the peer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("no certificate available")]
pub struct NoCertificate;

/// What the TLS front end knows about a ClientHello
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ClientHelloInfo {
    pub server_name: Option<String>,
    /// Offered ALPN protocols, in client order
    pub alpn: Vec<Vec<u8>>,
}

impl ClientHelloInfo {
    pub fn new(server_name: impl Into<String>) -> Self {
        Self {
            server_name: Some(server_name.into()),
            alpn: Vec::new(),
        }
    }

    pub fn with_alpn(mut self, protocols: &[&[u8]]) -> Self {
        self.alpn = protocols.iter().map(|p| p.to_vec()).collect();
        self
    }
}

impl From<&ClientHello<'_>> for ClientHelloInfo {
    fn from(hello: &ClientHello<'_>) -> Self {
        Self {
            server_name: hello.server_name().map(str::to_string),
            alpn: hello
                .alpn()
                .map(|protocols| protocols.map(<[u8]>::to_vec).collect())
                .unwrap_or_default(),
        }
    }
}

/// Handshake classification
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HandshakeKind {
    /// Ordinary client; gets the domain's real certificate
    NormalRequest(DomainName),
    /// CA validating a TLS-ALPN-01 challenge
    ValidationProbe(DomainName),
}

impl HandshakeKind {
    /// Classify a hello. `None` when there is no usable server name.
    ///
    /// A probe offers exactly one ALPN protocol, `acme-tls/1`. No ALPN, or
    /// `acme-tls/1` alongside anything else, is a normal request.
    pub fn classify(hello: &ClientHelloInfo) -> Option<Self> {
        let domain = DomainName::parse(hello.server_name.as_deref()?).ok()?;

        match hello.alpn.as_slice() {
            [only] if only.as_slice() == ACME_TLS_ALPN_PROTOCOL => {
                Some(HandshakeKind::ValidationProbe(domain))
            }
            _ => Some(HandshakeKind::NormalRequest(domain)),
        }
    }

    pub fn domain(&self) -> &DomainName {
        match self {
            HandshakeKind::NormalRequest(d) | HandshakeKind::ValidationProbe(d) => d,
        }
    }

    pub fn is_probe(&self) -> bool {
        matches!(self, HandshakeKind::ValidationProbe(_))
    }
}

struct Inner {
    driver: AuthorizationDriver,
    issuer: CertificateIssuer,
    tokens: Arc<ChallengeTokenStore>,
    /// Outer lock guards only membership; each state has its own lock
    states: RwLock<HashMap<DomainName, Arc<DomainIssueState>>>,
    cache: Option<Arc<dyn CertCache>>,
    /// Empty allows any name
    allowed: HashSet<DomainName>,
    issue_timeout: Duration,
    renew_before: chrono::Duration,
    base: CancellationToken,
}

/// On-demand certificate manager
///
/// Cheap to clone; clones share all state.
#[derive(Clone)]
pub struct CertificateManager {
    inner: Arc<Inner>,
}

impl CertificateManager {
    pub fn new(client: Arc<dyn AcmeClient>, config: &AcmeConfig) -> Self {
        Self::build(client, config, None)
    }

    /// Manager that consults `cache` before contacting the CA and stores
    /// what it issues
    pub fn with_cache(
        client: Arc<dyn AcmeClient>,
        config: &AcmeConfig,
        cache: Arc<dyn CertCache>,
    ) -> Self {
        Self::build(client, config, Some(cache))
    }

    fn build(
        client: Arc<dyn AcmeClient>,
        config: &AcmeConfig,
        cache: Option<Arc<dyn CertCache>>,
    ) -> Self {
        let tokens = Arc::new(ChallengeTokenStore::new());

        let renew_before = chrono::Duration::from_std(config.renew_before())
            .unwrap_or_else(|_| chrono::Duration::days(i64::from(config.renew_before_days)));

        Self {
            inner: Arc::new(Inner {
                driver: AuthorizationDriver::new(
                    Arc::clone(&client),
                    Arc::clone(&tokens),
                    config.revoke_timeout(),
                ),
                issuer: CertificateIssuer::new(client, config.key_type),
                tokens,
                states: RwLock::new(HashMap::new()),
                cache,
                allowed: config.allowed_domains.iter().cloned().collect(),
                issue_timeout: config.issue_timeout(),
                renew_before,
                base: CancellationToken::new(),
            }),
        }
    }

    /// Validation certificates currently published
    pub fn challenge_tokens(&self) -> &Arc<ChallengeTokenStore> {
        &self.inner.tokens
    }

    /// Number of domains that have an issue state
    pub fn tracked_domains(&self) -> usize {
        self.inner.states.read().len()
    }

    /// Cancel every in-flight issuance
    pub fn shutdown(&self) {
        info!("Cancelling in-flight certificate issuance");
        self.inner.base.cancel();
    }

    /// Handshake hook: certificate for `hello`, or an opaque failure
    pub async fn get_certificate(
        &self,
        hello: &ClientHelloInfo,
    ) -> Result<Arc<CertifiedKey>, NoCertificate> {
        let Some(kind) = HandshakeKind::classify(hello) else {
            debug!(server_name = ?hello.server_name, "Handshake without a usable server name");
            return Err(NoCertificate);
        };

        match kind {
            HandshakeKind::ValidationProbe(domain) => match self.inner.tokens.get(&domain) {
                Some(cert) => {
                    debug!(domain = %domain, "Answering TLS-ALPN-01 validation probe");
                    Ok(cert)
                }
                None => {
                    debug!(domain = %domain, "Validation probe without a published token");
                    Err(NoCertificate)
                }
            },
            HandshakeKind::NormalRequest(domain) => {
                self.certificate_for(&domain).await.map_err(|e| {
                    warn!(domain = %domain, error = %e, "No certificate for handshake");
                    NoCertificate
                })
            }
        }
    }

    /// Current certificate for `domain`, issuing one if necessary
    pub async fn certificate_for(
        &self,
        domain: &DomainName,
    ) -> Result<Arc<CertifiedKey>, CertError> {
        if !self.inner.is_allowed(domain) {
            return Err(CertError::DomainNotAllowed(domain.to_string()));
        }

        let state = self.inner.state_for(domain);

        let now = Utc::now();
        if let Some(handle) = state.usable_cert(now) {
            if handle.needs_renewal(now, self.inner.renew_before) && state.start_issue() {
                info!(
                    domain = %domain,
                    not_after = %handle.not_after(),
                    "Certificate due for renewal, re-issuing in background"
                );
                self.spawn_issue(domain.clone(), Arc::clone(&state));
            }
            trace!(domain = %domain, "Serving existing certificate");
            return Ok(handle.certified_key());
        }

        let deadline = if state.start_issue() {
            self.spawn_issue(domain.clone(), Arc::clone(&state))
        } else {
            Instant::now() + self.inner.issue_timeout
        };

        state.wait_finish_issue(deadline).await?;

        let handle = state.cert()?;
        Ok(handle.certified_key())
    }

    /// Run one issuance on its own task so an abandoned handshake cannot
    /// leave the domain stuck in Issuing. Returns the attempt's deadline.
    fn spawn_issue(&self, domain: DomainName, state: Arc<DomainIssueState>) -> Instant {
        let inner = Arc::clone(&self.inner);
        let ctx = IssueContext::with_timeout(&inner.base, inner.issue_timeout);
        let deadline = ctx.deadline();

        tokio::spawn(async move {
            let outcome = inner.issue(&ctx, &domain).await.map(Arc::new);

            if let Err(e) = &outcome {
                error!(
                    domain = %domain,
                    error = %e,
                    permanent = e.is_permanent(),
                    "Certificate issuance failed"
                );
            }

            // only fails on a start/finish mismatch, which finish_issue logs
            let _ = state.finish_issue(outcome);
        });

        deadline
    }
}

impl Inner {
    fn is_allowed(&self, domain: &DomainName) -> bool {
        self.allowed.is_empty() || self.allowed.contains(domain)
    }

    fn state_for(&self, domain: &DomainName) -> Arc<DomainIssueState> {
        if let Some(state) = self.states.read().get(domain) {
            return Arc::clone(state);
        }

        let mut states = self.states.write();
        Arc::clone(
            states
                .entry(domain.clone())
                .or_insert_with(|| Arc::new(DomainIssueState::new(domain.clone()))),
        )
    }

    /// Cache, then CA
    async fn issue(
        &self,
        ctx: &IssueContext,
        domain: &DomainName,
    ) -> Result<CertificateHandle, CertError> {
        if let Some(handle) = self.load_cached(ctx, domain).await {
            return Ok(handle);
        }

        info!(domain = %domain, "Requesting certificate from ACME CA");
        self.driver.authorize(ctx, domain).await?;
        let handle = self.issuer.issue(ctx, domain).await?;

        if let Some(cache) = &self.cache {
            if let Err(e) = cache.put(domain.as_str(), handle.to_pem().as_bytes()).await {
                warn!(domain = %domain, error = %e, "Failed to store certificate in cache");
            }
        }

        Ok(handle)
    }

    async fn load_cached(&self, ctx: &IssueContext, domain: &DomainName) -> Option<CertificateHandle> {
        let cache = self.cache.as_ref()?;

        let data = match ctx.run(async { Ok(cache.get(domain.as_str()).await) }).await {
            Ok(Ok(data)) => data,
            Ok(Err(CacheError::NotFound)) => {
                trace!(domain = %domain, "Certificate not cached");
                return None;
            }
            Ok(Err(e)) => {
                warn!(domain = %domain, error = %e, "Certificate cache lookup failed");
                return None;
            }
            Err(_) => return None,
        };

        let now = Utc::now();
        match CertificateHandle::from_pem(domain.clone(), &data, now) {
            Ok(handle) if !handle.needs_renewal(now, self.renew_before) => {
                debug!(domain = %domain, not_after = %handle.not_after(), "Using cached certificate");
                Some(handle)
            }
            Ok(_) => {
                debug!(domain = %domain, "Cached certificate due for renewal");
                None
            }
            Err(e) => {
                warn!(domain = %domain, error = %e, "Discarding unusable cached certificate");
                if let Err(e) = cache.delete(domain.as_str()).await {
                    warn!(domain = %domain, error = %e, "Failed to delete cached certificate");
                }
                None
            }
        }
    }
}

impl fmt::Debug for CertificateManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CertificateManager")
            .field("domains", &self.inner.states.read().len())
            .field("challenge_tokens", &self.inner.tokens.len())
            .field("cache", &self.inner.cache.is_some())
            .field("issue_timeout", &self.inner.issue_timeout)
            .finish()
    }
}
