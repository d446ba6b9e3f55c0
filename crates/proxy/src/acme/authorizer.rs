//! ACME authorization driver
//!
//! Takes one domain through the CA's authorization protocol for one attempt:
//! poll a fresh authorization, pick the next untried challenge type, publish
//! the validation certificate, accept, wait for the verdict. Accept and
//! verdict failures re-poll; the attempt's deadline is the only bound on
//! that loop. Authorizations left pending when the attempt ends are given up
//! by a detached task.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info, warn};

use tlsgate_common::DomainName;

use super::challenge::{tls_alpn01_certificate, ChallengeTokenStore, TokenCleanup};
use super::client::{AcmeClient, Authorization, AuthorizationStatus, Challenge, ChallengeKind};
use super::context::IssueContext;
use super::error::CertError;

/// Challenge types this proxy can fulfill, in order of preference
pub const ALLOWED_CHALLENGES: &[ChallengeKind] = &[ChallengeKind::TlsAlpn01];

/// Monotonic position in the allowed challenge list
///
/// A type is consumed once it has been looked at, whether or not the CA
/// offered it, so one attempt never goes back to it.
#[derive(Debug)]
pub struct ChallengeCursor<'a> {
    allowed: &'a [ChallengeKind],
    next: usize,
}

impl<'a> ChallengeCursor<'a> {
    pub fn new(allowed: &'a [ChallengeKind]) -> Self {
        Self { allowed, next: 0 }
    }

    /// Next allowed challenge offered on `authz`, advancing past it
    pub fn next_offered<'z>(&mut self, authz: &'z Authorization) -> Option<&'z Challenge> {
        while let Some(kind) = self.allowed.get(self.next) {
            self.next += 1;
            if let Some(challenge) = authz.challenges.iter().find(|c| c.kind == *kind) {
                return Some(challenge);
            }
        }
        None
    }
}

/// Authorization URIs started but not confirmed valid
///
/// Dropping the set hands whatever is left to a background task that revokes
/// them under its own timeout. Dropping also happens when the attempt future
/// is abandoned, so cancellation still cleans up.
struct PendingAuthorizations {
    uris: HashSet<String>,
    client: Arc<dyn AcmeClient>,
    domain: DomainName,
    revoke_timeout: Duration,
}

impl PendingAuthorizations {
    fn insert(&mut self, uri: &str) {
        self.uris.insert(uri.to_string());
    }

    fn remove(&mut self, uri: &str) {
        self.uris.remove(uri);
    }
}

impl Drop for PendingAuthorizations {
    fn drop(&mut self) {
        if self.uris.is_empty() {
            return;
        }

        let uris: Vec<String> = self.uris.drain().collect();
        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            warn!(
                domain = %self.domain,
                pending = uris.len(),
                "No runtime to revoke pending authorizations"
            );
            return;
        };

        let client = Arc::clone(&self.client);
        let domain = self.domain.clone();
        let timeout = self.revoke_timeout;

        runtime.spawn(async move {
            for uri in uris {
                match tokio::time::timeout(timeout, client.revoke_authorization(&uri)).await {
                    Ok(Ok(())) => debug!(domain = %domain, uri = %uri, "Revoked pending authorization"),
                    Ok(Err(e)) => warn!(
                        domain = %domain,
                        uri = %uri,
                        error = %e,
                        "Failed to revoke pending authorization"
                    ),
                    Err(_) => warn!(
                        domain = %domain,
                        uri = %uri,
                        "Timed out revoking pending authorization"
                    ),
                }
            }
        });
    }
}

/// Drives domains to a valid authorization
pub struct AuthorizationDriver {
    client: Arc<dyn AcmeClient>,
    tokens: Arc<ChallengeTokenStore>,
    allowed: &'static [ChallengeKind],
    revoke_timeout: Duration,
}

impl AuthorizationDriver {
    pub fn new(
        client: Arc<dyn AcmeClient>,
        tokens: Arc<ChallengeTokenStore>,
        revoke_timeout: Duration,
    ) -> Self {
        Self {
            client,
            tokens,
            allowed: ALLOWED_CHALLENGES,
            revoke_timeout,
        }
    }

    /// Run one attempt until `domain` holds a valid authorization
    pub async fn authorize(&self, ctx: &IssueContext, domain: &DomainName) -> Result<(), CertError> {
        let mut pending = PendingAuthorizations {
            uris: HashSet::new(),
            client: Arc::clone(&self.client),
            domain: domain.clone(),
            revoke_timeout: self.revoke_timeout,
        };
        let mut cursor = ChallengeCursor::new(self.allowed);

        loop {
            let authz = ctx.run(self.client.authorize(domain)).await?;

            match authz.status {
                AuthorizationStatus::Valid => {
                    debug!(domain = %domain, "Authorization already valid");
                    return Ok(());
                }
                AuthorizationStatus::Invalid => {
                    warn!(domain = %domain, uri = %authz.uri, "Authorization is invalid");
                    return Err(CertError::AuthorizationInvalid {
                        domain: domain.to_string(),
                    });
                }
                AuthorizationStatus::Pending => {}
            }

            pending.insert(&authz.uri);

            let Some(challenge) = cursor.next_offered(&authz) else {
                let offered: Vec<String> = authz
                    .challenges
                    .iter()
                    .map(|c| c.kind.to_string())
                    .collect();
                warn!(
                    domain = %domain,
                    offered = ?offered,
                    "No compatible challenge type left"
                );
                return Err(CertError::NoCompatibleChallenge {
                    domain: domain.to_string(),
                });
            };

            match self.attempt_challenge(ctx, domain, &authz, challenge).await {
                Ok(()) => {
                    pending.remove(&authz.uri);
                    info!(domain = %domain, challenge = %challenge.kind, "Domain authorized");
                    return Ok(());
                }
                Err(e) if e.is_context() => return Err(e),
                Err(e) => {
                    warn!(
                        domain = %domain,
                        challenge = %challenge.kind,
                        error = %e,
                        "Challenge round failed, polling authorization again"
                    );
                }
            }
        }
    }

    /// One challenge round; the published token is removed when it ends
    async fn attempt_challenge(
        &self,
        ctx: &IssueContext,
        domain: &DomainName,
        authz: &Authorization,
        challenge: &Challenge,
    ) -> Result<(), CertError> {
        let _cleanup = self.fulfill(domain, challenge)?;

        debug!(domain = %domain, uri = %authz.uri, "Accepting challenge");
        ctx.run(self.client.accept(authz, challenge)).await?;
        ctx.run(self.client.wait_authorization(&authz.uri)).await
    }

    fn fulfill(&self, domain: &DomainName, challenge: &Challenge) -> Result<TokenCleanup, CertError> {
        match challenge.kind {
            ChallengeKind::TlsAlpn01 => {
                let cert = tls_alpn01_certificate(domain, challenge)?;
                self.tokens.put(domain.clone(), Arc::new(cert));
                Ok(TokenCleanup::new(Arc::clone(&self.tokens), domain.clone()))
            }
            kind => Err(CertError::UnsupportedChallenge(kind)),
        }
    }
}
