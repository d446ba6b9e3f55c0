//! [`AcmeClient`] on top of `instant-acme`
//!
//! `instant-acme` speaks the order-based RFC 8555 flow. Each call to
//! [`AcmeClient::authorize`] creates a single-identifier order and exposes
//! its authorization; the order stays parked here until the certificate is
//! fetched or the authorization is abandoned.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;
use instant_acme::{
    Account, AccountCredentials, AuthorizationStatus as AcmeAuthorizationStatus, ChallengeType,
    Identifier, NewAccount, NewOrder, Order, OrderStatus,
};
use rustls::pki_types::CertificateDer;
use tokio::sync::Mutex;
use tracing::{debug, info, trace};
use uuid::Uuid;

use tlsgate_common::DomainName;
use tlsgate_config::AcmeConfig;

use super::client::{AcmeClient, Authorization, AuthorizationStatus, Challenge, ChallengeKind};
use super::error::CertError;

/// Delay between order status polls
const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(1);

/// ACME client backed by an `instant-acme` account
pub struct InstantAcmeClient {
    account: Account,
    /// In-flight orders keyed by the authorization URI handed out
    orders: DashMap<String, Arc<Mutex<Order>>>,
    /// Latest order per domain, used by `create_cert`
    by_domain: DashMap<DomainName, String>,
    poll_interval: Duration,
}

impl InstantAcmeClient {
    /// Wrap an existing account
    pub fn new(account: Account) -> Self {
        Self {
            account,
            orders: DashMap::new(),
            by_domain: DashMap::new(),
            poll_interval: DEFAULT_POLL_INTERVAL,
        }
    }

    /// Set the order polling interval
    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    /// Load the account from the credentials file, registering a new one if
    /// the file does not exist yet
    pub async fn from_config(config: &AcmeConfig) -> Result<Self, CertError> {
        let path = config.account_credentials.as_path();

        if let Some(credentials) = load_credentials(path).await? {
            info!(path = %path.display(), "Loading existing ACME account");

            let account = Account::builder()
                .map_err(|e| CertError::Account(e.to_string()))?
                .from_credentials(credentials)
                .await
                .map_err(|e| CertError::Account(e.to_string()))?;

            return Ok(Self::new(account));
        }

        info!(
            email = %config.email,
            directory = %config.directory_url(),
            "Creating new ACME account"
        );

        let (account, credentials) = Account::builder()
            .map_err(|e| CertError::Account(e.to_string()))?
            .create(
                &NewAccount {
                    contact: &[&format!("mailto:{}", config.email)],
                    terms_of_service_agreed: true,
                    only_return_existing: false,
                },
                config.directory_url().to_owned(),
                None,
            )
            .await
            .map_err(|e| CertError::Account(e.to_string()))?;

        save_credentials(path, &credentials).await?;
        info!(path = %path.display(), "ACME account created");

        Ok(Self::new(account))
    }

    fn order(&self, uri: &str) -> Result<Arc<Mutex<Order>>, CertError> {
        self.orders
            .get(uri)
            .map(|entry| Arc::clone(entry.value()))
            .ok_or_else(|| CertError::Protocol(format!("Unknown authorization '{}'", uri)))
    }

    fn forget(&self, uri: &str) {
        if self.orders.remove(uri).is_some() {
            self.by_domain.retain(|_, v| v != uri);
        }
    }
}

impl ChallengeKind {
    fn from_acme(challenge_type: &ChallengeType) -> Option<Self> {
        match challenge_type {
            ChallengeType::TlsAlpn01 => Some(ChallengeKind::TlsAlpn01),
            ChallengeType::Http01 => Some(ChallengeKind::Http01),
            ChallengeType::Dns01 => Some(ChallengeKind::Dns01),
            _ => None,
        }
    }
}

#[async_trait]
impl AcmeClient for InstantAcmeClient {
    async fn authorize(&self, domain: &DomainName) -> Result<Authorization, CertError> {
        let identifiers = [Identifier::Dns(domain.to_string())];
        let mut order = self.account.new_order(&NewOrder::new(&identifiers)).await?;

        let mut found = None;
        {
            let mut authorizations = order.authorizations();
            if let Some(result) = authorizations.next().await {
                let authz = result?;

                let status = match authz.status {
                    AcmeAuthorizationStatus::Valid => AuthorizationStatus::Valid,
                    AcmeAuthorizationStatus::Pending => AuthorizationStatus::Pending,
                    _ => AuthorizationStatus::Invalid,
                };

                let offered: Vec<ChallengeType> =
                    authz.challenges.iter().map(|c| c.r#type.clone()).collect();

                let mut challenges = Vec::with_capacity(offered.len());
                for challenge_type in offered {
                    let Some(kind) = ChallengeKind::from_acme(&challenge_type) else {
                        continue;
                    };
                    if let Some(challenge) =
                        authz.challenges.iter().find(|c| c.r#type == challenge_type)
                    {
                        challenges.push(Challenge {
                            kind,
                            url: challenge.url.clone(),
                            token: challenge.token.clone(),
                            key_authorization: format!(
                                "{}.{}",
                                challenge.token,
                                self.account.key_thumbprint()
                            ),
                        });
                    }
                }

                found = Some((status, challenges));
            }
        }

        let (status, challenges) = found.ok_or_else(|| {
            CertError::Protocol(format!("Order for '{}' carries no authorization", domain))
        })?;

        let uri = format!("urn:uuid:{}", Uuid::new_v4());
        debug!(domain = %domain, uri = %uri, status = ?status, "Created ACME order");

        self.orders.insert(uri.clone(), Arc::new(Mutex::new(order)));
        if let Some(previous) = self.by_domain.insert(domain.clone(), uri.clone()) {
            self.orders.remove(&previous);
        }

        Ok(Authorization {
            uri,
            domain: domain.clone(),
            status,
            challenges,
        })
    }

    async fn accept(&self, authz: &Authorization, challenge: &Challenge) -> Result<(), CertError> {
        debug!(domain = %authz.domain, challenge_url = %challenge.url, "Setting challenge ready");

        let order = self.order(&authz.uri)?;
        let mut order = order.lock().await;

        let mut authorizations = order.authorizations();
        while let Some(result) = authorizations.next().await {
            let mut handle = result?;

            let matching_type = handle
                .challenges
                .iter()
                .find(|c| c.url == challenge.url)
                .map(|c| c.r#type.clone());

            if let Some(challenge_type) = matching_type {
                if let Some(mut ready) = handle.challenge(challenge_type) {
                    ready.set_ready().await?;
                    return Ok(());
                }
            }
        }

        Err(CertError::Protocol(format!(
            "Challenge not found for URL: {}",
            challenge.url
        )))
    }

    async fn wait_authorization(&self, uri: &str) -> Result<(), CertError> {
        let order = self.order(uri)?;
        let mut order = order.lock().await;

        loop {
            let verdict = match order.refresh().await?.status {
                OrderStatus::Ready | OrderStatus::Valid => Some(Ok(())),
                OrderStatus::Invalid => Some(Err(CertError::Protocol(
                    "Order became invalid".to_string(),
                ))),
                OrderStatus::Pending | OrderStatus::Processing => None,
            };

            if let Some(verdict) = verdict {
                return verdict;
            }

            trace!(uri = %uri, "Authorization not validated yet, waiting");
            tokio::time::sleep(self.poll_interval).await;
        }
    }

    async fn create_cert(
        &self,
        domain: &DomainName,
        csr_der: &[u8],
    ) -> Result<Vec<CertificateDer<'static>>, CertError> {
        let uri = self
            .by_domain
            .get(domain)
            .map(|entry| entry.value().clone())
            .ok_or_else(|| {
                CertError::Protocol(format!("No authorized order for domain '{}'", domain))
            })?;
        let order = self.order(&uri)?;

        let chain_pem = {
            let mut order = order.lock().await;
            order.finalize_csr(csr_der).await?;

            loop {
                let issued = match order.refresh().await?.status {
                    OrderStatus::Valid => true,
                    OrderStatus::Invalid => {
                        return Err(CertError::Protocol(
                            "Order became invalid during finalization".to_string(),
                        ));
                    }
                    _ => false,
                };

                if issued {
                    if let Some(pem) = order.certificate().await? {
                        break pem;
                    }
                }

                tokio::time::sleep(self.poll_interval).await;
            }
        };

        self.forget(&uri);

        rustls_pemfile::certs(&mut chain_pem.as_bytes())
            .collect::<Result<Vec<_>, _>>()
            .map_err(|e| CertError::CertificateParse(e.to_string()))
    }

    /// `instant-acme` does not expose authorization deactivation, so the
    /// order is dropped and left to expire on the CA side.
    async fn revoke_authorization(&self, uri: &str) -> Result<(), CertError> {
        debug!(uri = %uri, "Abandoning ACME order");
        self.forget(uri);
        Ok(())
    }
}

async fn load_credentials(path: &Path) -> Result<Option<AccountCredentials>, CertError> {
    let content = match tokio::fs::read_to_string(path).await {
        Ok(content) => content,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(e) => {
            return Err(CertError::Account(format!(
                "Failed to read {}: {}",
                path.display(),
                e
            )))
        }
    };

    serde_json::from_str(&content)
        .map(Some)
        .map_err(|e| CertError::Account(format!("Failed to deserialize credentials: {}", e)))
}

async fn save_credentials(path: &Path, credentials: &AccountCredentials) -> Result<(), CertError> {
    let json = serde_json::to_string_pretty(credentials)
        .map_err(|e| CertError::Account(format!("Failed to serialize credentials: {}", e)))?;

    let write_err = |e: std::io::Error| {
        CertError::Account(format!("Failed to write {}: {}", path.display(), e))
    };

    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent).await.map_err(write_err)?;
    }
    tokio::fs::write(path, json).await.map_err(write_err)?;

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        tokio::fs::set_permissions(path, std::fs::Permissions::from_mode(0o600))
            .await
            .map_err(write_err)?;
    }

    Ok(())
}

impl std::fmt::Debug for InstantAcmeClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InstantAcmeClient")
            .field("pending_orders", &self.orders.len())
            .field("poll_interval", &self.poll_interval)
            .finish()
    }
}
