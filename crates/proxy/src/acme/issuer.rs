//! Certificate issuance for an authorized domain
//!
//! Generates a fresh key, submits a single-name CSR, checks what comes back,
//! and packages it for rustls. Nothing is returned unless every leaf check
//! passed.

use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use rcgen::{CertificateParams, DistinguishedName, DnType, KeyPair};
use rustls::pki_types::CertificateDer;
use rustls::sign::CertifiedKey;
use tracing::{debug, info};

use tlsgate_common::DomainName;
use tlsgate_config::KeyType;

use super::client::AcmeClient;
use super::context::IssueContext;
use super::error::CertError;
use super::keys;
use super::validation::{validate_leaf, LeafValidity};

const PEM_PRIVATE_KEY: &str = "PRIVATE KEY";
const PEM_CERTIFICATE: &str = "CERTIFICATE";

/// A servable certificate: key, chain and the leaf's validity window
pub struct CertificateHandle {
    domain: DomainName,
    chain: Vec<CertificateDer<'static>>,
    key_pem: String,
    certified: Arc<CertifiedKey>,
    validity: LeafValidity,
}

impl CertificateHandle {
    /// Validate `chain` against `key` and package it
    pub fn new(
        domain: DomainName,
        key: &KeyPair,
        chain: Vec<CertificateDer<'static>>,
        now: DateTime<Utc>,
    ) -> Result<Self, CertError> {
        let leaf = chain.first().ok_or_else(|| CertError::EmptyChain {
            domain: domain.to_string(),
        })?;

        let validity = validate_leaf(&domain, leaf.as_ref(), key, now)?;
        let certified = Arc::new(keys::certified_key(chain.clone(), key)?);

        Ok(Self {
            domain,
            chain,
            key_pem: key.serialize_pem(),
            certified,
            validity,
        })
    }

    /// Rebuild a handle from its PEM form (private key then chain)
    ///
    /// The result goes through the same checks as a freshly issued chain.
    pub fn from_pem(domain: DomainName, data: &[u8], now: DateTime<Utc>) -> Result<Self, CertError> {
        let blocks = pem::parse_many(data).map_err(|e| CertError::CertificateParse(e.to_string()))?;

        let mut key = None;
        let mut chain = Vec::new();
        for block in &blocks {
            match block.tag() {
                PEM_PRIVATE_KEY if key.is_none() => key = Some(pem::encode(block)),
                PEM_CERTIFICATE => chain.push(CertificateDer::from(block.contents().to_vec())),
                other => {
                    return Err(CertError::CertificateParse(format!(
                        "Unexpected PEM block '{}'",
                        other
                    )))
                }
            }
        }

        let key_pem = key.ok_or_else(|| {
            CertError::CertificateParse("No private key in PEM data".to_string())
        })?;
        let key =
            KeyPair::from_pem(&key_pem).map_err(|e| CertError::SigningKey(e.to_string()))?;

        Self::new(domain, &key, chain, now)
    }

    /// PEM encoding: private key followed by the chain, leaf first
    pub fn to_pem(&self) -> String {
        let certs: Vec<pem::Pem> = self
            .chain
            .iter()
            .map(|der| pem::Pem::new(PEM_CERTIFICATE, der.as_ref().to_vec()))
            .collect();

        let mut out = self.key_pem.clone();
        out.push_str(&pem::encode_many(&certs));
        out
    }

    pub fn domain(&self) -> &DomainName {
        &self.domain
    }

    pub fn chain(&self) -> &[CertificateDer<'static>] {
        &self.chain
    }

    /// Key and chain as handed to the TLS stack
    pub fn certified_key(&self) -> Arc<CertifiedKey> {
        Arc::clone(&self.certified)
    }

    pub fn not_before(&self) -> DateTime<Utc> {
        self.validity.not_before
    }

    pub fn not_after(&self) -> DateTime<Utc> {
        self.validity.not_after
    }

    pub fn is_valid_at(&self, now: DateTime<Utc>) -> bool {
        self.validity.not_before <= now && now <= self.validity.not_after
    }

    /// Whether `now` falls within `renew_before` of expiry
    pub fn needs_renewal(&self, now: DateTime<Utc>, renew_before: chrono::Duration) -> bool {
        now + renew_before >= self.validity.not_after
    }
}

impl fmt::Debug for CertificateHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CertificateHandle")
            .field("domain", &self.domain)
            .field("chain_len", &self.chain.len())
            .field("not_before", &self.validity.not_before)
            .field("not_after", &self.validity.not_after)
            .finish_non_exhaustive()
    }
}

/// Turns an authorized domain into a [`CertificateHandle`]
pub struct CertificateIssuer {
    client: Arc<dyn AcmeClient>,
    key_type: KeyType,
}

impl CertificateIssuer {
    pub fn new(client: Arc<dyn AcmeClient>, key_type: KeyType) -> Self {
        Self { client, key_type }
    }

    /// Issue a certificate for `domain`, whose authorization must already be
    /// valid
    pub async fn issue(
        &self,
        ctx: &IssueContext,
        domain: &DomainName,
    ) -> Result<CertificateHandle, CertError> {
        let key = keys::generate(self.key_type)?;
        let csr_der = build_csr(domain, &key)?;

        debug!(domain = %domain, key_type = ?self.key_type, "Submitting CSR");
        let chain = ctx
            .run(self.client.create_cert(domain, &csr_der))
            .await?;

        let handle = CertificateHandle::new(domain.clone(), &key, chain, Utc::now())?;

        info!(
            domain = %domain,
            not_after = %handle.not_after(),
            chain_len = handle.chain().len(),
            "Certificate issued"
        );

        Ok(handle)
    }
}

/// DER CSR with `domain` as common name and sole DNS SAN
fn build_csr(domain: &DomainName, key: &KeyPair) -> Result<Vec<u8>, CertError> {
    let mut params = CertificateParams::new(vec![domain.to_string()])
        .map_err(|e| CertError::Csr(e.to_string()))?;

    let mut dn = DistinguishedName::new();
    dn.push(DnType::CommonName, domain.as_str());
    params.distinguished_name = dn;

    let csr = params
        .serialize_request(key)
        .map_err(|e| CertError::Csr(e.to_string()))?;

    Ok(csr.der().to_vec())
}
