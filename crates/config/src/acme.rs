//! ACME configuration types
//!
//! Settings for on-demand certificate issuance: which directory to talk to,
//! where the account credentials live, key strength, and the deadlines that
//! bound an issuance attempt.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;
use validator::Validate;

use tlsgate_common::DomainName;

/// Let's Encrypt production directory URL
pub const LETSENCRYPT_PRODUCTION: &str = "https://acme-v02.api.letsencrypt.org/directory";
/// Let's Encrypt staging directory URL
pub const LETSENCRYPT_STAGING: &str = "https://acme-staging-v02.api.letsencrypt.org/directory";

/// Private key algorithm used for issued certificates
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum KeyType {
    /// ECDSA on the P-256 curve
    #[default]
    EcdsaP256,
    /// ECDSA on the P-384 curve
    EcdsaP384,
}

impl KeyType {
    /// Parse a key type name as written in KDL (`ecdsa-p256`, `ecdsa-p384`)
    pub fn from_str_loose(s: &str) -> Option<Self> {
        match s.to_ascii_lowercase().replace('_', "-").as_str() {
            "ecdsa-p256" | "p256" | "p-256" => Some(KeyType::EcdsaP256),
            "ecdsa-p384" | "p384" | "p-384" => Some(KeyType::EcdsaP384),
            _ => None,
        }
    }
}

/// On-demand ACME issuance configuration
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct AcmeConfig {
    /// Contact email for the ACME account
    #[validate(email)]
    pub email: String,

    /// Explicit directory URL; overrides `staging`
    #[serde(default)]
    pub directory: Option<String>,

    /// Use the Let's Encrypt staging directory
    #[serde(default)]
    pub staging: bool,

    /// JSON file holding the serialized account credentials
    #[serde(default = "default_account_credentials")]
    pub account_credentials: PathBuf,

    /// Key algorithm for issued certificates
    #[serde(default)]
    pub key_type: KeyType,

    /// Upper bound on one issuance attempt, and so on how long a handshake
    /// may wait for a certificate
    #[serde(default = "default_issue_timeout")]
    #[validate(range(min = 1))]
    pub issue_timeout_secs: u64,

    /// Start re-issuing this many days before a certificate expires
    #[serde(default = "default_renew_before_days")]
    pub renew_before_days: u32,

    /// Upper bound on the detached cleanup of abandoned authorizations
    #[serde(default = "default_revoke_timeout")]
    #[validate(range(min = 1))]
    pub revoke_timeout_secs: u64,

    /// Hostnames certificates may be issued for; empty allows any name
    #[serde(default)]
    pub allowed_domains: Vec<DomainName>,
}

impl AcmeConfig {
    /// Resolved ACME directory URL
    pub fn directory_url(&self) -> &str {
        match &self.directory {
            Some(url) => url,
            None if self.staging => LETSENCRYPT_STAGING,
            None => LETSENCRYPT_PRODUCTION,
        }
    }

    pub fn issue_timeout(&self) -> Duration {
        Duration::from_secs(self.issue_timeout_secs)
    }

    pub fn revoke_timeout(&self) -> Duration {
        Duration::from_secs(self.revoke_timeout_secs)
    }

    pub fn renew_before(&self) -> Duration {
        Duration::from_secs(u64::from(self.renew_before_days) * 86400)
    }
}

impl Default for AcmeConfig {
    fn default() -> Self {
        Self {
            email: String::new(),
            directory: None,
            staging: false,
            account_credentials: default_account_credentials(),
            key_type: KeyType::default(),
            issue_timeout_secs: default_issue_timeout(),
            renew_before_days: default_renew_before_days(),
            revoke_timeout_secs: default_revoke_timeout(),
            allowed_domains: Vec::new(),
        }
    }
}

// Default value functions
pub(crate) fn default_account_credentials() -> PathBuf {
    PathBuf::from("/var/lib/tlsgate/account.json")
}

pub(crate) fn default_issue_timeout() -> u64 {
    60
}

pub(crate) fn default_renew_before_days() -> u32 {
    30
}

pub(crate) fn default_revoke_timeout() -> u64 {
    60
}
