//! ACME block KDL parsing.

use anyhow::Result;
use std::path::PathBuf;
use tracing::trace;

use tlsgate_common::DomainName;

use crate::acme::*;

use super::helpers::{get_bool_entry, get_string_entries, get_string_entry, get_u64_entry};

/// Parse the `acme { ... }` block
pub fn parse_acme_config(node: &kdl::KdlNode) -> Result<AcmeConfig> {
    trace!("Parsing acme configuration block");

    let email = get_string_entry(node, "email").ok_or_else(|| {
        anyhow::anyhow!("ACME requires an 'email' field, e.g., email \"admin@example.com\"")
    })?;

    let key_type = match get_string_entry(node, "key-type") {
        Some(s) => KeyType::from_str_loose(&s).ok_or_else(|| {
            anyhow::anyhow!(
                "Invalid key-type '{}'. Valid key types: ecdsa-p256, ecdsa-p384",
                s
            )
        })?,
        None => KeyType::default(),
    };

    let renew_before_days = match get_u64_entry(node, "renew-before-days")? {
        Some(v) => u32::try_from(v)
            .map_err(|_| anyhow::anyhow!("renew-before-days is out of range: {}", v))?,
        None => default_renew_before_days(),
    };

    let allowed_domains = get_string_entries(node, "allowed-domains")
        .iter()
        .map(|d| DomainName::parse(d))
        .collect::<Result<Vec<_>, _>>()?;

    let config = AcmeConfig {
        email,
        directory: get_string_entry(node, "directory"),
        staging: get_bool_entry(node, "staging").unwrap_or(false),
        account_credentials: get_string_entry(node, "account-credentials")
            .map(PathBuf::from)
            .unwrap_or_else(default_account_credentials),
        key_type,
        issue_timeout_secs: get_u64_entry(node, "issue-timeout-secs")?
            .unwrap_or_else(default_issue_timeout),
        renew_before_days,
        revoke_timeout_secs: get_u64_entry(node, "revoke-timeout-secs")?
            .unwrap_or_else(default_revoke_timeout),
        allowed_domains,
    };

    trace!(
        directory = %config.directory_url(),
        key_type = ?config.key_type,
        issue_timeout_secs = config.issue_timeout_secs,
        allowed_domains = config.allowed_domains.len(),
        "Parsed acme configuration"
    );

    Ok(config)
}
