//! Leaf certificate checks applied before anything is served
//!
//! A chain coming back from the CA (or out of the cache) is only usable if
//! the leaf is inside its validity window, covers the hostname, and carries
//! the public half of the key the CSR was signed with.

use chrono::{DateTime, Utc};
use rcgen::KeyPair;
use x509_parser::prelude::*;

use tlsgate_common::DomainName;

use super::error::CertError;

/// Validity window of an accepted leaf
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LeafValidity {
    pub not_before: DateTime<Utc>,
    pub not_after: DateTime<Utc>,
}

/// Parse `leaf_der` and run every check against `domain` and `key`
pub fn validate_leaf(
    domain: &DomainName,
    leaf_der: &[u8],
    key: &KeyPair,
    now: DateTime<Utc>,
) -> Result<LeafValidity, CertError> {
    let (_, leaf) = X509Certificate::from_der(leaf_der)
        .map_err(|e| CertError::CertificateParse(e.to_string()))?;

    let validity = leaf_validity(&leaf)?;
    if now < validity.not_before || now > validity.not_after {
        return Err(CertError::OutsideValidity {
            domain: domain.to_string(),
            not_before: validity.not_before.to_rfc3339(),
            not_after: validity.not_after.to_rfc3339(),
        });
    }

    if !covers_hostname(&leaf, domain)? {
        return Err(CertError::HostnameMismatch {
            domain: domain.to_string(),
        });
    }

    let leaf_key: &[u8] = &leaf.public_key().subject_public_key.data;
    if leaf_key != key.public_key_raw() {
        return Err(CertError::KeyMismatch {
            domain: domain.to_string(),
        });
    }

    Ok(validity)
}

fn leaf_validity(leaf: &X509Certificate<'_>) -> Result<LeafValidity, CertError> {
    let to_utc = |ts: i64| {
        DateTime::<Utc>::from_timestamp(ts, 0)
            .ok_or_else(|| CertError::CertificateParse(format!("Timestamp {} out of range", ts)))
    };

    Ok(LeafValidity {
        not_before: to_utc(leaf.validity().not_before.timestamp())?,
        not_after: to_utc(leaf.validity().not_after.timestamp())?,
    })
}

/// Hostname verification against the leaf's DNS SANs
///
/// The subject CN is not consulted.
fn covers_hostname(leaf: &X509Certificate<'_>, domain: &DomainName) -> Result<bool, CertError> {
    let Some(san) = leaf
        .subject_alternative_name()
        .map_err(|e| CertError::CertificateParse(e.to_string()))?
    else {
        return Ok(false);
    };

    Ok(san.value.general_names.iter().any(|name| match name {
        GeneralName::DNSName(pattern) => hostname_matches(pattern, domain.as_str()),
        _ => false,
    }))
}

/// Match a SAN entry against a normalized hostname. A leading `*.` matches
/// exactly one label.
pub fn hostname_matches(pattern: &str, host: &str) -> bool {
    let pattern = pattern.trim_end_matches('.').to_ascii_lowercase();

    match pattern.strip_prefix("*.") {
        Some(suffix) => match host.split_once('.') {
            Some((label, rest)) => !label.is_empty() && rest == suffix,
            None => false,
        },
        None => pattern == host,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use rcgen::{CertificateParams, PKCS_ECDSA_P256_SHA256};

    fn domain(name: &str) -> DomainName {
        DomainName::parse(name).unwrap()
    }

    fn self_signed(names: &[&str], key: &KeyPair) -> Vec<u8> {
        let mut params =
            CertificateParams::new(names.iter().map(|n| n.to_string()).collect::<Vec<_>>())
                .unwrap();
        params.not_before = rcgen::date_time_ymd(2020, 1, 1);
        params.not_after = rcgen::date_time_ymd(2040, 1, 1);
        params.self_signed(key).unwrap().der().to_vec()
    }

    #[test]
    fn test_valid_leaf_accepted() {
        let key = KeyPair::generate_for(&PKCS_ECDSA_P256_SHA256).unwrap();
        let der = self_signed(&["example.com"], &key);

        let validity = validate_leaf(&domain("example.com"), &der, &key, Utc::now()).unwrap();
        assert!(validity.not_before < validity.not_after);
    }

    #[test]
    fn test_mismatched_key_rejected() {
        let key = KeyPair::generate_for(&PKCS_ECDSA_P256_SHA256).unwrap();
        let other = KeyPair::generate_for(&PKCS_ECDSA_P256_SHA256).unwrap();
        let der = self_signed(&["example.com"], &key);

        let err = validate_leaf(&domain("example.com"), &der, &other, Utc::now()).unwrap_err();
        assert!(matches!(err, CertError::KeyMismatch { .. }));
    }

    #[test]
    fn test_wrong_hostname_rejected() {
        let key = KeyPair::generate().unwrap();
        let der = self_signed(&["other.example.com"], &key);

        let err = validate_leaf(&domain("example.com"), &der, &key, Utc::now()).unwrap_err();
        assert!(matches!(err, CertError::HostnameMismatch { .. }));
    }

    #[test]
    fn test_outside_validity_rejected() {
        let key = KeyPair::generate().unwrap();
        let der = self_signed(&["example.com"], &key);
        let d = domain("example.com");

        let too_late = Utc::now() + Duration::days(365 * 30);
        assert!(matches!(
            validate_leaf(&d, &der, &key, too_late).unwrap_err(),
            CertError::OutsideValidity { .. }
        ));

        let too_early = DateTime::<Utc>::from_timestamp(1_000_000_000, 0).unwrap();
        assert!(matches!(
            validate_leaf(&d, &der, &key, too_early).unwrap_err(),
            CertError::OutsideValidity { .. }
        ));
    }

    #[test]
    fn test_garbage_rejected() {
        let key = KeyPair::generate().unwrap();
        let err = validate_leaf(&domain("example.com"), b"not a cert", &key, Utc::now())
            .unwrap_err();
        assert!(matches!(err, CertError::CertificateParse(_)));
    }

    #[test]
    fn test_hostname_matching() {
        assert!(hostname_matches("example.com", "example.com"));
        assert!(hostname_matches("Example.COM.", "example.com"));
        assert!(hostname_matches("*.example.com", "www.example.com"));
        assert!(!hostname_matches("*.example.com", "example.com"));
        assert!(!hostname_matches("*.example.com", "a.b.example.com"));
        assert!(!hostname_matches("www.example.com", "example.com"));
    }
}
