//! Type-safe identifier newtypes for tlsgate.
//!
//! [`DomainName`] is the key for every per-domain table in the proxy (issue
//! state, challenge tokens, cache entries). Constructing one normalizes the
//! input, so two names that differ only in case or a trailing dot compare
//! equal and hash to the same slot.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::errors::TlsgateError;

/// Maximum length of a DNS name in presentation format
const MAX_DOMAIN_LEN: usize = 253;

/// Maximum length of a single DNS label
const MAX_LABEL_LEN: usize = 63;

/// Normalize a hostname: trim whitespace, strip trailing dots, lower-case.
///
/// This does not check that the result is a valid hostname; use
/// [`DomainName::parse`] for that.
pub fn normalize(name: &str) -> String {
    name.trim().trim_end_matches('.').to_ascii_lowercase()
}

/// Normalized DNS name used as a certificate subject.
///
/// Equality is case- and trailing-dot-insensitive because the stored form is
/// always normalized.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct DomainName(String);

impl DomainName {
    /// Normalize and validate a hostname
    pub fn parse(input: &str) -> Result<Self, TlsgateError> {
        let name = normalize(input);
        let invalid = |reason| TlsgateError::InvalidDomain {
            input: input.to_string(),
            reason,
        };

        if name.is_empty() {
            return Err(invalid("empty name"));
        }
        if name.len() > MAX_DOMAIN_LEN {
            return Err(invalid("name longer than 253 characters"));
        }
        if name.parse::<std::net::IpAddr>().is_ok() {
            return Err(invalid("IP addresses are not supported"));
        }

        for label in name.split('.') {
            if label.is_empty() {
                return Err(invalid("empty label"));
            }
            if label.len() > MAX_LABEL_LEN {
                return Err(invalid("label longer than 63 characters"));
            }
            if label.starts_with('-') || label.ends_with('-') {
                return Err(invalid("label starts or ends with a hyphen"));
            }
            if !label
                .bytes()
                .all(|b| b.is_ascii_alphanumeric() || b == b'-' || b == b'_')
            {
                return Err(invalid("label contains characters outside [a-z0-9-_]"));
            }
        }

        Ok(Self(name))
    }

    /// Get the inner string value
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for DomainName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for DomainName {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for DomainName {
    type Error = TlsgateError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        Self::parse(&s)
    }
}

impl TryFrom<&str> for DomainName {
    type Error = TlsgateError;

    fn try_from(s: &str) -> Result<Self, Self::Error> {
        Self::parse(s)
    }
}

impl From<DomainName> for String {
    fn from(d: DomainName) -> Self {
        d.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_normalize_case_and_trailing_dot() {
        assert_eq!(normalize("Example.COM."), "example.com");
        assert_eq!(normalize("example.com"), "example.com");
        assert_eq!(normalize("  www.Example.com.  "), "www.example.com");
    }

    #[test]
    fn test_domain_equality_after_normalization() {
        let a = DomainName::parse("Example.COM.").unwrap();
        let b = DomainName::parse("example.com").unwrap();
        assert_eq!(a, b);
        assert_eq!(a.as_str(), "example.com");
        assert_eq!(a.to_string(), "example.com");
    }

    #[test]
    fn test_rejects_invalid_names() {
        assert!(DomainName::parse("").is_err());
        assert!(DomainName::parse(".").is_err());
        assert!(DomainName::parse("a..b").is_err());
        assert!(DomainName::parse("-bad.example.com").is_err());
        assert!(DomainName::parse("bad host.com").is_err());
        assert!(DomainName::parse("127.0.0.1").is_err());
        assert!(DomainName::parse(&"a".repeat(64)).is_err());
    }

    #[test]
    fn test_serde_roundtrip_normalizes() {
        let d: DomainName = serde_json::from_str("\"API.Example.com.\"").unwrap();
        assert_eq!(d.as_str(), "api.example.com");
        assert_eq!(serde_json::to_string(&d).unwrap(), "\"api.example.com\"");
        assert!(serde_json::from_str::<DomainName>("\"not valid!\"").is_err());
    }

    proptest! {
        #[test]
        fn prop_normalize_is_idempotent(s in "[a-zA-Z0-9.-]{0,40}") {
            let once = normalize(&s);
            prop_assert_eq!(normalize(&once), once.clone());
        }

        #[test]
        fn prop_case_and_trailing_dot_insensitive(
            labels in proptest::collection::vec("[a-z0-9]{1,10}", 1..4),
            dots in 0usize..3,
        ) {
            let base = labels.join(".");
            let variant = format!("{}{}", base.to_ascii_uppercase(), ".".repeat(dots));
            prop_assert_eq!(
                DomainName::parse(&variant).unwrap(),
                DomainName::parse(&base).unwrap()
            );
        }
    }
}
