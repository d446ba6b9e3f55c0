//! Configuration module for tlsgate
//!
//! This module provides configuration parsing and validation for the
//! TLS-terminating proxy.
//!
//! # Module Organization
//!
//! - [`server`]: Listener and backend configuration
//! - [`acme`]: On-demand certificate issuance settings
//! - `kdl`: KDL format parsing
//!
//! # Example
//!
//! ```kdl
//! server {
//!     listen "0.0.0.0:443"
//! }
//!
//! acme {
//!     email "admin@example.com"
//!     staging #true
//!     account-credentials "/var/lib/tlsgate/account.json"
//!     issue-timeout-secs 60
//!     allowed-domains "example.com" "www.example.com"
//! }
//!
//! backends {
//!     default "127.0.0.1:8080"
//!     backend "api.example.com" {
//!         address "127.0.0.1:9000"
//!     }
//! }
//! ```

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;
use validator::Validate;

use tlsgate_common::{TlsgateError, TlsgateResult};

// ============================================================================
// Module Declarations
// ============================================================================

pub mod acme;
mod kdl;
pub mod server;

// ============================================================================
// Re-exports
// ============================================================================

pub use acme::{AcmeConfig, KeyType, LETSENCRYPT_PRODUCTION, LETSENCRYPT_STAGING};
pub use server::{BackendsConfig, ServerConfig};

/// Top-level configuration
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct Config {
    /// Listener settings
    #[serde(default)]
    #[validate(nested)]
    pub server: ServerConfig,

    /// On-demand issuance settings
    #[validate(nested)]
    pub acme: AcmeConfig,

    /// Backend routing table
    #[serde(default)]
    #[validate(nested)]
    pub backends: BackendsConfig,
}

// ============================================================================
// Config Implementation
// ============================================================================

impl Config {
    /// Load configuration from a file
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {:?}", path))?;

        let extension = path
            .extension()
            .and_then(|ext| ext.to_str())
            .unwrap_or("kdl");

        match extension {
            "kdl" => Self::from_kdl(&content),
            "json" => Self::from_json(&content),
            _ => Err(anyhow::anyhow!("Unsupported config format: {}", extension)),
        }
    }

    /// Parse configuration from KDL format
    pub fn from_kdl(content: &str) -> Result<Self> {
        let doc: ::kdl::KdlDocument = content
            .parse()
            .map_err(|e: ::kdl::KdlError| anyhow::anyhow!("{}", render_kdl_error(content, &e)))?;

        kdl::parse_kdl_document(doc)
    }

    /// Parse configuration from JSON format
    pub fn from_json(content: &str) -> Result<Self> {
        serde_json::from_str(content).context("Failed to parse JSON configuration")
    }

    /// Validate the configuration
    pub fn validate(&self) -> TlsgateResult<()> {
        Validate::validate(self).map_err(|e| TlsgateError::Config {
            message: format!("Configuration validation failed: {}", e),
            source: None,
        })?;

        self.server.listen_addr()?;
        self.backends.validate_addresses()?;

        if self.acme.issue_timeout_secs > 600 {
            tracing::warn!(
                issue_timeout_secs = self.acme.issue_timeout_secs,
                "Issuance timeout exceeds 10 minutes; handshakes may stall that long"
            );
        }

        if self.acme.allowed_domains.is_empty() {
            tracing::warn!(
                "No allowed-domains configured; certificates will be requested for any server name"
            );
        }

        Ok(())
    }
}

/// Render a KDL parse error with a source excerpt for each labelled span
fn render_kdl_error(content: &str, e: &::kdl::KdlError) -> String {
    use miette::Diagnostic;

    let mut error_msg = String::from("KDL configuration parse error:\n\n");
    let lines: Vec<&str> = content.lines().collect();
    let mut found_details = false;

    if let Some(related) = e.related() {
        for diagnostic in related {
            error_msg.push_str(&format!("  {}\n", diagnostic));
            found_details = true;

            for label in diagnostic.labels().into_iter().flatten() {
                let (line, col) = kdl::offset_to_line_col(content, label.offset());
                error_msg.push_str(&format!("\n  --> at line {}, column {}\n", line, col));

                if let Some(line_content) = lines.get(line.saturating_sub(1)) {
                    error_msg.push_str(&format!("{:>4} | {}\n", line, line_content));
                    error_msg.push_str(&format!("     | {}^", " ".repeat(col.saturating_sub(1))));
                    if let Some(label_msg) = label.label() {
                        error_msg.push_str(&format!(" {}", label_msg));
                    }
                    error_msg.push('\n');
                }
            }

            if let Some(help) = diagnostic.help() {
                error_msg.push_str(&format!("\n  Help: {}\n", help));
            }
        }
    }

    if !found_details {
        error_msg.push_str(&format!("  {}\n", e));
    }

    error_msg
}
