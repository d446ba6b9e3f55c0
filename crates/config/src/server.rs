//! Server and backend configuration types
//!
//! This module contains configuration types for the TLS listener itself and
//! the backends decrypted traffic is forwarded to.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::net::SocketAddr;
use validator::Validate;

use tlsgate_common::{DomainName, TlsgateError, TlsgateResult};

// ============================================================================
// Server Configuration
// ============================================================================

/// Listener configuration
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct ServerConfig {
    /// Address the TLS listener binds to
    #[serde(default = "default_listen")]
    #[validate(length(min = 1))]
    pub listen: String,

    /// How long to wait for active connections to drain on shutdown
    #[serde(default = "default_graceful_shutdown_timeout")]
    pub graceful_shutdown_timeout_secs: u64,

    /// Timeout for establishing a TCP connection to a backend
    #[serde(default = "default_backend_connect_timeout")]
    #[validate(range(min = 1))]
    pub backend_connect_timeout_secs: u64,
}

impl ServerConfig {
    /// Parse the listen address
    pub fn listen_addr(&self) -> TlsgateResult<SocketAddr> {
        self.listen.parse().map_err(|e| TlsgateError::Config {
            message: format!("Invalid listen address '{}'", self.listen),
            source: Some(Box::new(e)),
        })
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen: default_listen(),
            graceful_shutdown_timeout_secs: default_graceful_shutdown_timeout(),
            backend_connect_timeout_secs: default_backend_connect_timeout(),
        }
    }
}

// ============================================================================
// Backend Configuration
// ============================================================================

/// Where decrypted traffic goes, keyed by the TLS server name
#[derive(Debug, Clone, Default, Serialize, Deserialize, Validate)]
pub struct BackendsConfig {
    /// Backend used when no host-specific entry matches
    #[serde(default)]
    pub default: Option<String>,

    /// Host-specific backends
    #[serde(default)]
    pub hosts: BTreeMap<DomainName, String>,
}

impl BackendsConfig {
    /// Backend address for a server name, falling back to the default
    pub fn backend_for(&self, domain: &DomainName) -> Option<&str> {
        self.hosts
            .get(domain)
            .or(self.default.as_ref())
            .map(String::as_str)
    }

    /// Check every configured backend address has a host and a port
    pub fn validate_addresses(&self) -> TlsgateResult<()> {
        if self.default.is_none() && self.hosts.is_empty() {
            return Err(TlsgateError::config(
                "At least one backend is required (backends { default \"127.0.0.1:8080\" })",
            ));
        }

        let entries = self
            .default
            .iter()
            .map(|addr| ("default".to_string(), addr))
            .chain(self.hosts.iter().map(|(d, addr)| (d.to_string(), addr)));

        for (name, addr) in entries {
            let valid = addr
                .rsplit_once(':')
                .map(|(host, port)| !host.is_empty() && port.parse::<u16>().is_ok())
                .unwrap_or(false);
            if !valid {
                return Err(TlsgateError::config(format!(
                    "Backend '{}' has invalid address '{}', expected host:port",
                    name, addr
                )));
            }
        }

        Ok(())
    }
}

// Default value functions
pub(crate) fn default_listen() -> String {
    "0.0.0.0:443".to_string()
}

pub(crate) fn default_graceful_shutdown_timeout() -> u64 {
    10
}

pub(crate) fn default_backend_connect_timeout() -> u64 {
    5
}
