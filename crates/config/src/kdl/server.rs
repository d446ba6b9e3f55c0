//! Server and backend KDL parsing.

use anyhow::Result;
use std::collections::BTreeMap;
use tracing::trace;

use tlsgate_common::DomainName;

use crate::server::*;

use super::helpers::{get_first_arg_string, get_string_entry, get_u64_entry};

/// Parse server configuration block
pub fn parse_server_config(node: &kdl::KdlNode) -> Result<ServerConfig> {
    trace!("Parsing server configuration block");

    let config = ServerConfig {
        listen: get_string_entry(node, "listen").unwrap_or_else(default_listen),
        graceful_shutdown_timeout_secs: get_u64_entry(node, "graceful-shutdown-timeout-secs")?
            .unwrap_or_else(default_graceful_shutdown_timeout),
        backend_connect_timeout_secs: get_u64_entry(node, "backend-connect-timeout-secs")?
            .unwrap_or_else(default_backend_connect_timeout),
    };

    trace!(
        listen = %config.listen,
        graceful_shutdown_timeout_secs = config.graceful_shutdown_timeout_secs,
        "Parsed server configuration"
    );

    Ok(config)
}

/// Parse backends configuration block
pub fn parse_backends(node: &kdl::KdlNode) -> Result<BackendsConfig> {
    trace!("Parsing backends configuration block");
    let mut default = None;
    let mut hosts = BTreeMap::new();

    if let Some(children) = node.children() {
        for child in children.nodes() {
            match child.name().value() {
                "default" => {
                    default = Some(get_first_arg_string(child).ok_or_else(|| {
                        anyhow::anyhow!(
                            "'default' requires an address argument, e.g., default \"127.0.0.1:8080\""
                        )
                    })?);
                }
                "backend" => {
                    let host = get_first_arg_string(child).ok_or_else(|| {
                        anyhow::anyhow!(
                            "Backend requires a hostname argument, e.g., backend \"api.example.com\" {{ ... }}"
                        )
                    })?;
                    let domain = DomainName::parse(&host)?;

                    let address = get_string_entry(child, "address").ok_or_else(|| {
                        anyhow::anyhow!(
                            "Backend '{}' requires an 'address' field, e.g., address \"127.0.0.1:9000\"",
                            host
                        )
                    })?;

                    trace!(host = %domain, address = %address, "Parsed backend");

                    if hosts.insert(domain, address).is_some() {
                        return Err(anyhow::anyhow!("Duplicate backend for host '{}'", host));
                    }
                }
                other => {
                    return Err(anyhow::anyhow!(
                        "Unknown entry '{}' in backends block. Valid entries: default, backend",
                        other
                    ));
                }
            }
        }
    }

    trace!(backend_count = hosts.len(), "Finished parsing backends");
    Ok(BackendsConfig { default, hosts })
}
