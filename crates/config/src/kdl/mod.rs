//! KDL configuration parsing.
//!
//! This module contains all functions for parsing KDL configuration files
//! into tlsgate configuration structures. It is organized into submodules:
//!
//! - `helpers`: Common parsing utility functions
//! - `server`: Listener and backend parsing
//! - `acme`: On-demand issuance settings

mod acme;
mod helpers;
mod server;

pub use helpers::offset_to_line_col;

pub use acme::parse_acme_config;
pub use server::{parse_backends, parse_server_config};

use anyhow::Result;

use crate::server::{BackendsConfig, ServerConfig};
use crate::Config;

// ============================================================================
// Top-Level Document Parser
// ============================================================================

/// Convert a parsed KDL document to Config
pub fn parse_kdl_document(doc: kdl::KdlDocument) -> Result<Config> {
    let mut server = None;
    let mut acme = None;
    let mut backends = None;

    for node in doc.nodes() {
        match node.name().value() {
            "server" => {
                server = Some(parse_server_config(node)?);
            }
            "acme" => {
                acme = Some(parse_acme_config(node)?);
            }
            "backends" => {
                backends = Some(parse_backends(node)?);
            }
            other => {
                return Err(anyhow::anyhow!(
                    "Unknown top-level configuration block: '{}'\n\
                     Valid blocks are: server, acme, backends",
                    other
                ));
            }
        }
    }

    let acme = acme.ok_or_else(|| {
        anyhow::anyhow!(
            "Missing required 'acme' configuration block\n\
             Example:\n\
             acme {{\n\
                 email \"admin@example.com\"\n\
                 account-credentials \"/var/lib/tlsgate/account.json\"\n\
             }}"
        )
    })?;

    Ok(Config {
        server: server.unwrap_or_else(ServerConfig::default),
        acme,
        backends: backends.unwrap_or_else(BackendsConfig::default),
    })
}
