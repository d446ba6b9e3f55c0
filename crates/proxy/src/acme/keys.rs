//! Key generation and conversion into rustls signing keys

use std::sync::Arc;

use rcgen::{KeyPair, PKCS_ECDSA_P256_SHA256, PKCS_ECDSA_P384_SHA384};
use rustls::crypto::CryptoProvider;
use rustls::pki_types::{CertificateDer, PrivateKeyDer, PrivatePkcs8KeyDer};
use rustls::sign::CertifiedKey;

use tlsgate_config::KeyType;

use super::error::CertError;

/// Fresh private key of the configured strength
pub fn generate(key_type: KeyType) -> Result<KeyPair, CertError> {
    let alg = match key_type {
        KeyType::EcdsaP256 => &PKCS_ECDSA_P256_SHA256,
        KeyType::EcdsaP384 => &PKCS_ECDSA_P384_SHA384,
    };
    KeyPair::generate_for(alg).map_err(|e| CertError::KeyGeneration(e.to_string()))
}

/// Process-wide rustls provider, falling back to aws-lc-rs when none is
/// installed
pub fn crypto_provider() -> Arc<CryptoProvider> {
    CryptoProvider::get_default()
        .cloned()
        .unwrap_or_else(|| Arc::new(rustls::crypto::aws_lc_rs::default_provider()))
}

/// Bundle a chain and its private key the way rustls serves them
pub fn certified_key(
    chain: Vec<CertificateDer<'static>>,
    key: &KeyPair,
) -> Result<CertifiedKey, CertError> {
    let provider = crypto_provider();

    let der = PrivateKeyDer::Pkcs8(PrivatePkcs8KeyDer::from(key.serialize_der()));
    let signing_key = provider
        .key_provider
        .load_private_key(der)
        .map_err(|e| CertError::SigningKey(e.to_string()))?;

    Ok(CertifiedKey::new(chain, signing_key))
}
