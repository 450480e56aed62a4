//! Hash helpers.
//!
//! - `content_hash_*`: SHA-256 hex, identidad de artifacts y exports (formato
//!   externo estable).
//! - `fingerprint_*`: BLAKE3 hex, fingerprints internos de etapas y runs.

use blake3::Hasher;
use serde_json::Value;
use sha2::{Digest, Sha256};

use super::to_canonical_json;

/// SHA-256 hex de bytes arbitrarios (archivos exportados).
pub fn content_hash_bytes(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    format!("{:x}", hasher.finalize())
}

/// SHA-256 hex de un string.
pub fn content_hash_str(input: &str) -> String {
    content_hash_bytes(input.as_bytes())
}

/// Hash de contenido de un valor JSON: SHA-256 sobre su forma canónica.
pub fn hash_value(value: &Value) -> String {
    content_hash_str(&to_canonical_json(value))
}

/// Hashea un string con BLAKE3 y devuelve hex.
pub fn fingerprint_str(input: &str) -> String {
    let mut h = Hasher::new();
    h.update(input.as_bytes());
    h.finalize().to_hex().to_string()
}

/// Fingerprint BLAKE3 de un valor JSON canonicalizado.
pub fn fingerprint_value(value: &Value) -> String {
    fingerprint_str(&to_canonical_json(value))
}
