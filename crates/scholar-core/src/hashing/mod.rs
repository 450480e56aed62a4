//! Módulo de hashing y canonicalización JSON.

pub mod canonical_json;
pub mod hash;

pub use canonical_json::to_canonical_json;
pub use hash::{content_hash_bytes, content_hash_str, fingerprint_str, fingerprint_value, hash_value};
