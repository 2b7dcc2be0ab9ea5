//! Metadata: content-addressed JSON describing host/kernel state.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use uuid::Uuid;

/// Arbitrary JSON captured at session start (baseline) or per-iteration.
/// Identified by the SHA-256 hash of its canonical JSON so identical
/// payloads collected on different hosts or iterations share one row.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Metadata {
    /// Hex-encoded SHA-256 of `payload`'s canonical JSON encoding.
    pub content_hash: String,
    pub session_id: Uuid,
    pub iteration_id: Option<Uuid>,
    pub payload: serde_json::Value,
    pub collected_at: DateTime<Utc>,
}

impl Metadata {
    pub fn new(session_id: Uuid, iteration_id: Option<Uuid>, payload: serde_json::Value) -> Self {
        Self {
            content_hash: hash_payload(&payload),
            session_id,
            iteration_id,
            payload,
            collected_at: Utc::now(),
        }
    }
}

/// Canonical content hash for a metadata payload, used both when creating a
/// [`Metadata`] row and when deduplicating against an existing one.
pub fn hash_payload(payload: &serde_json::Value) -> String {
    let canonical = serde_json::to_vec(payload).unwrap_or_default();
    let mut hasher = Sha256::new();
    hasher.update(&canonical);
    hex::encode(hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn identical_payloads_hash_identically() {
        let a = hash_payload(&serde_json::json!({"kernel": "6.6.0", "arch": "x86_64"}));
        let b = hash_payload(&serde_json::json!({"kernel": "6.6.0", "arch": "x86_64"}));
        assert_eq!(a, b);
    }

    #[test]
    fn different_payloads_hash_differently() {
        let a = hash_payload(&serde_json::json!({"kernel": "6.6.0"}));
        let b = hash_payload(&serde_json::json!({"kernel": "6.1.0"}));
        assert_ne!(a, b);
    }
}
