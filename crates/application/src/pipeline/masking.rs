use serde_json::Value;
use sha2::{Digest, Sha256};

use trailguard_domain::MaskingStrategy;

/// Marker substituted for fully redacted values.
pub const REDACTION_MARKER: &str = "[REDACTED]";

/// Computes a short deterministic one-way digest of a value.
///
/// The digest is stable across runs so identical inputs always produce the
/// same masked output and the same search token.
#[must_use]
pub fn hash_digest(value: &str) -> String {
    let digest = Sha256::digest(value.as_bytes());
    digest
        .iter()
        .take(8)
        .map(|byte| format!("{byte:02x}"))
        .collect()
}

/// Produces a partially visible rendition of a value.
///
/// Email addresses keep the first character of the local part and the full
/// domain; other values keep the first and last character.
#[must_use]
pub fn mask_partial(value: &str) -> String {
    if let Some((local, domain)) = value.split_once('@') {
        let first = local.chars().next().unwrap_or('*');
        return format!("{first}***@{domain}");
    }

    let mut chars = value.chars();
    match (chars.next(), chars.next_back()) {
        (Some(first), Some(last)) if value.chars().count() > 2 => {
            format!("{first}***{last}")
        }
        _ => "***".to_owned(),
    }
}

/// Applies a synchronous masking strategy to a JSON value.
///
/// The `Encrypt` strategy is asynchronous (it defers to the key management
/// collaborator) and is handled by the processor; passing it here falls back
/// to full redaction so a value is never emitted unprotected.
#[must_use]
pub fn apply_sync_strategy(strategy: MaskingStrategy, value: &Value) -> Value {
    match strategy {
        MaskingStrategy::None => value.clone(),
        MaskingStrategy::Full | MaskingStrategy::Encrypt => {
            Value::String(REDACTION_MARKER.to_owned())
        }
        MaskingStrategy::Partial => Value::String(mask_partial(value_as_text(value).as_str())),
        MaskingStrategy::Hash => Value::String(hash_digest(value_as_text(value).as_str())),
    }
}

/// Canonical text rendition of a JSON value used for hashing and masking.
#[must_use]
pub fn value_as_text(value: &Value) -> String {
    match value {
        Value::String(text) => text.clone(),
        other => other.to_string(),
    }
}
