use std::io::{Read, Write};

use flate2::Compression;
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use serde_json::Value;

use trailguard_core::{AppError, AppResult};

use crate::audit_ports::{KeyManagementService, StoredAuditRecord};

/// Compresses a serialized payload with gzip.
pub fn compress(bytes: &[u8]) -> AppResult<Vec<u8>> {
    let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
    encoder
        .write_all(bytes)
        .and_then(|()| encoder.finish())
        .map_err(|error| AppError::Internal(format!("failed to compress payload: {error}")))
}

/// Decompresses a gzip payload.
pub fn decompress(bytes: &[u8]) -> AppResult<Vec<u8>> {
    let mut decoder = GzDecoder::new(bytes);
    let mut decoded = Vec::new();
    decoder
        .read_to_end(&mut decoded)
        .map_err(|error| AppError::Internal(format!("failed to decompress payload: {error}")))?;
    Ok(decoded)
}

/// Decodes a stored record's payload back into the redacted event document.
///
/// Decryption is applied first when the record was written encrypted, using
/// the key id recorded alongside it.
pub async fn decode_payload(
    record: &StoredAuditRecord,
    kms: &dyn KeyManagementService,
) -> AppResult<Value> {
    let compressed = if record.is_encrypted {
        let key_id = record.encryption_key_id.as_deref().ok_or_else(|| {
            AppError::Encryption(format!(
                "record '{}' is encrypted but carries no key id",
                record.id
            ))
        })?;
        kms.decrypt(record.payload.as_slice(), key_id).await?
    } else {
        record.payload.clone()
    };

    let raw = decompress(compressed.as_slice())?;
    serde_json::from_slice(raw.as_slice())
        .map_err(|error| AppError::Internal(format!("failed to decode payload: {error}")))
}
