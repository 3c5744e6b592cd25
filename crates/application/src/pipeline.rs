mod masking;
mod processor;
mod serializer;
mod tokens;

pub use masking::{REDACTION_MARKER, apply_sync_strategy, hash_digest, mask_partial};
pub use processor::{
    DropPolicy, EventProcessor, MetricsSnapshot, ProcessorConfig, ProcessorMetrics,
};
pub use serializer::{compress, decode_payload, decompress};
pub use tokens::{search_terms, search_tokens};

#[cfg(test)]
mod tests;
