use trailguard_domain::{AuditEntityConfig, AuditEvent};

use super::masking::{hash_digest, value_as_text};

/// Builds the precomputed search token set for an event.
///
/// Tokens are lowercase and delimiter-split; configured metadata facets
/// backed by sensitive fields are tokenized only as hashed digests, never
/// as plaintext.
#[must_use]
pub fn search_tokens(
    event: &AuditEvent,
    config: Option<&AuditEntityConfig>,
    searchable_facets: &[String],
) -> Vec<String> {
    let mut collected = Vec::new();

    collected.extend(tokenize(event.entity_type().as_str()));
    collected.push(event.operation().as_str().to_owned());

    if let Some(user_id) = event.user_id() {
        collected.push(format!("user:{}", user_id.to_lowercase()));
    }
    collected.push(format!("ip:{}", event.ip_address().as_str().to_lowercase()));

    for tag in event.tags() {
        collected.extend(tokenize(tag));
    }

    for facet in searchable_facets {
        let Some(value) = event.metadata().get(facet.as_str()) else {
            continue;
        };

        let is_sensitive = config
            .and_then(|config| config.field(facet.as_str()))
            .map(|field| field.is_sensitive())
            .unwrap_or(false);

        if is_sensitive {
            collected.push(hash_digest(value_as_text(value).as_str()));
        } else {
            collected.extend(tokenize(value_as_text(value).as_str()));
        }
    }

    collected.sort();
    collected.dedup();
    collected
}

/// Normalizes free search text into the terms matched against token sets.
#[must_use]
pub fn search_terms(text: &str) -> Vec<String> {
    text.split_whitespace()
        .map(str::to_lowercase)
        .filter(|term| !term.is_empty())
        .collect()
}

fn tokenize(text: &str) -> Vec<String> {
    text.to_lowercase()
        .split(|character: char| !character.is_alphanumeric())
        .filter(|token| !token.is_empty())
        .map(str::to_owned)
        .collect()
}
