use std::collections::HashMap;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use trailguard_core::AppError;

/// Categories of personally identifiable information recognized by the classifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PiiType {
    /// Email address.
    Email,
    /// Social security or national identity number.
    Ssn,
    /// Payment card number.
    CreditCard,
    /// Phone number.
    Phone,
    /// Postal address component.
    Address,
    /// Personal name component.
    Name,
    /// Password, secret, or other authentication material.
    Credential,
    /// Not personally identifiable.
    None,
}

impl PiiType {
    /// Returns a stable storage value for the PII type.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Email => "email",
            Self::Ssn => "ssn",
            Self::CreditCard => "credit_card",
            Self::Phone => "phone",
            Self::Address => "address",
            Self::Name => "name",
            Self::Credential => "credential",
            Self::None => "none",
        }
    }

    /// Returns whether values of this type must be protected before storage.
    #[must_use]
    pub fn is_sensitive(&self) -> bool {
        !matches!(self, Self::None)
    }
}

impl FromStr for PiiType {
    type Err = AppError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "email" => Ok(Self::Email),
            "ssn" => Ok(Self::Ssn),
            "credit_card" => Ok(Self::CreditCard),
            "phone" => Ok(Self::Phone),
            "address" => Ok(Self::Address),
            "name" => Ok(Self::Name),
            "credential" => Ok(Self::Credential),
            "none" => Ok(Self::None),
            _ => Err(AppError::Configuration(format!(
                "unknown pii type '{value}'"
            ))),
        }
    }
}

/// Transform applied to a sensitive value before it is stored or indexed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MaskingStrategy {
    /// Replace the whole value with a fixed redaction marker.
    Full,
    /// Keep a recognizable fragment of the value visible.
    Partial,
    /// Replace the value with a short deterministic one-way digest.
    Hash,
    /// Protect the value through the key management collaborator.
    Encrypt,
    /// Store the value unchanged.
    None,
}

impl MaskingStrategy {
    /// Returns a stable storage value for the masking strategy.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Full => "full",
            Self::Partial => "partial",
            Self::Hash => "hash",
            Self::Encrypt => "encrypt",
            Self::None => "none",
        }
    }
}

struct ClassificationRule {
    pii_type: PiiType,
    keywords: &'static [&'static str],
}

/// Ordered classification table. The first rule whose keyword list matches the
/// lowercased field name wins; explicit annotations bypass the table entirely.
const CLASSIFICATION_RULES: &[ClassificationRule] = &[
    ClassificationRule {
        pii_type: PiiType::Credential,
        keywords: &["password", "passwd", "secret", "token", "api_key", "credential"],
    },
    ClassificationRule {
        pii_type: PiiType::Ssn,
        keywords: &["ssn", "social_security", "national_id"],
    },
    ClassificationRule {
        pii_type: PiiType::CreditCard,
        keywords: &["credit_card", "card_number", "cc_number", "pan"],
    },
    ClassificationRule {
        pii_type: PiiType::Email,
        keywords: &["email", "e_mail"],
    },
    ClassificationRule {
        pii_type: PiiType::Phone,
        keywords: &["phone", "mobile", "fax"],
    },
    ClassificationRule {
        pii_type: PiiType::Address,
        keywords: &["address", "street", "city", "zip", "postal"],
    },
    ClassificationRule {
        pii_type: PiiType::Name,
        keywords: &[
            "first_name",
            "last_name",
            "full_name",
            "middle_name",
            "surname",
            "given_name",
        ],
    },
];

/// Classifies a field by name, honoring an explicit annotation when present.
///
/// A field matching no rule and lacking an annotation is treated as
/// non-sensitive; downstream systems override through annotations.
#[must_use]
pub fn classify_field(field_name: &str, annotation: Option<PiiType>) -> PiiType {
    if let Some(annotated) = annotation {
        return annotated;
    }

    let lowered = field_name.to_lowercase();
    for rule in CLASSIFICATION_RULES {
        if rule.keywords.iter().any(|keyword| lowered.contains(keyword)) {
            return rule.pii_type;
        }
    }

    PiiType::None
}

/// Returns the default masking strategy for a PII type.
#[must_use]
pub fn default_masking_strategy(pii_type: PiiType) -> MaskingStrategy {
    match pii_type {
        PiiType::Credential => MaskingStrategy::Hash,
        PiiType::Ssn | PiiType::CreditCard => MaskingStrategy::Encrypt,
        PiiType::Email => MaskingStrategy::Partial,
        PiiType::Phone | PiiType::Address | PiiType::Name => MaskingStrategy::Full,
        PiiType::None => MaskingStrategy::None,
    }
}

/// Returns the default retention period in days for a PII type.
#[must_use]
pub fn default_retention_days(pii_type: PiiType) -> u32 {
    match pii_type {
        PiiType::Credential => 90,
        PiiType::Ssn | PiiType::CreditCard => 365,
        PiiType::Email | PiiType::Phone | PiiType::Address | PiiType::Name => 1095,
        PiiType::None => 2555,
    }
}

/// Deployment-level overrides for the default retention periods.
#[derive(Debug, Clone, Default)]
pub struct RetentionPolicy {
    overrides: HashMap<PiiType, u32>,
}

impl RetentionPolicy {
    /// Creates a policy with no overrides.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Overrides the retention period for one PII type.
    pub fn with_override(mut self, pii_type: PiiType, days: u32) -> Self {
        self.overrides.insert(pii_type, days);
        self
    }

    /// Returns the effective retention period for a PII type.
    #[must_use]
    pub fn retention_days(&self, pii_type: PiiType) -> u32 {
        self.overrides
            .get(&pii_type)
            .copied()
            .unwrap_or_else(|| default_retention_days(pii_type))
    }
}

#[cfg(test)]
mod tests {
    use proptest::prelude::*;

    use super::{
        MaskingStrategy, PiiType, RetentionPolicy, classify_field, default_masking_strategy,
        default_retention_days,
    };

    #[test]
    fn password_field_classifies_as_credential() {
        let pii_type = classify_field("password", None);
        assert_eq!(pii_type, PiiType::Credential);
        assert_eq!(default_masking_strategy(pii_type), MaskingStrategy::Hash);
        assert_eq!(default_retention_days(pii_type), 90);
    }

    #[test]
    fn annotation_overrides_pattern_match() {
        let pii_type = classify_field("email", Some(PiiType::None));
        assert_eq!(pii_type, PiiType::None);
    }

    #[test]
    fn credential_rule_wins_over_later_rules() {
        // "email_token" contains both an email and a credential keyword.
        let pii_type = classify_field("email_token", None);
        assert_eq!(pii_type, PiiType::Credential);
    }

    #[test]
    fn unmatched_field_is_not_sensitive() {
        let pii_type = classify_field("quantity", None);
        assert_eq!(pii_type, PiiType::None);
        assert!(!pii_type.is_sensitive());
    }

    #[test]
    fn retention_policy_override_applies() {
        let policy = RetentionPolicy::new().with_override(PiiType::Credential, 30);
        assert_eq!(policy.retention_days(PiiType::Credential), 30);
        assert_eq!(policy.retention_days(PiiType::Email), 1095);
    }

    proptest! {
        #[test]
        fn classification_is_deterministic(field_name in "[a-z_]{1,24}") {
            let first = classify_field(field_name.as_str(), None);
            let second = classify_field(field_name.as_str(), None);
            prop_assert_eq!(first, second);
        }

        #[test]
        fn sensitive_types_never_map_to_none_strategy(field_name in "[a-z_]{1,24}") {
            let pii_type = classify_field(field_name.as_str(), None);
            if pii_type.is_sensitive() {
                prop_assert_ne!(default_masking_strategy(pii_type), MaskingStrategy::None);
                prop_assert!(default_retention_days(pii_type) > 0);
            }
        }
    }
}
