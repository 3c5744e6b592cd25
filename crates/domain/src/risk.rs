use crate::config::{AuditLevel, AuditOperation};

/// Contextual anomaly signals feeding the risk score.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RiskSignals {
    /// The event occurred outside configured business hours.
    pub off_hours: bool,
    /// The caller IP falls outside the trusted networks.
    pub unusual_ip: bool,
    /// The observed operation failed.
    pub failed_outcome: bool,
}

/// Computes a deterministic 0-100 risk score for an event.
///
/// The score is a function of the operation, the owning entity's audit
/// level (a proxy for its sensitivity), and contextual anomaly signals.
/// The same inputs always yield the same score.
#[must_use]
pub fn score_event(
    operation: AuditOperation,
    entity_level: AuditLevel,
    signals: RiskSignals,
) -> u8 {
    let operation_weight: u32 = match operation {
        AuditOperation::Delete => 30,
        AuditOperation::Update => 20,
        AuditOperation::Create => 10,
        AuditOperation::Select => 5,
    };

    let sensitivity_weight: u32 = match entity_level {
        AuditLevel::Full => 30,
        AuditLevel::Detailed => 20,
        AuditLevel::Basic => 10,
        AuditLevel::None => 0,
    };

    let mut signal_weight: u32 = 0;
    if signals.off_hours {
        signal_weight += 15;
    }
    if signals.unusual_ip {
        signal_weight += 20;
    }
    if signals.failed_outcome {
        signal_weight += 15;
    }

    let total = operation_weight + sensitivity_weight + signal_weight;
    u8::try_from(total.min(100)).unwrap_or(100)
}
