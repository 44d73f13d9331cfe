use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RecipientRole {
    /// The party paying the debt.
    Payer,
    /// The party the debt is owed to.
    Counterparty,
}

impl RecipientRole {
    pub fn opposite(&self) -> Self {
        match self {
            RecipientRole::Payer => RecipientRole::Counterparty,
            RecipientRole::Counterparty => RecipientRole::Payer,
        }
    }
}

impl fmt::Display for RecipientRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RecipientRole::Payer => f.write_str("payer"),
            RecipientRole::Counterparty => f.write_str("counterparty"),
        }
    }
}

/// Lifecycle phase of a payment as far as notifications are concerned.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PaymentPhase {
    Made,
    Verified,
    Rejected,
}

impl PaymentPhase {
    /// Whether a payment currently in `from` may move to `self`.
    ///
    /// `made` is only entered once. A rejected payment may still be verified
    /// later (a second review accepting it); a verified one is final.
    pub fn can_follow(&self, from: Option<PaymentPhase>) -> bool {
        matches!(
            (from, self),
            (None, PaymentPhase::Made)
                | (Some(PaymentPhase::Made), PaymentPhase::Verified)
                | (Some(PaymentPhase::Made), PaymentPhase::Rejected)
                | (Some(PaymentPhase::Rejected), PaymentPhase::Verified)
        )
    }

    /// Roles that hear about a payment entering this phase.
    pub fn recipients(&self) -> &'static [RecipientRole] {
        match self {
            PaymentPhase::Made => &[RecipientRole::Payer, RecipientRole::Counterparty],
            PaymentPhase::Verified | PaymentPhase::Rejected => &[RecipientRole::Payer],
        }
    }
}

impl fmt::Display for PaymentPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PaymentPhase::Made => f.write_str("made"),
            PaymentPhase::Verified => f.write_str("verified"),
            PaymentPhase::Rejected => f.write_str("rejected"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NotificationStatus {
    Pending,
    Sent,
    Failed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct NotificationId(pub u64);

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventNotification {
    pub id: NotificationId,
    pub debt_id: Uuid,
    pub payment_id: Uuid,
    pub recipient_role: RecipientRole,
    pub occasion: PaymentPhase,
    pub message: String,
    pub status: NotificationStatus,
    pub created_at: DateTime<Utc>,
    pub sent_at: Option<DateTime<Utc>>,
}

/// A notification about to be stored; the store assigns its id.
#[derive(Debug, Clone, PartialEq)]
pub struct NewNotification {
    pub debt_id: Uuid,
    pub payment_id: Uuid,
    pub recipient_role: RecipientRole,
    pub occasion: PaymentPhase,
    pub message: String,
    pub created_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_phase_transitions() {
        assert!(PaymentPhase::Made.can_follow(None));
        assert!(PaymentPhase::Verified.can_follow(Some(PaymentPhase::Made)));
        assert!(PaymentPhase::Rejected.can_follow(Some(PaymentPhase::Made)));
        assert!(PaymentPhase::Verified.can_follow(Some(PaymentPhase::Rejected)));

        assert!(!PaymentPhase::Made.can_follow(Some(PaymentPhase::Made)));
        assert!(!PaymentPhase::Made.can_follow(Some(PaymentPhase::Rejected)));
        assert!(!PaymentPhase::Verified.can_follow(None));
        assert!(!PaymentPhase::Verified.can_follow(Some(PaymentPhase::Verified)));
        assert!(!PaymentPhase::Rejected.can_follow(Some(PaymentPhase::Verified)));
        assert!(!PaymentPhase::Rejected.can_follow(Some(PaymentPhase::Rejected)));
    }

    #[test]
    fn test_recipient_fan_out() {
        assert_eq!(
            PaymentPhase::Made.recipients(),
            &[RecipientRole::Payer, RecipientRole::Counterparty]
        );
        assert_eq!(PaymentPhase::Verified.recipients(), &[RecipientRole::Payer]);
        assert_eq!(PaymentPhase::Rejected.recipients(), &[RecipientRole::Payer]);
        assert_eq!(RecipientRole::Payer.opposite(), RecipientRole::Counterparty);
    }
}
