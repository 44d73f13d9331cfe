//! Read-side view of the debt/payment domain owned by collaborators.

use crate::domain::money::{Amount, Paid};
use crate::domain::schedule::{CountMode, InstallmentPlan, ScheduleRequest};
use crate::domain::trigger::ReminderOverrides;
use chrono::NaiveDate;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Debt parameters the engine derives schedules and messages from.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DebtTerms {
    pub debt_id: Uuid,
    pub principal: Amount,
    pub currency: String,
    pub plan: InstallmentPlan,
    pub anchor_date: NaiveDate,
    pub count_mode: CountMode,
    pub payer_name: String,
    pub counterparty_name: String,
    #[serde(default)]
    pub reminders: ReminderOverrides,
}

impl DebtTerms {
    pub fn schedule_request(&self) -> ScheduleRequest {
        ScheduleRequest {
            principal: self.principal.value(),
            plan: self.plan,
            anchor_date: self.anchor_date,
            count_mode: self.count_mode,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PaymentState {
    /// Recorded, waiting for the counterparty to verify it.
    Pending,
    /// Verified; counts towards the balance.
    Completed,
    Rejected,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PaymentRecord {
    pub payment_id: Uuid,
    pub debt_id: Uuid,
    pub amount: Amount,
    /// Installment the payment was made against, when the payer said so.
    pub installment_number: Option<u32>,
    pub state: PaymentState,
}

/// Answer of the read model to "how much of this installment is paid".
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PaymentStatus {
    pub paid_amount: Paid,
    pub scheduled_amount: Decimal,
    pub debt_settled: bool,
}

impl PaymentStatus {
    pub fn is_settled(&self) -> bool {
        self.debt_settled || self.paid_amount.covers(self.scheduled_amount)
    }
}

/// How an installment stands at a given date.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InstallmentState {
    Paid,
    Partial,
    Pending,
    Overdue,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InstallmentStatus {
    pub sequence_number: u32,
    pub due_at: NaiveDate,
    pub scheduled_amount: Decimal,
    pub paid_amount: Decimal,
    pub state: InstallmentState,
}

impl InstallmentStatus {
    pub fn classify(status: &PaymentStatus, due_at: NaiveDate, today: NaiveDate) -> InstallmentState {
        if status.is_settled() {
            InstallmentState::Paid
        } else if due_at < today {
            InstallmentState::Overdue
        } else if status.paid_amount.0 > Decimal::ZERO {
            InstallmentState::Partial
        } else {
            InstallmentState::Pending
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn status(paid: Decimal, settled: bool) -> PaymentStatus {
        PaymentStatus {
            paid_amount: Paid(paid),
            scheduled_amount: dec!(1000),
            debt_settled: settled,
        }
    }

    #[test]
    fn test_settlement_rules() {
        assert!(!status(dec!(999.99), false).is_settled());
        assert!(status(dec!(1000), false).is_settled());
        assert!(status(dec!(1200), false).is_settled());
        assert!(status(dec!(0), true).is_settled());
    }

    #[test]
    fn test_classify() {
        let due = NaiveDate::from_ymd_opt(2025, 2, 15).unwrap();
        let before = NaiveDate::from_ymd_opt(2025, 2, 1).unwrap();
        let after = NaiveDate::from_ymd_opt(2025, 3, 1).unwrap();
        assert_eq!(
            InstallmentStatus::classify(&status(dec!(1000), false), due, after),
            InstallmentState::Paid
        );
        assert_eq!(
            InstallmentStatus::classify(&status(dec!(10), false), due, after),
            InstallmentState::Overdue
        );
        assert_eq!(
            InstallmentStatus::classify(&status(dec!(10), false), due, before),
            InstallmentState::Partial
        );
        assert_eq!(
            InstallmentStatus::classify(&status(dec!(0), false), due, before),
            InstallmentState::Pending
        );
    }
}
