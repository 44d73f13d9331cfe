//! Installment schedule derivation.
//!
//! Schedules are never stored: they are recomputed from the debt's parameters
//! every time the engine needs them, so the debt record stays the single
//! source of truth.

use crate::domain::money::Amount;
use crate::error::{NotifyError, Result};
use chrono::{Days, Months, NaiveDate};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Upper bound on the number of installments a single debt may produce.
pub const MAX_INSTALLMENTS: u32 = 1200;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InstallmentPlan {
    #[serde(alias = "onetime")]
    OneTime,
    Weekly,
    Biweekly,
    Monthly,
    Quarterly,
    Yearly,
}

impl InstallmentPlan {
    /// Due date of the installment `index` periods after `anchor`.
    ///
    /// Month based plans step from the anchor itself rather than from the
    /// previous due date, so a debt anchored on the 31st keeps coming back to
    /// the 31st whenever the month has one.
    pub fn nth_due_date(&self, anchor: NaiveDate, index: u32) -> Option<NaiveDate> {
        match self {
            InstallmentPlan::OneTime => (index == 0).then_some(anchor),
            InstallmentPlan::Weekly => anchor.checked_add_days(Days::new(7 * index as u64)),
            InstallmentPlan::Biweekly => anchor.checked_add_days(Days::new(14 * index as u64)),
            InstallmentPlan::Monthly => anchor.checked_add_months(Months::new(index)),
            InstallmentPlan::Quarterly => anchor.checked_add_months(Months::new(3 * index)),
            InstallmentPlan::Yearly => anchor.checked_add_months(Months::new(12 * index)),
        }
    }

    /// Number of due dates between `anchor` and `final_due` inclusive.
    fn periods_until(&self, anchor: NaiveDate, final_due: NaiveDate) -> Result<u32> {
        let mut count = 0;
        while let Some(due) = self.nth_due_date(anchor, count) {
            if due > final_due {
                break;
            }
            count += 1;
            if count > MAX_INSTALLMENTS {
                return Err(NotifyError::InvalidSchedule(format!(
                    "more than {MAX_INSTALLMENTS} installments before {final_due}"
                )));
            }
        }
        Ok(count.max(1))
    }
}

impl fmt::Display for InstallmentPlan {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            InstallmentPlan::OneTime => "one_time",
            InstallmentPlan::Weekly => "weekly",
            InstallmentPlan::Biweekly => "biweekly",
            InstallmentPlan::Monthly => "monthly",
            InstallmentPlan::Quarterly => "quarterly",
            InstallmentPlan::Yearly => "yearly",
        };
        f.write_str(name)
    }
}

impl FromStr for InstallmentPlan {
    type Err = NotifyError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "one_time" | "onetime" => Ok(InstallmentPlan::OneTime),
            "weekly" => Ok(InstallmentPlan::Weekly),
            "biweekly" => Ok(InstallmentPlan::Biweekly),
            "monthly" => Ok(InstallmentPlan::Monthly),
            "quarterly" => Ok(InstallmentPlan::Quarterly),
            "yearly" => Ok(InstallmentPlan::Yearly),
            other => Err(NotifyError::ValidationError(format!(
                "unknown installment plan '{other}'"
            ))),
        }
    }
}

/// How the number of installments is decided.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CountMode {
    FixedCount(u32),
    FinalDueDate(NaiveDate),
}

/// Parameters the schedule is derived from.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScheduleRequest {
    pub principal: Decimal,
    pub plan: InstallmentPlan,
    pub anchor_date: NaiveDate,
    pub count_mode: CountMode,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstallmentScheduleEntry {
    /// 1-based position of the installment.
    pub sequence_number: u32,
    pub due_at: NaiveDate,
    pub scheduled_amount: Decimal,
}

impl ScheduleRequest {
    fn installment_count(&self) -> Result<u32> {
        let count = match self.count_mode {
            CountMode::FixedCount(n) => n,
            CountMode::FinalDueDate(final_due) => {
                if final_due <= self.anchor_date {
                    return Err(NotifyError::InvalidSchedule(format!(
                        "final due date {final_due} is not after anchor {}",
                        self.anchor_date
                    )));
                }
                self.plan.periods_until(self.anchor_date, final_due)?
            }
        };
        if count < 1 {
            return Err(NotifyError::InvalidSchedule(
                "installment count must be at least 1".to_string(),
            ));
        }
        if count > MAX_INSTALLMENTS {
            return Err(NotifyError::InvalidSchedule(format!(
                "installment count {count} exceeds {MAX_INSTALLMENTS}"
            )));
        }
        Ok(count)
    }
}

/// Derives the ordered installment schedule for a debt.
///
/// The per-installment amount is cut to the minor unit and the last entry
/// absorbs the remainder, so the entries always sum to the principal.
pub fn calculate_schedule(request: &ScheduleRequest) -> Result<Vec<InstallmentScheduleEntry>> {
    let principal = Amount::new(request.principal).map_err(|_| {
        NotifyError::InvalidSchedule(format!(
            "principal must be positive, got {}",
            request.principal
        ))
    })?;
    let count = request.installment_count()?;

    if request.plan == InstallmentPlan::OneTime {
        return Ok(vec![InstallmentScheduleEntry {
            sequence_number: 1,
            due_at: request.anchor_date,
            scheduled_amount: principal.value(),
        }]);
    }

    principal
        .split(count)
        .into_iter()
        .enumerate()
        .map(|(index, scheduled_amount)| {
            let index = index as u32;
            let due_at = request
                .plan
                .nth_due_date(request.anchor_date, index)
                .ok_or_else(|| {
                    NotifyError::InvalidSchedule(format!(
                        "installment {} falls outside the supported calendar",
                        index + 1
                    ))
                })?;
            Ok(InstallmentScheduleEntry {
                sequence_number: index + 1,
                due_at,
                scheduled_amount,
            })
        })
        .collect()
}
