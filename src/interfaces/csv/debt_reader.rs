use crate::domain::debt::DebtTerms;
use crate::domain::money::Amount;
use crate::domain::schedule::{CountMode, InstallmentPlan};
use crate::error::{NotifyError, Result};
use chrono::NaiveDate;
use rust_decimal::Decimal;
use serde::Deserialize;
use std::io::Read;
use uuid::Uuid;

/// One line of the debts file.
///
/// `payments` (installment count) wins over `final_due`; a one-time debt
/// needs neither.
#[derive(Debug, Clone, Deserialize)]
pub struct DebtRow {
    pub debt_id: Uuid,
    pub principal: Decimal,
    pub currency: String,
    pub plan: String,
    pub anchor: NaiveDate,
    pub payments: Option<u32>,
    pub final_due: Option<NaiveDate>,
    pub payer: String,
    pub counterparty: String,
}

impl TryFrom<DebtRow> for DebtTerms {
    type Error = NotifyError;

    fn try_from(row: DebtRow) -> Result<Self> {
        let plan: InstallmentPlan = row.plan.parse()?;
        let count_mode = match (row.payments, row.final_due, plan) {
            (Some(n), _, _) => CountMode::FixedCount(n),
            (None, Some(final_due), _) => CountMode::FinalDueDate(final_due),
            (None, None, InstallmentPlan::OneTime) => CountMode::FixedCount(1),
            (None, None, _) => {
                return Err(NotifyError::ValidationError(format!(
                    "debt {} needs either payments or final_due",
                    row.debt_id
                )));
            }
        };
        Ok(DebtTerms {
            debt_id: row.debt_id,
            principal: Amount::new(row.principal)?,
            currency: row.currency,
            plan,
            anchor_date: row.anchor,
            count_mode,
            payer_name: row.payer,
            counterparty_name: row.counterparty,
            reminders: Default::default(),
        })
    }
}

/// Reads debts from a CSV source.
///
/// Whitespace around fields is trimmed and trailing optional columns may be
/// left out.
pub struct DebtReader<R: Read> {
    reader: csv::Reader<R>,
}

impl<R: Read> DebtReader<R> {
    pub fn new(source: R) -> Self {
        let reader = csv::ReaderBuilder::new()
            .trim(csv::Trim::All)
            .flexible(true)
            .from_reader(source);
        Self { reader }
    }

    /// Lazily reads and converts debts, one `Result` per row.
    pub fn debts(self) -> impl Iterator<Item = Result<DebtTerms>> {
        self.reader
            .into_deserialize::<DebtRow>()
            .map(|row| row.map_err(NotifyError::from).and_then(DebtTerms::try_from))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    const HEADER: &str = "debt_id, principal, currency, plan, anchor, payments, final_due, payer, counterparty";

    #[test]
    fn test_reader_valid_stream() {
        let data = format!(
            "{HEADER}\n\
             7f0e6f9a-3a0e-4c57-9a53-0a4a1f9d8a11, 12000, PHP, Monthly, 2025-01-15, 12, , Ben, Ana\n\
             0b6f1c8e-52d4-4a4e-8f2f-6d3b8f6a2b22, 500, USD, one_time, 2025-03-01, , , Cy, Di\n\
             9a1d2c3b-4e5f-4a6b-8c7d-1e2f3a4b5c33, 900, EUR, weekly, 2025-01-06, , 2025-01-27, Ed, Fa"
        );
        let debts: Vec<Result<DebtTerms>> = DebtReader::new(data.as_bytes()).debts().collect();

        assert_eq!(debts.len(), 3);
        let monthly = debts[0].as_ref().unwrap();
        assert_eq!(monthly.plan, InstallmentPlan::Monthly);
        assert_eq!(monthly.count_mode, CountMode::FixedCount(12));
        assert_eq!(monthly.principal.value(), dec!(12000));

        let one_time = debts[1].as_ref().unwrap();
        assert_eq!(one_time.count_mode, CountMode::FixedCount(1));

        let weekly = debts[2].as_ref().unwrap();
        assert_eq!(
            weekly.count_mode,
            CountMode::FinalDueDate(NaiveDate::from_ymd_opt(2025, 1, 27).unwrap())
        );
    }

    #[test]
    fn test_reader_malformed_lines() {
        let data = format!(
            "{HEADER}\n\
             not-a-uuid, 100, PHP, monthly, 2025-01-15, 2, , Ben, Ana\n\
             7f0e6f9a-3a0e-4c57-9a53-0a4a1f9d8a11, -5, PHP, monthly, 2025-01-15, 2, , Ben, Ana\n\
             7f0e6f9a-3a0e-4c57-9a53-0a4a1f9d8a11, 100, PHP, daily, 2025-01-15, 2, , Ben, Ana\n\
             7f0e6f9a-3a0e-4c57-9a53-0a4a1f9d8a11, 100, PHP, monthly, 2025-01-15, , , Ben, Ana"
        );
        let debts: Vec<Result<DebtTerms>> = DebtReader::new(data.as_bytes()).debts().collect();

        assert_eq!(debts.len(), 4);
        assert!(matches!(debts[0], Err(NotifyError::CsvError(_))));
        assert!(matches!(debts[1], Err(NotifyError::ValidationError(_))));
        assert!(matches!(debts[2], Err(NotifyError::ValidationError(_))));
        assert!(matches!(debts[3], Err(NotifyError::ValidationError(_))));
    }
}
