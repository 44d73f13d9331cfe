use crate::domain::trigger::ReminderTrigger;
use crate::error::Result;
use chrono::SecondsFormat;
use serde::Serialize;
use std::io::Write;

#[derive(Debug, Serialize)]
struct TriggerRow {
    debt_id: String,
    installment: u32,
    due_date: String,
    amount: String,
    offset: String,
    fire_at: String,
    channels: String,
    status: String,
}

impl From<&ReminderTrigger> for TriggerRow {
    fn from(trigger: &ReminderTrigger) -> Self {
        Self {
            debt_id: trigger.key.debt_id.to_string(),
            installment: trigger.key.installment_number,
            due_date: trigger.installment_due_at.to_string(),
            amount: trigger.scheduled_amount.normalize().to_string(),
            offset: trigger.key.offset.to_string(),
            fire_at: trigger.fire_at.to_rfc3339_opts(SecondsFormat::Secs, true),
            channels: trigger.channel_set.to_string(),
            status: trigger.status.to_string(),
        }
    }
}

/// Writes trigger plans as CSV, one row per trigger, with a header.
pub struct TriggerWriter<W: Write> {
    writer: csv::Writer<W>,
}

impl<W: Write> TriggerWriter<W> {
    pub fn new(sink: W) -> Self {
        Self {
            writer: csv::Writer::from_writer(sink),
        }
    }

    pub fn write_triggers<'a>(
        &mut self,
        triggers: impl IntoIterator<Item = &'a ReminderTrigger>,
    ) -> Result<()> {
        for trigger in triggers {
            self.writer.serialize(TriggerRow::from(trigger))?;
        }
        self.writer.flush()?;
        Ok(())
    }
}
