//! Reminder triggers and the settings they are materialized from.

use crate::domain::channel::{Channel, ChannelSet};
use crate::domain::schedule::InstallmentScheduleEntry;
use crate::error::NotifyError;
use chrono::{DateTime, Days, NaiveDate, NaiveTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// When a reminder fires relative to its installment's due date.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReminderOffset {
    BeforeDue(u32),
    AfterDue(u32),
}

impl ReminderOffset {
    pub fn fire_date(&self, due: NaiveDate) -> Option<NaiveDate> {
        match *self {
            ReminderOffset::BeforeDue(days) => due.checked_sub_days(Days::new(days as u64)),
            ReminderOffset::AfterDue(days) => due.checked_add_days(Days::new(days as u64)),
        }
    }

    pub fn is_overdue(&self) -> bool {
        matches!(self, ReminderOffset::AfterDue(_))
    }

    pub fn days(&self) -> u32 {
        match *self {
            ReminderOffset::BeforeDue(days) | ReminderOffset::AfterDue(days) => days,
        }
    }
}

impl fmt::Display for ReminderOffset {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ReminderOffset::BeforeDue(days) => write!(f, "-{days}d"),
            ReminderOffset::AfterDue(days) => write!(f, "+{days}d"),
        }
    }
}

/// Identity of a trigger: one per (debt, installment, offset).
///
/// The key doubles as the trigger id handed to the scheduler, so a fired job
/// can always be traced back to exactly one stored trigger.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct TriggerKey {
    pub debt_id: Uuid,
    pub installment_number: u32,
    pub offset: ReminderOffset,
}

impl TriggerKey {
    pub fn new(debt_id: Uuid, installment_number: u32, offset: ReminderOffset) -> Self {
        Self {
            debt_id,
            installment_number,
            offset,
        }
    }

    /// Fixed-width binary form, ordered by debt then installment so that a
    /// group can be read with a prefix scan.
    pub fn to_bytes(&self) -> [u8; 25] {
        let mut bytes = [0u8; 25];
        bytes[..16].copy_from_slice(self.debt_id.as_bytes());
        bytes[16..20].copy_from_slice(&self.installment_number.to_be_bytes());
        let (tag, days) = match self.offset {
            ReminderOffset::BeforeDue(days) => (0u8, days),
            ReminderOffset::AfterDue(days) => (1u8, days),
        };
        bytes[20] = tag;
        bytes[21..].copy_from_slice(&days.to_be_bytes());
        bytes
    }

    pub fn group_prefix(debt_id: Uuid, installment_number: u32) -> [u8; 20] {
        let mut bytes = [0u8; 20];
        bytes[..16].copy_from_slice(debt_id.as_bytes());
        bytes[16..].copy_from_slice(&installment_number.to_be_bytes());
        bytes
    }
}

impl fmt::Display for TriggerKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}#{}@{}",
            self.debt_id, self.installment_number, self.offset
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TriggerStatus {
    Scheduled,
    /// Claimed by a fire handler that is checking liveness or dispatching.
    Firing,
    FiredSent,
    FiredFailed,
    Cancelled,
}

impl TriggerStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            TriggerStatus::FiredSent | TriggerStatus::FiredFailed | TriggerStatus::Cancelled
        )
    }
}

impl fmt::Display for TriggerStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            TriggerStatus::Scheduled => "scheduled",
            TriggerStatus::Firing => "firing",
            TriggerStatus::FiredSent => "fired_sent",
            TriggerStatus::FiredFailed => "fired_failed",
            TriggerStatus::Cancelled => "cancelled",
        };
        f.write_str(name)
    }
}

/// Opaque handle of a deferred invocation held by the scheduler.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct JobHandle(pub u64);

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReminderTrigger {
    pub key: TriggerKey,
    pub installment_due_at: NaiveDate,
    pub scheduled_amount: Decimal,
    pub fire_at: DateTime<Utc>,
    pub channel_set: ChannelSet,
    pub status: TriggerStatus,
    pub job_handle: Option<JobHandle>,
}

/// Positive day counts, kept ordered and free of duplicates.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct DayOffsets(pub BTreeSet<u32>);

impl DayOffsets {
    pub fn iter(&self) -> impl Iterator<Item = u32> + '_ {
        self.0.iter().copied()
    }
}

impl<const N: usize> From<[u32; N]> for DayOffsets {
    fn from(days: [u32; N]) -> Self {
        Self(days.into_iter().collect())
    }
}

impl FromStr for DayOffsets {
    type Err = NotifyError;

    /// Parses `7,3,1`; an empty string is an empty set.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut days = BTreeSet::new();
        for part in s.split(',').map(str::trim).filter(|p| !p.is_empty()) {
            let value: u32 = part.parse().map_err(|_| {
                NotifyError::ValidationError(format!("'{part}' is not a day count"))
            })?;
            if value == 0 {
                return Err(NotifyError::ValidationError(
                    "reminder offsets must be positive".to_string(),
                ));
            }
            days.insert(value);
        }
        Ok(Self(days))
    }
}

/// Account-level reminder configuration.
#[derive(Debug, Clone, PartialEq)]
pub struct ReminderDefaults {
    pub offsets: DayOffsets,
    pub overdue_follow_ups: DayOffsets,
    pub send_time: NaiveTime,
    pub channels: ChannelSet,
}

impl Default for ReminderDefaults {
    fn default() -> Self {
        Self {
            offsets: DayOffsets::from([7, 3, 1]),
            overdue_follow_ups: DayOffsets::default(),
            send_time: NaiveTime::from_hms_opt(9, 0, 0).unwrap_or_default(),
            channels: [Channel::Email].into_iter().collect(),
        }
    }
}

/// Per-debt overrides. A field that is present wins over the account default.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ReminderOverrides {
    pub offsets: Option<DayOffsets>,
    pub overdue_follow_ups: Option<DayOffsets>,
    pub send_time: Option<NaiveTime>,
    pub channels: Option<ChannelSet>,
    /// Body template used instead of the default reminder text.
    pub message: Option<String>,
}

/// Effective settings for one debt after applying overrides to defaults.
#[derive(Debug, Clone, PartialEq)]
pub struct ReminderSettings {
    pub offsets: DayOffsets,
    pub overdue_follow_ups: DayOffsets,
    pub send_time: NaiveTime,
    pub channels: ChannelSet,
    pub custom_message: Option<String>,
}

impl ReminderSettings {
    pub fn resolve(defaults: &ReminderDefaults, overrides: &ReminderOverrides) -> Self {
        Self {
            offsets: overrides
                .offsets
                .clone()
                .unwrap_or_else(|| defaults.offsets.clone()),
            overdue_follow_ups: overrides
                .overdue_follow_ups
                .clone()
                .unwrap_or_else(|| defaults.overdue_follow_ups.clone()),
            send_time: overrides.send_time.unwrap_or(defaults.send_time),
            channels: overrides
                .channels
                .clone()
                .unwrap_or_else(|| defaults.channels.clone()),
            custom_message: overrides.message.clone(),
        }
    }

    /// All offsets in firing order for a single installment.
    pub fn reminder_offsets(&self) -> impl Iterator<Item = ReminderOffset> + '_ {
        self.offsets
            .0
            .iter()
            .rev()
            .map(|d| ReminderOffset::BeforeDue(*d))
            .chain(self.overdue_follow_ups.iter().map(ReminderOffset::AfterDue))
    }
}

/// Expands a schedule into the triggers that should exist at `now`.
///
/// Fire times strictly before `now` are dropped: a debt created close to its
/// due date skips the reminders it already missed instead of sending them all
/// at once.
pub fn plan_triggers(
    debt_id: Uuid,
    schedule: &[InstallmentScheduleEntry],
    settings: &ReminderSettings,
    now: DateTime<Utc>,
) -> Vec<ReminderTrigger> {
    schedule
        .iter()
        .flat_map(move |entry| {
            settings.reminder_offsets().filter_map(move |offset| {
                let fire_at = offset
                    .fire_date(entry.due_at)?
                    .and_time(settings.send_time)
                    .and_utc();
                (fire_at >= now).then(|| ReminderTrigger {
                    key: TriggerKey::new(debt_id, entry.sequence_number, offset),
                    installment_due_at: entry.due_at,
                    scheduled_amount: entry.scheduled_amount,
                    fire_at,
                    channel_set: settings.channels.clone(),
                    status: TriggerStatus::Scheduled,
                    job_handle: None,
                })
            })
        })
        .collect()
}
