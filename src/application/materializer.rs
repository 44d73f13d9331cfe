use crate::domain::debt::DebtTerms;
use crate::domain::ports::{ClockRef, SchedulerRef, TriggerStoreRef};
use crate::domain::schedule::calculate_schedule;
use crate::domain::trigger::{
    ReminderDefaults, ReminderSettings, ReminderTrigger, TriggerKey, TriggerStatus, plan_triggers,
};
use crate::error::{NotifyError, Result};
use std::collections::BTreeMap;
use tracing::{debug, info};

/// What one materialization pass changed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MaterializeSummary {
    pub created: usize,
    pub rearmed: usize,
    pub cancelled: usize,
    pub unchanged: usize,
}

/// Turns a debt's schedule into stored, armed triggers.
///
/// Keyed on (debt, installment, offset): running it again for the same debt
/// reconciles instead of appending. Terminal triggers are left as they are and
/// never recreated.
#[derive(Clone)]
pub struct TriggerMaterializer {
    triggers: TriggerStoreRef,
    scheduler: SchedulerRef,
    clock: ClockRef,
    defaults: ReminderDefaults,
}

fn same_plan(current: &ReminderTrigger, planned: &ReminderTrigger) -> bool {
    current.fire_at == planned.fire_at
        && current.installment_due_at == planned.installment_due_at
        && current.scheduled_amount == planned.scheduled_amount
        && current.channel_set == planned.channel_set
}

impl TriggerMaterializer {
    pub fn new(
        triggers: TriggerStoreRef,
        scheduler: SchedulerRef,
        clock: ClockRef,
        defaults: ReminderDefaults,
    ) -> Self {
        Self {
            triggers,
            scheduler,
            clock,
            defaults,
        }
    }

    pub fn defaults(&self) -> &ReminderDefaults {
        &self.defaults
    }

    pub fn settings_for(&self, terms: &DebtTerms) -> ReminderSettings {
        ReminderSettings::resolve(&self.defaults, &terms.reminders)
    }

    pub async fn materialize(&self, terms: &DebtTerms) -> Result<MaterializeSummary> {
        let schedule = calculate_schedule(&terms.schedule_request())?;
        let settings = self.settings_for(terms);
        let mut planned: BTreeMap<TriggerKey, ReminderTrigger> =
            plan_triggers(terms.debt_id, &schedule, &settings, self.clock.now())
                .into_iter()
                .map(|t| (t.key, t))
                .collect();

        let mut summary = MaterializeSummary::default();
        for current in self.triggers.for_debt(terms.debt_id).await? {
            let wanted = planned.remove(&current.key);
            if current.status != TriggerStatus::Scheduled {
                summary.unchanged += 1;
                continue;
            }
            match wanted {
                Some(next) if same_plan(&current, &next) => summary.unchanged += 1,
                Some(next) => {
                    if self.rearm(&current, &next).await? {
                        summary.rearmed += 1;
                    } else {
                        summary.unchanged += 1;
                    }
                }
                None => {
                    if self.retire(&current).await? {
                        summary.cancelled += 1;
                    }
                }
            }
        }

        for trigger in planned.into_values() {
            let key = trigger.key;
            let fire_at = trigger.fire_at;
            match self.triggers.insert(trigger).await {
                Ok(()) => {}
                Err(NotifyError::DuplicateTrigger(key)) => {
                    debug!(trigger = %key, "trigger already materialized");
                    summary.unchanged += 1;
                    continue;
                }
                Err(e) => return Err(e),
            }
            let handle = self.scheduler.schedule(key, fire_at).await?;
            self.triggers.attach_job(&key, Some(handle)).await?;
            debug!(trigger = %key, %fire_at, "trigger scheduled");
            summary.created += 1;
        }

        info!(
            debt_id = %terms.debt_id,
            installments = schedule.len(),
            created = summary.created,
            rearmed = summary.rearmed,
            cancelled = summary.cancelled,
            unchanged = summary.unchanged,
            "reminders materialized"
        );
        Ok(summary)
    }

    /// Moves a scheduled trigger to its new fire time and swaps its job.
    async fn rearm(&self, current: &ReminderTrigger, next: &ReminderTrigger) -> Result<bool> {
        if !self.triggers.reschedule(next).await? {
            return Ok(false);
        }
        if let Some(handle) = current.job_handle {
            self.scheduler.cancel(handle).await;
        }
        let handle = self.scheduler.schedule(next.key, next.fire_at).await?;
        self.triggers.attach_job(&next.key, Some(handle)).await?;
        debug!(trigger = %next.key, from = %current.fire_at, to = %next.fire_at, "trigger re-armed");
        Ok(true)
    }

    /// Cancels a trigger the new schedule no longer has (or can no longer fire).
    async fn retire(&self, current: &ReminderTrigger) -> Result<bool> {
        if !self
            .triggers
            .compare_and_set_status(&current.key, TriggerStatus::Scheduled, TriggerStatus::Cancelled)
            .await?
        {
            return Ok(false);
        }
        if let Some(handle) = current.job_handle {
            self.scheduler.cancel(handle).await;
            self.triggers.attach_job(&current.key, None).await?;
        }
        debug!(trigger = %current.key, "trigger retired by reschedule");
        Ok(true)
    }

    /// Arms a job for every trigger still scheduled in the store.
    pub async fn restore(&self) -> Result<usize> {
        let mut restored = 0;
        for trigger in self.triggers.scheduled().await? {
            let handle = self.scheduler.schedule(trigger.key, trigger.fire_at).await?;
            self.triggers.attach_job(&trigger.key, Some(handle)).await?;
            restored += 1;
        }
        if restored > 0 {
            info!(restored, "scheduled triggers re-armed");
        }
        Ok(restored)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::money::Amount;
    use crate::domain::ports::TriggerStore;
    use crate::domain::schedule::{CountMode, InstallmentPlan};
    use crate::domain::trigger::{DayOffsets, ReminderOffset};
    use crate::infrastructure::clock::ManualClock;
    use crate::infrastructure::in_memory::InMemoryTriggerStore;
    use crate::infrastructure::timer::TokioScheduler;
    use chrono::{NaiveDate, TimeZone, Utc};
    use rust_decimal_macros::dec;
    use std::sync::Arc;
    use uuid::Uuid;

    struct Fixture {
        materializer: TriggerMaterializer,
        store: InMemoryTriggerStore,
        scheduler: Arc<TokioScheduler>,
        clock: ManualClock,
    }

    fn fixture() -> Fixture {
        let clock = ManualClock::new(Utc.with_ymd_and_hms(2025, 1, 1, 0, 0, 0).unwrap());
        let (scheduler, _fires) = TokioScheduler::new(Arc::new(clock.clone()));
        let scheduler = Arc::new(scheduler);
        let store = InMemoryTriggerStore::new();
        Fixture {
            materializer: TriggerMaterializer::new(
                Arc::new(store.clone()),
                scheduler.clone(),
                Arc::new(clock.clone()),
                ReminderDefaults::default(),
            ),
            store,
            scheduler,
            clock,
        }
    }

    fn terms(count: u32) -> DebtTerms {
        DebtTerms {
            debt_id: Uuid::new_v4(),
            principal: Amount::new(dec!(12000)).unwrap(),
            currency: "PHP".to_string(),
            plan: InstallmentPlan::Monthly,
            anchor_date: NaiveDate::from_ymd_opt(2025, 1, 15).unwrap(),
            count_mode: CountMode::FixedCount(count),
            payer_name: "Ben".to_string(),
            counterparty_name: "Ana".to_string(),
            reminders: Default::default(),
        }
    }

    #[tokio::test]
    async fn test_materialize_is_idempotent() {
        let f = fixture();
        let terms = terms(12);

        let first = f.materializer.materialize(&terms).await.unwrap();
        assert_eq!(first.created, 36);
        assert_eq!(f.scheduler.pending(), 36);

        let second = f.materializer.materialize(&terms).await.unwrap();
        assert_eq!(
            second,
            MaterializeSummary {
                unchanged: 36,
                ..Default::default()
            }
        );
        assert_eq!(f.store.for_debt(terms.debt_id).await.unwrap().len(), 36);
        assert_eq!(f.scheduler.pending(), 36);
    }

    #[tokio::test]
    async fn test_terminal_triggers_are_not_recreated() {
        let f = fixture();
        let terms = terms(2);
        f.materializer.materialize(&terms).await.unwrap();

        let key = TriggerKey::new(terms.debt_id, 1, ReminderOffset::BeforeDue(7));
        f.store
            .compare_and_set_status(&key, TriggerStatus::Scheduled, TriggerStatus::FiredSent)
            .await
            .unwrap();

        let again = f.materializer.materialize(&terms).await.unwrap();
        assert_eq!(again.created, 0);
        assert_eq!(
            f.store.get(&key).await.unwrap().unwrap().status,
            TriggerStatus::FiredSent
        );
    }

    #[tokio::test]
    async fn test_reschedule_reconciles() {
        let f = fixture();
        let mut terms = terms(3);
        f.materializer.materialize(&terms).await.unwrap();

        // two installments, one week later
        terms.count_mode = CountMode::FixedCount(2);
        terms.principal = Amount::new(dec!(8000)).unwrap();
        terms.anchor_date = NaiveDate::from_ymd_opt(2025, 1, 22).unwrap();
        let summary = f.materializer.materialize(&terms).await.unwrap();
        assert_eq!(summary.rearmed, 6);
        assert_eq!(summary.cancelled, 3);
        assert_eq!(summary.created, 0);

        for trigger in f.store.group(terms.debt_id, 3).await.unwrap() {
            assert_eq!(trigger.status, TriggerStatus::Cancelled);
        }
        let moved = f
            .store
            .get(&TriggerKey::new(terms.debt_id, 1, ReminderOffset::BeforeDue(7)))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(moved.fire_at, Utc.with_ymd_and_hms(2025, 1, 15, 9, 0, 0).unwrap());
        assert_eq!(moved.scheduled_amount, dec!(4000));
        assert_eq!(f.scheduler.pending(), 6);
    }

    #[tokio::test]
    async fn test_reschedule_cancels_triggers_now_in_the_past() {
        let f = fixture();
        let mut terms = terms(1);
        f.materializer.materialize(&terms).await.unwrap();

        f.clock.set(Utc.with_ymd_and_hms(2025, 1, 10, 0, 0, 0).unwrap());
        terms.reminders.offsets = Some(DayOffsets::from([7, 3, 1]));
        let summary = f.materializer.materialize(&terms).await.unwrap();
        assert_eq!(summary.cancelled, 1);
        assert_eq!(summary.unchanged, 2);

        let stale = f
            .store
            .get(&TriggerKey::new(terms.debt_id, 1, ReminderOffset::BeforeDue(7)))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(stale.status, TriggerStatus::Cancelled);
    }

    #[tokio::test]
    async fn test_invalid_schedule_is_rejected() {
        let f = fixture();
        let mut terms = terms(1);
        terms.count_mode = CountMode::FinalDueDate(terms.anchor_date);
        assert!(matches!(
            f.materializer.materialize(&terms).await,
            Err(NotifyError::InvalidSchedule(_))
        ));
        assert!(f.store.for_debt(terms.debt_id).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_restore_rearms_scheduled() {
        let f = fixture();
        let terms = terms(2);
        f.materializer.materialize(&terms).await.unwrap();

        let (fresh, _fires) = TokioScheduler::new(Arc::new(f.clock.clone()));
        let fresh = Arc::new(fresh);
        let restarted = TriggerMaterializer::new(
            Arc::new(f.store.clone()),
            fresh.clone(),
            Arc::new(f.clock.clone()),
            ReminderDefaults::default(),
        );
        assert_eq!(restarted.restore().await.unwrap(), 6);
        assert_eq!(fresh.pending(), 6);
    }
}
