use crate::domain::ports::{DebtReadModelRef, SchedulerRef, TriggerStoreRef};
use crate::domain::trigger::TriggerStatus;
use crate::error::Result;
use std::collections::BTreeSet;
use tracing::{debug, info};
use uuid::Uuid;

/// Whether an installment still needs reminding.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Liveness {
    pub settled: bool,
}

/// The single place that answers "is this installment paid" and acts on it.
///
/// Shared by the fire path and the payment-event path so both apply the same
/// settlement rule.
#[derive(Clone)]
pub struct SuppressionGate {
    triggers: TriggerStoreRef,
    debts: DebtReadModelRef,
    scheduler: SchedulerRef,
}

impl SuppressionGate {
    pub fn new(triggers: TriggerStoreRef, debts: DebtReadModelRef, scheduler: SchedulerRef) -> Self {
        Self {
            triggers,
            debts,
            scheduler,
        }
    }

    /// Settled when the installment's paid amount reached its scheduled amount
    /// or the whole debt is settled. A debt or installment the read model no
    /// longer knows about counts as settled: there is nobody left to remind.
    pub async fn check_liveness(&self, debt_id: Uuid, installment_number: u32) -> Result<Liveness> {
        let settled = match self.debts.payment_status(debt_id, installment_number).await? {
            Some(status) => status.is_settled(),
            None => {
                debug!(%debt_id, installment_number, "installment unknown to read model");
                true
            }
        };
        Ok(Liveness { settled })
    }

    /// Cancels every still-scheduled trigger of the group and releases its job.
    /// Returns how many triggers this call cancelled.
    pub async fn cancel_group(&self, debt_id: Uuid, installment_number: u32) -> Result<usize> {
        let mut cancelled = 0;
        for trigger in self.triggers.group(debt_id, installment_number).await? {
            if trigger.status != TriggerStatus::Scheduled {
                continue;
            }
            // Losing the race to a concurrent fire or cancel is fine.
            if !self
                .triggers
                .compare_and_set_status(&trigger.key, TriggerStatus::Scheduled, TriggerStatus::Cancelled)
                .await?
            {
                continue;
            }
            if let Some(handle) = trigger.job_handle {
                self.scheduler.cancel(handle).await;
                self.triggers.attach_job(&trigger.key, None).await?;
            }
            debug!(trigger = %trigger.key, "trigger cancelled");
            cancelled += 1;
        }
        if cancelled > 0 {
            info!(%debt_id, installment_number, cancelled, "reminder group cancelled");
        }
        Ok(cancelled)
    }

    /// Checks the group and cancels it when settled.
    pub async fn suppress_if_settled(&self, debt_id: Uuid, installment_number: u32) -> Result<usize> {
        if self.check_liveness(debt_id, installment_number).await?.settled {
            self.cancel_group(debt_id, installment_number).await
        } else {
            Ok(0)
        }
    }

    /// Runs [`Self::suppress_if_settled`] over every installment of the debt
    /// that still has scheduled triggers.
    pub async fn sweep(&self, debt_id: Uuid) -> Result<usize> {
        let open: BTreeSet<u32> = self
            .triggers
            .for_debt(debt_id)
            .await?
            .into_iter()
            .filter(|t| t.status == TriggerStatus::Scheduled)
            .map(|t| t.key.installment_number)
            .collect();
        let mut cancelled = 0;
        for installment_number in open {
            cancelled += self.suppress_if_settled(debt_id, installment_number).await?;
        }
        Ok(cancelled)
    }
}
