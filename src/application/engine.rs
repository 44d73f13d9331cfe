use crate::application::dispatcher::{ChannelDispatcher, DispatchReport};
use crate::application::gate::{Liveness, SuppressionGate};
use crate::application::materializer::{MaterializeSummary, TriggerMaterializer};
use crate::application::notifier::EventNotifier;
use crate::domain::channel::{ChannelEndpoint, RenderedMessage};
use crate::domain::debt::{DebtTerms, InstallmentStatus, PaymentRecord};
use crate::domain::notification::{EventNotification, PaymentPhase, RecipientRole};
use crate::domain::ports::{
    ClockRef, DebtReadModelRef, NotificationStoreRef, RecipientDirectoryRef, SchedulerRef,
    TemplateRendererRef, TriggerStoreRef,
};
use crate::domain::schedule::calculate_schedule;
use crate::domain::template::{TemplateVars, substitute};
use crate::domain::trigger::{ReminderDefaults, ReminderTrigger, TriggerKey, TriggerStatus};
use crate::error::{NotifyError, Result};
use crate::infrastructure::timer::{FireEvent, FireReceiver};
use chrono::{DateTime, Utc};
use std::sync::Arc;
use tokio::sync::Semaphore;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// Collaborators the engine is wired to.
pub struct EnginePorts {
    pub triggers: TriggerStoreRef,
    pub notifications: NotificationStoreRef,
    pub debts: DebtReadModelRef,
    pub directory: RecipientDirectoryRef,
    pub templates: TemplateRendererRef,
    pub scheduler: SchedulerRef,
    pub clock: ClockRef,
}

/// How a single fire was resolved.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FireOutcome {
    /// At least one channel delivered the reminder.
    Sent,
    /// Every attempt failed, or there was nothing enabled to send to.
    Failed,
    /// The installment was settled; the trigger and its siblings were cancelled.
    Suppressed,
    /// The trigger was no longer scheduled; nothing happened.
    Stale,
}

/// The reminder and notification engine.
///
/// Cheap to clone: every field is shared. Debt and payment events come in
/// through the `on_*` methods; timer fires arrive through [`Self::run`].
#[derive(Clone)]
pub struct ReminderEngine {
    triggers: TriggerStoreRef,
    debts: DebtReadModelRef,
    directory: RecipientDirectoryRef,
    templates: TemplateRendererRef,
    clock: ClockRef,
    gate: SuppressionGate,
    materializer: TriggerMaterializer,
    notifier: EventNotifier,
    dispatcher: Arc<ChannelDispatcher>,
    fire_slots: Arc<Semaphore>,
}

impl ReminderEngine {
    /// Creates a new `ReminderEngine`.
    ///
    /// # Arguments
    ///
    /// * `ports` - Stores, read model and delivery collaborators.
    /// * `dispatcher` - Channel senders and the delivery worker pool.
    /// * `defaults` - Account-level reminder settings.
    /// * `max_concurrent_fires` - Upper bound on fires handled at once.
    pub fn new(
        ports: EnginePorts,
        dispatcher: ChannelDispatcher,
        defaults: ReminderDefaults,
        max_concurrent_fires: usize,
    ) -> Self {
        let dispatcher = Arc::new(dispatcher);
        let gate = SuppressionGate::new(
            ports.triggers.clone(),
            ports.debts.clone(),
            ports.scheduler.clone(),
        );
        let materializer = TriggerMaterializer::new(
            ports.triggers.clone(),
            ports.scheduler.clone(),
            ports.clock.clone(),
            defaults,
        );
        let notifier = EventNotifier::new(
            ports.notifications,
            ports.directory.clone(),
            ports.templates.clone(),
            dispatcher.clone(),
            ports.clock.clone(),
        );
        Self {
            triggers: ports.triggers,
            debts: ports.debts,
            directory: ports.directory,
            templates: ports.templates,
            clock: ports.clock,
            gate,
            materializer,
            notifier,
            dispatcher,
            fire_slots: Arc::new(Semaphore::new(max_concurrent_fires.max(1))),
        }
    }

    async fn terms(&self, debt_id: Uuid) -> Result<DebtTerms> {
        self.debts
            .debt_terms(debt_id)
            .await?
            .ok_or_else(|| NotifyError::NotFound(format!("debt {debt_id}")))
    }

    async fn payment(&self, debt_id: Uuid, payment_id: Uuid) -> Result<PaymentRecord> {
        self.debts
            .payment(debt_id, payment_id)
            .await?
            .ok_or_else(|| NotifyError::NotFound(format!("payment {payment_id}")))
    }

    /// Derives the schedule and reconciles the debt's triggers against it.
    pub async fn on_debt_created_or_rescheduled(&self, debt_id: Uuid) -> Result<MaterializeSummary> {
        let terms = self.terms(debt_id).await?;
        let summary = self.materializer.materialize(&terms).await?;
        // Installments paid before (re)scheduling need no reminders.
        self.gate.sweep(debt_id).await?;
        Ok(summary)
    }

    /// Handles a fired trigger: claim, check, then deliver or suppress.
    pub async fn on_fire(&self, key: TriggerKey) -> Result<FireOutcome> {
        self.claim_and_fire(key, None).await
    }

    /// `armed_for` is the fire time the job was scheduled with. A claimed
    /// trigger whose stored fire time differs was re-armed after that job was
    /// created; it goes back to `Scheduled` for its new job to handle.
    async fn claim_and_fire(
        &self,
        key: TriggerKey,
        armed_for: Option<DateTime<Utc>>,
    ) -> Result<FireOutcome> {
        if self.triggers.get(&key).await?.is_none() {
            warn!(trigger = %key, "fire for unknown trigger");
            return Ok(FireOutcome::Stale);
        }
        if !self
            .triggers
            .compare_and_set_status(&key, TriggerStatus::Scheduled, TriggerStatus::Firing)
            .await?
        {
            debug!(error = %NotifyError::StaleTrigger(key), "fire absorbed");
            return Ok(FireOutcome::Stale);
        }
        // Re-read under the claim: a reschedule cannot move it any more.
        let Some(trigger) = self.triggers.get(&key).await? else {
            return Ok(FireOutcome::Stale);
        };
        if let Some(armed_for) = armed_for
            && armed_for != trigger.fire_at
        {
            self.triggers
                .compare_and_set_status(&key, TriggerStatus::Firing, TriggerStatus::Scheduled)
                .await?;
            debug!(trigger = %key, %armed_for, fire_at = %trigger.fire_at, "superseded job ignored");
            return Ok(FireOutcome::Stale);
        }
        self.triggers.attach_job(&key, None).await?;

        match self.resolve_fire(&trigger).await {
            Ok(outcome) => Ok(outcome),
            Err(e) => {
                error!(trigger = %key, error = %e, "reminder could not be prepared");
                self.finish(&key, TriggerStatus::FiredFailed).await?;
                Err(e)
            }
        }
    }

    async fn resolve_fire(&self, trigger: &ReminderTrigger) -> Result<FireOutcome> {
        let key = trigger.key;
        let terms = self.debts.debt_terms(key.debt_id).await?;
        let liveness = self.check_liveness(key.debt_id, key.installment_number).await?;
        let terms = match terms {
            Some(terms) if !liveness.settled => terms,
            _ => {
                self.finish(&key, TriggerStatus::Cancelled).await?;
                self.gate.cancel_group(key.debt_id, key.installment_number).await?;
                info!(trigger = %key, "reminder suppressed, installment settled");
                return Ok(FireOutcome::Suppressed);
            }
        };

        let report = self.deliver_reminder(&terms, trigger).await?;
        if report.delivered() {
            self.finish(&key, TriggerStatus::FiredSent).await?;
            info!(trigger = %key, "reminder sent");
            Ok(FireOutcome::Sent)
        } else {
            self.finish(&key, TriggerStatus::FiredFailed).await?;
            warn!(
                trigger = %key,
                error = report.failure_detail().as_deref().unwrap_or("no enabled channel"),
                "reminder not delivered"
            );
            Ok(FireOutcome::Failed)
        }
    }

    async fn finish(&self, key: &TriggerKey, status: TriggerStatus) -> Result<()> {
        if !self
            .triggers
            .compare_and_set_status(key, TriggerStatus::Firing, status)
            .await?
        {
            warn!(trigger = %key, %status, "trigger left the firing state unexpectedly");
        }
        Ok(())
    }

    async fn deliver_reminder(
        &self,
        terms: &DebtTerms,
        trigger: &ReminderTrigger,
    ) -> Result<DispatchReport> {
        let key = trigger.key;
        let settings = self.materializer.settings_for(terms);
        let total = calculate_schedule(&terms.schedule_request())?.len();
        let days_key = if key.offset.is_overdue() {
            "days_overdue"
        } else {
            "days_until"
        };
        let vars = TemplateVars::new()
            .with("payer_name", &terms.payer_name)
            .with("counterparty_name", &terms.counterparty_name)
            .with("amount", trigger.scheduled_amount.normalize())
            .with("currency", &terms.currency)
            .with("due_date", trigger.installment_due_at)
            .with("installment_number", key.installment_number)
            .with("installment_total", total)
            .with(days_key, key.offset.days());

        let template = if key.offset.is_overdue() {
            "overdue"
        } else {
            "reminder"
        };
        let body = match &settings.custom_message {
            Some(custom) => substitute(custom, &vars)?,
            None => self.templates.render(&format!("{template}.body"), &vars)?,
        };
        let message = RenderedMessage {
            subject: Some(self.templates.render(&format!("{template}.subject"), &vars)?),
            body,
        };

        let mut endpoints: Vec<ChannelEndpoint> = Vec::new();
        for channel in trigger.channel_set.iter() {
            match self
                .directory
                .resolve_endpoint(key.debt_id, RecipientRole::Payer, channel)
                .await?
            {
                Some(endpoint) => endpoints.push(endpoint),
                None => debug!(trigger = %key, %channel, "no endpoint for channel"),
            }
        }
        Ok(self.dispatcher.dispatch(endpoints, &message).await)
    }

    /// Consumes fire events until the scheduler goes away.
    ///
    /// Each fire is handled on its own task, at most `max_concurrent_fires` at
    /// a time. Jobs armed for a fire time the trigger no longer has (it was
    /// re-armed since) are dropped.
    pub async fn run(&self, mut fires: FireReceiver) {
        while let Some(event) = fires.recv().await {
            let Ok(permit) = self.fire_slots.clone().acquire_owned().await else {
                break;
            };
            let engine = self.clone();
            tokio::spawn(async move {
                let _permit = permit;
                if let Err(e) = engine.on_fire_event(event).await {
                    error!(trigger = %event.key, error = %e, "fire failed");
                }
            });
        }
        debug!("fire loop stopped");
    }

    async fn on_fire_event(&self, event: FireEvent) -> Result<FireOutcome> {
        self.claim_and_fire(event.key, Some(event.fire_at)).await
    }

    /// Completed payments are applied across the schedule, so a payment
    /// tagged to one installment may settle others too: every installment
    /// with scheduled triggers is checked.
    async fn suppress_for_payment(&self, payment: &PaymentRecord) -> Result<usize> {
        self.gate.sweep(payment.debt_id).await
    }

    /// "made": both parties are told, then settled installments stop reminding.
    pub async fn on_payment_recorded(
        &self,
        debt_id: Uuid,
        payment_id: Uuid,
    ) -> Result<Vec<EventNotification>> {
        let terms = self.terms(debt_id).await?;
        let payment = self.payment(debt_id, payment_id).await?;
        let channels = self.materializer.settings_for(&terms).channels;
        let sent = self
            .notifier
            .transition(&terms, &payment, PaymentPhase::Made, None, &channels)
            .await;
        // Settlement does not depend on the notifications going out.
        self.suppress_for_payment(&payment).await?;
        sent
    }

    /// "verified": the payer is told, then settled installments stop reminding.
    pub async fn on_payment_verified(
        &self,
        debt_id: Uuid,
        payment_id: Uuid,
    ) -> Result<Vec<EventNotification>> {
        let terms = self.terms(debt_id).await?;
        let payment = self.payment(debt_id, payment_id).await?;
        let channels = self.materializer.settings_for(&terms).channels;
        let sent = self
            .notifier
            .transition(&terms, &payment, PaymentPhase::Verified, None, &channels)
            .await;
        // Settlement does not depend on the notifications going out.
        self.suppress_for_payment(&payment).await?;
        sent
    }

    /// "rejected": the payer hears why. Reminders are untouched; the
    /// installment is simply still open.
    pub async fn on_payment_rejected(
        &self,
        debt_id: Uuid,
        payment_id: Uuid,
        reason: &str,
    ) -> Result<Vec<EventNotification>> {
        if reason.trim().is_empty() {
            return Err(NotifyError::ValidationError(
                "a rejection needs a reason".to_string(),
            ));
        }
        let terms = self.terms(debt_id).await?;
        let payment = self.payment(debt_id, payment_id).await?;
        let channels = self.materializer.settings_for(&terms).channels;
        self.notifier
            .transition(
                &terms,
                &payment,
                PaymentPhase::Rejected,
                Some(reason.trim()),
                &channels,
            )
            .await
    }

    /// Early payoff paths that bypass per-installment accounting.
    pub async fn on_installment_settled_externally(
        &self,
        debt_id: Uuid,
        installment_number: u32,
    ) -> Result<usize> {
        self.gate.cancel_group(debt_id, installment_number).await
    }

    pub async fn check_liveness(&self, debt_id: Uuid, installment_number: u32) -> Result<Liveness> {
        self.gate.check_liveness(debt_id, installment_number).await
    }

    pub async fn cancel_group(&self, debt_id: Uuid, installment_number: u32) -> Result<usize> {
        self.gate.cancel_group(debt_id, installment_number).await
    }

    /// Re-arms jobs for every trigger still scheduled, e.g. after a restart.
    pub async fn restore(&self) -> Result<usize> {
        self.materializer.restore().await
    }

    pub async fn triggers_for(&self, debt_id: Uuid) -> Result<Vec<ReminderTrigger>> {
        self.triggers.for_debt(debt_id).await
    }

    /// Each installment with how it stands today.
    pub async fn installment_statuses(&self, debt_id: Uuid) -> Result<Vec<InstallmentStatus>> {
        let terms = self.terms(debt_id).await?;
        let today = self.clock.now().date_naive();
        let mut statuses = Vec::new();
        for entry in calculate_schedule(&terms.schedule_request())? {
            let status = self
                .debts
                .payment_status(debt_id, entry.sequence_number)
                .await?
                .ok_or_else(|| {
                    NotifyError::NotFound(format!(
                        "payment status of installment {} of debt {debt_id}",
                        entry.sequence_number
                    ))
                })?;
            statuses.push(InstallmentStatus {
                sequence_number: entry.sequence_number,
                due_at: entry.due_at,
                scheduled_amount: entry.scheduled_amount,
                paid_amount: status.paid_amount.0,
                state: InstallmentStatus::classify(&status, entry.due_at, today),
            });
        }
        Ok(statuses)
    }
}
