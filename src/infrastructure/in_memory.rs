use crate::domain::channel::{Channel, ChannelEndpoint};
use crate::domain::debt::{DebtTerms, PaymentRecord, PaymentState, PaymentStatus};
use crate::domain::money::{Amount, Paid};
use crate::domain::notification::{
    EventNotification, NewNotification, NotificationId, NotificationStatus, PaymentPhase,
    RecipientRole,
};
use crate::domain::ports::{DebtReadModel, NotificationStore, RecipientDirectory, TriggerStore};
use crate::domain::schedule::calculate_schedule;
use crate::domain::trigger::{JobHandle, ReminderTrigger, TriggerKey, TriggerStatus};
use crate::error::{NotifyError, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;
use tokio::sync::RwLock;
use uuid::Uuid;

/// A thread-safe in-memory trigger store.
///
/// Triggers live in a `BTreeMap` ordered by key, so a group (debt +
/// installment) is a contiguous range. Status transitions take the write lock,
/// which makes compare-and-set atomic.
#[derive(Default, Clone)]
pub struct InMemoryTriggerStore {
    triggers: Arc<RwLock<BTreeMap<TriggerKey, ReminderTrigger>>>,
}

impl InMemoryTriggerStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn all(&self) -> Vec<ReminderTrigger> {
        self.triggers.read().await.values().cloned().collect()
    }
}

#[async_trait]
impl TriggerStore for InMemoryTriggerStore {
    async fn insert(&self, trigger: ReminderTrigger) -> Result<()> {
        let mut triggers = self.triggers.write().await;
        if triggers.contains_key(&trigger.key) {
            return Err(NotifyError::DuplicateTrigger(trigger.key));
        }
        triggers.insert(trigger.key, trigger);
        Ok(())
    }

    async fn get(&self, key: &TriggerKey) -> Result<Option<ReminderTrigger>> {
        let triggers = self.triggers.read().await;
        Ok(triggers.get(key).cloned())
    }

    async fn group(&self, debt_id: Uuid, installment_number: u32) -> Result<Vec<ReminderTrigger>> {
        let triggers = self.triggers.read().await;
        Ok(triggers
            .values()
            .filter(|t| t.key.debt_id == debt_id && t.key.installment_number == installment_number)
            .cloned()
            .collect())
    }

    async fn for_debt(&self, debt_id: Uuid) -> Result<Vec<ReminderTrigger>> {
        let triggers = self.triggers.read().await;
        Ok(triggers
            .values()
            .filter(|t| t.key.debt_id == debt_id)
            .cloned()
            .collect())
    }

    async fn scheduled(&self) -> Result<Vec<ReminderTrigger>> {
        let triggers = self.triggers.read().await;
        Ok(triggers
            .values()
            .filter(|t| t.status == TriggerStatus::Scheduled)
            .cloned()
            .collect())
    }

    async fn compare_and_set_status(
        &self,
        key: &TriggerKey,
        expected: TriggerStatus,
        next: TriggerStatus,
    ) -> Result<bool> {
        let mut triggers = self.triggers.write().await;
        match triggers.get_mut(key) {
            Some(trigger) if trigger.status == expected => {
                trigger.status = next;
                Ok(true)
            }
            Some(_) => Ok(false),
            None => Err(NotifyError::NotFound(format!("trigger {key}"))),
        }
    }

    async fn attach_job(&self, key: &TriggerKey, handle: Option<JobHandle>) -> Result<()> {
        let mut triggers = self.triggers.write().await;
        let trigger = triggers
            .get_mut(key)
            .ok_or_else(|| NotifyError::NotFound(format!("trigger {key}")))?;
        trigger.job_handle = handle;
        Ok(())
    }

    async fn reschedule(&self, trigger: &ReminderTrigger) -> Result<bool> {
        let mut triggers = self.triggers.write().await;
        match triggers.get_mut(&trigger.key) {
            Some(current) if current.status == TriggerStatus::Scheduled => {
                current.installment_due_at = trigger.installment_due_at;
                current.scheduled_amount = trigger.scheduled_amount;
                current.fire_at = trigger.fire_at;
                current.channel_set = trigger.channel_set.clone();
                Ok(true)
            }
            Some(_) => Ok(false),
            None => Err(NotifyError::NotFound(format!("trigger {}", trigger.key))),
        }
    }
}

#[derive(Default)]
struct NotificationState {
    next_id: u64,
    notifications: BTreeMap<NotificationId, EventNotification>,
    phases: HashMap<Uuid, PaymentPhase>,
}

/// In-memory record of event notifications and payment phases.
#[derive(Default, Clone)]
pub struct InMemoryNotificationStore {
    state: Arc<RwLock<NotificationState>>,
}

impl InMemoryNotificationStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn all(&self) -> Vec<EventNotification> {
        self.state.read().await.notifications.values().cloned().collect()
    }
}

#[async_trait]
impl NotificationStore for InMemoryNotificationStore {
    async fn insert(&self, notification: NewNotification) -> Result<EventNotification> {
        let mut state = self.state.write().await;
        state.next_id += 1;
        let stored = EventNotification {
            id: NotificationId(state.next_id),
            debt_id: notification.debt_id,
            payment_id: notification.payment_id,
            recipient_role: notification.recipient_role,
            occasion: notification.occasion,
            message: notification.message,
            status: NotificationStatus::Pending,
            created_at: notification.created_at,
            sent_at: None,
        };
        state.notifications.insert(stored.id, stored.clone());
        Ok(stored)
    }

    async fn mark(
        &self,
        id: NotificationId,
        status: NotificationStatus,
        sent_at: Option<DateTime<Utc>>,
    ) -> Result<()> {
        let mut state = self.state.write().await;
        let notification = state
            .notifications
            .get_mut(&id)
            .ok_or_else(|| NotifyError::NotFound(format!("notification {}", id.0)))?;
        notification.status = status;
        notification.sent_at = sent_at;
        Ok(())
    }

    async fn for_payment(&self, payment_id: Uuid) -> Result<Vec<EventNotification>> {
        let state = self.state.read().await;
        Ok(state
            .notifications
            .values()
            .filter(|n| n.payment_id == payment_id)
            .cloned()
            .collect())
    }

    async fn phase(&self, payment_id: Uuid) -> Result<Option<PaymentPhase>> {
        let state = self.state.read().await;
        Ok(state.phases.get(&payment_id).copied())
    }

    async fn advance_phase(
        &self,
        payment_id: Uuid,
        from: Option<PaymentPhase>,
        to: PaymentPhase,
    ) -> Result<bool> {
        let mut state = self.state.write().await;
        if state.phases.get(&payment_id).copied() != from {
            return Ok(false);
        }
        state.phases.insert(payment_id, to);
        Ok(true)
    }
}

#[derive(Default)]
struct DebtBookState {
    debts: HashMap<Uuid, DebtTerms>,
    payments: HashMap<Uuid, PaymentRecord>,
    settled: HashSet<Uuid>,
}

/// A small debt ledger implementing the read model.
///
/// Completed payments are applied to installments in schedule order, the way
/// the surrounding application reports installment progress; pending and
/// rejected payments do not count.
#[derive(Default, Clone)]
pub struct InMemoryDebtBook {
    state: Arc<RwLock<DebtBookState>>,
}

impl InMemoryDebtBook {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn upsert_debt(&self, terms: DebtTerms) {
        let mut state = self.state.write().await;
        state.debts.insert(terms.debt_id, terms);
    }

    pub async fn remove_debt(&self, debt_id: Uuid) {
        let mut state = self.state.write().await;
        state.debts.remove(&debt_id);
        state.payments.retain(|_, p| p.debt_id != debt_id);
    }

    pub async fn record_payment(
        &self,
        debt_id: Uuid,
        amount: Amount,
        installment_number: Option<u32>,
        state: PaymentState,
    ) -> PaymentRecord {
        let record = PaymentRecord {
            payment_id: Uuid::new_v4(),
            debt_id,
            amount,
            installment_number,
            state,
        };
        let mut book = self.state.write().await;
        book.payments.insert(record.payment_id, record.clone());
        record
    }

    pub async fn set_payment_state(&self, payment_id: Uuid, state: PaymentState) -> Result<()> {
        let mut book = self.state.write().await;
        let payment = book
            .payments
            .get_mut(&payment_id)
            .ok_or_else(|| NotifyError::NotFound(format!("payment {payment_id}")))?;
        payment.state = state;
        Ok(())
    }

    pub async fn mark_settled(&self, debt_id: Uuid) {
        let mut state = self.state.write().await;
        state.settled.insert(debt_id);
    }
}

#[async_trait]
impl DebtReadModel for InMemoryDebtBook {
    async fn debt_terms(&self, debt_id: Uuid) -> Result<Option<DebtTerms>> {
        let state = self.state.read().await;
        Ok(state.debts.get(&debt_id).cloned())
    }

    async fn payment_status(
        &self,
        debt_id: Uuid,
        installment_number: u32,
    ) -> Result<Option<PaymentStatus>> {
        let state = self.state.read().await;
        let Some(terms) = state.debts.get(&debt_id) else {
            return Ok(None);
        };
        let schedule = calculate_schedule(&terms.schedule_request())?;
        let Some(entry) = schedule
            .iter()
            .find(|e| e.sequence_number == installment_number)
        else {
            return Ok(None);
        };

        let total_paid: Decimal = state
            .payments
            .values()
            .filter(|p| p.debt_id == debt_id && p.state == PaymentState::Completed)
            .map(|p| p.amount.value())
            .sum();
        let owed_before: Decimal = schedule
            .iter()
            .take_while(|e| e.sequence_number < installment_number)
            .map(|e| e.scheduled_amount)
            .sum();
        let applied = (total_paid - owed_before)
            .max(Decimal::ZERO)
            .min(entry.scheduled_amount);

        Ok(Some(PaymentStatus {
            paid_amount: Paid(applied),
            scheduled_amount: entry.scheduled_amount,
            debt_settled: state.settled.contains(&debt_id)
                || total_paid >= terms.principal.value(),
        }))
    }

    async fn payment(&self, debt_id: Uuid, payment_id: Uuid) -> Result<Option<PaymentRecord>> {
        let state = self.state.read().await;
        Ok(state
            .payments
            .get(&payment_id)
            .filter(|p| p.debt_id == debt_id)
            .cloned())
    }
}

/// Fixed recipient endpoints, keyed by (debt, role, channel).
#[derive(Default, Clone)]
pub struct StaticDirectory {
    endpoints: Arc<RwLock<HashMap<(Uuid, RecipientRole, Channel), ChannelEndpoint>>>,
}

impl StaticDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn register(&self, debt_id: Uuid, role: RecipientRole, endpoint: ChannelEndpoint) {
        let mut endpoints = self.endpoints.write().await;
        endpoints.insert((debt_id, role, endpoint.channel), endpoint);
    }
}

#[async_trait]
impl RecipientDirectory for StaticDirectory {
    async fn resolve_endpoint(
        &self,
        debt_id: Uuid,
        role: RecipientRole,
        channel: Channel,
    ) -> Result<Option<ChannelEndpoint>> {
        let endpoints = self.endpoints.read().await;
        Ok(endpoints.get(&(debt_id, role, channel)).cloned())
    }
}
