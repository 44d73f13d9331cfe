//! Boundaries between the engine and the things it does not own.

use super::channel::{Channel, ChannelEndpoint, RenderedMessage};
use super::debt::{DebtTerms, PaymentRecord, PaymentStatus};
use super::notification::{
    EventNotification, NewNotification, NotificationId, NotificationStatus, PaymentPhase,
    RecipientRole,
};
use super::template::TemplateVars;
use super::trigger::{JobHandle, ReminderTrigger, TriggerKey, TriggerStatus};
use crate::error::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::sync::Arc;
use uuid::Uuid;

/// Holds reminder triggers. The only mutable state the reminder path shares.
#[async_trait]
pub trait TriggerStore: Send + Sync {
    /// Stores a new trigger, failing with `DuplicateTrigger` if its key exists.
    async fn insert(&self, trigger: ReminderTrigger) -> Result<()>;
    async fn get(&self, key: &TriggerKey) -> Result<Option<ReminderTrigger>>;
    async fn group(&self, debt_id: Uuid, installment_number: u32) -> Result<Vec<ReminderTrigger>>;
    async fn for_debt(&self, debt_id: Uuid) -> Result<Vec<ReminderTrigger>>;
    async fn scheduled(&self) -> Result<Vec<ReminderTrigger>>;
    /// Atomically moves `key` from `expected` to `next`; `false` if the
    /// current status was anything else.
    async fn compare_and_set_status(
        &self,
        key: &TriggerKey,
        expected: TriggerStatus,
        next: TriggerStatus,
    ) -> Result<bool>;
    async fn attach_job(&self, key: &TriggerKey, handle: Option<JobHandle>) -> Result<()>;
    /// Replaces due date, amount, fire time and channels of a trigger that is
    /// still scheduled; `false` if it is not.
    async fn reschedule(&self, trigger: &ReminderTrigger) -> Result<bool>;
}

#[async_trait]
pub trait NotificationStore: Send + Sync {
    async fn insert(&self, notification: NewNotification) -> Result<EventNotification>;
    async fn mark(
        &self,
        id: NotificationId,
        status: NotificationStatus,
        sent_at: Option<DateTime<Utc>>,
    ) -> Result<()>;
    async fn for_payment(&self, payment_id: Uuid) -> Result<Vec<EventNotification>>;
    async fn phase(&self, payment_id: Uuid) -> Result<Option<PaymentPhase>>;
    /// Atomically moves a payment from `from` to `to`.
    async fn advance_phase(
        &self,
        payment_id: Uuid,
        from: Option<PaymentPhase>,
        to: PaymentPhase,
    ) -> Result<bool>;
}

/// Debt and payment data owned by the surrounding application.
#[async_trait]
pub trait DebtReadModel: Send + Sync {
    async fn debt_terms(&self, debt_id: Uuid) -> Result<Option<DebtTerms>>;
    async fn payment_status(
        &self,
        debt_id: Uuid,
        installment_number: u32,
    ) -> Result<Option<PaymentStatus>>;
    async fn payment(&self, debt_id: Uuid, payment_id: Uuid) -> Result<Option<PaymentRecord>>;
}

/// Recipient contact preferences.
#[async_trait]
pub trait RecipientDirectory: Send + Sync {
    async fn resolve_endpoint(
        &self,
        debt_id: Uuid,
        role: RecipientRole,
        channel: Channel,
    ) -> Result<Option<ChannelEndpoint>>;
}

pub trait TemplateRenderer: Send + Sync {
    fn render(&self, template_key: &str, vars: &TemplateVars) -> Result<String>;
    fn contains(&self, template_key: &str) -> bool;
}

/// One delivery mechanism (mail relay, SMS gateway, a webhook flavour).
#[async_trait]
pub trait ChannelSender: Send + Sync {
    async fn send(&self, endpoint: &ChannelEndpoint, message: &RenderedMessage) -> Result<()>;
}

/// Deferred, cancellable invocations keyed by trigger.
#[async_trait]
pub trait Scheduler: Send + Sync {
    async fn schedule(&self, key: TriggerKey, fire_at: DateTime<Utc>) -> Result<JobHandle>;
    /// Releases a job; `false` if it had already fired or been cancelled.
    async fn cancel(&self, handle: JobHandle) -> bool;
}

pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

pub type TriggerStoreRef = Arc<dyn TriggerStore>;
pub type NotificationStoreRef = Arc<dyn NotificationStore>;
pub type DebtReadModelRef = Arc<dyn DebtReadModel>;
pub type RecipientDirectoryRef = Arc<dyn RecipientDirectory>;
pub type TemplateRendererRef = Arc<dyn TemplateRenderer>;
pub type ChannelSenderRef = Arc<dyn ChannelSender>;
pub type SchedulerRef = Arc<dyn Scheduler>;
pub type ClockRef = Arc<dyn Clock>;
pub type TriggerStoreFactory = Box<dyn Fn() -> TriggerStoreRef + Send + Sync>;
