use chrono::{DateTime, NaiveDate, Utc};
use dues_notifier::application::dispatcher::ChannelDispatcher;
use dues_notifier::application::engine::{EnginePorts, ReminderEngine};
use dues_notifier::domain::channel::{Channel, ChannelEndpoint, EndpointAddress};
use dues_notifier::domain::debt::DebtTerms;
use dues_notifier::domain::money::Amount;
use dues_notifier::domain::notification::RecipientRole;
use dues_notifier::domain::ports::{RecipientDirectory, RecipientDirectoryRef};
use dues_notifier::domain::schedule::{CountMode, InstallmentPlan};
use dues_notifier::domain::trigger::ReminderDefaults;
use dues_notifier::infrastructure::clock::ManualClock;
use dues_notifier::infrastructure::in_memory::{
    InMemoryDebtBook, InMemoryNotificationStore, InMemoryTriggerStore, StaticDirectory,
};
use dues_notifier::infrastructure::senders::RecordingSender;
use dues_notifier::infrastructure::templates::DefaultTemplates;
use dues_notifier::infrastructure::timer::{FireReceiver, TokioScheduler};
use async_trait::async_trait;
use dues_notifier::error::{NotifyError, Result as NotifyResult};
use rust_decimal::Decimal;
use std::fs::File;
use std::io::Error;
use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use uuid::Uuid;

/// An engine wired to in-memory stores and a recording sender on email and sms.
pub struct Harness {
    pub engine: ReminderEngine,
    pub store: InMemoryTriggerStore,
    pub notifications: InMemoryNotificationStore,
    pub book: InMemoryDebtBook,
    pub directory: StaticDirectory,
    pub sender: RecordingSender,
    pub clock: ManualClock,
    pub scheduler: Arc<TokioScheduler>,
    pub fires: Option<FireReceiver>,
}

pub fn harness(now: DateTime<Utc>) -> Harness {
    harness_with_sender(now, RecordingSender::new())
}

pub fn harness_with_sender(now: DateTime<Utc>, sender: RecordingSender) -> Harness {
    build(now, sender, |directory| Arc::new(directory) as RecipientDirectoryRef)
}

/// Lets a test put its own directory in front of the shared `StaticDirectory`.
pub fn harness_with_directory(
    now: DateTime<Utc>,
    wrap: impl FnOnce(StaticDirectory) -> RecipientDirectoryRef,
) -> Harness {
    build(now, RecordingSender::new(), wrap)
}

/// Fails the first lookup for `role`, then answers from the wrapped directory.
pub struct FlakyDirectory {
    inner: StaticDirectory,
    role: RecipientRole,
    failed: AtomicBool,
}

impl FlakyDirectory {
    pub fn failing_once(inner: StaticDirectory, role: RecipientRole) -> Self {
        Self {
            inner,
            role,
            failed: AtomicBool::new(false),
        }
    }
}

#[async_trait]
impl RecipientDirectory for FlakyDirectory {
    async fn resolve_endpoint(
        &self,
        debt_id: Uuid,
        role: RecipientRole,
        channel: Channel,
    ) -> NotifyResult<Option<ChannelEndpoint>> {
        if role == self.role && !self.failed.swap(true, Ordering::SeqCst) {
            return Err(NotifyError::IoError(Error::other("directory unavailable")));
        }
        self.inner.resolve_endpoint(debt_id, role, channel).await
    }
}

fn build(
    now: DateTime<Utc>,
    sender: RecordingSender,
    wrap: impl FnOnce(StaticDirectory) -> RecipientDirectoryRef,
) -> Harness {
    let clock = ManualClock::new(now);
    let (scheduler, fires) = TokioScheduler::new(Arc::new(clock.clone()));
    let scheduler = Arc::new(scheduler);
    let store = InMemoryTriggerStore::new();
    let notifications = InMemoryNotificationStore::new();
    let book = InMemoryDebtBook::new();
    let directory = StaticDirectory::new();

    let engine = ReminderEngine::new(
        EnginePorts {
            triggers: Arc::new(store.clone()),
            notifications: Arc::new(notifications.clone()),
            debts: Arc::new(book.clone()),
            directory: wrap(directory.clone()),
            templates: Arc::new(DefaultTemplates::new()),
            scheduler: scheduler.clone(),
            clock: Arc::new(clock.clone()),
        },
        ChannelDispatcher::new(8, Duration::from_secs(5))
            .with_sender(Channel::Email, Arc::new(sender.clone()))
            .with_sender(Channel::Sms, Arc::new(sender.clone())),
        ReminderDefaults::default(),
        32,
    );

    Harness {
        engine,
        store,
        notifications,
        book,
        directory,
        sender,
        clock,
        scheduler,
        fires: Some(fires),
    }
}

pub fn date(y: i32, m: u32, d: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(y, m, d).unwrap()
}

pub fn debt(
    debt_id: Uuid,
    principal: Decimal,
    plan: InstallmentPlan,
    anchor: NaiveDate,
    count_mode: CountMode,
) -> DebtTerms {
    DebtTerms {
        debt_id,
        principal: Amount::new(principal).unwrap(),
        currency: "PHP".to_string(),
        plan,
        anchor_date: anchor,
        count_mode,
        payer_name: "Ben".to_string(),
        counterparty_name: "Ana".to_string(),
        reminders: Default::default(),
    }
}

/// Registers email endpoints for both parties of `debt_id`.
pub async fn register_emails(directory: &StaticDirectory, debt_id: Uuid) {
    for (role, address) in [
        (RecipientRole::Payer, "ben@example.com"),
        (RecipientRole::Counterparty, "ana@example.com"),
    ] {
        directory
            .register(
                debt_id,
                role,
                ChannelEndpoint::new(
                    Channel::Email,
                    EndpointAddress::Email {
                        address: address.to_string(),
                    },
                ),
            )
            .await;
    }
}

/// Writes a debts file with `rows` monthly debts of 1200 over 12 payments.
pub fn generate_debts_csv(path: &Path, rows: usize) -> Result<Vec<Uuid>, Error> {
    let file = File::create(path)?;
    let mut wtr = csv::WriterBuilder::new().from_writer(file);

    wtr.write_record([
        "debt_id",
        "principal",
        "currency",
        "plan",
        "anchor",
        "payments",
        "final_due",
        "payer",
        "counterparty",
    ])?;

    let mut ids = Vec::with_capacity(rows);
    for _ in 0..rows {
        let id = Uuid::new_v4();
        wtr.write_record([
            id.to_string().as_str(),
            "1200",
            "PHP",
            "monthly",
            "2025-01-15",
            "12",
            "",
            "Ben",
            "Ana",
        ])?;
        ids.push(id);
    }

    wtr.flush()?;
    Ok(ids)
}
