use crate::application::dispatcher::ChannelDispatcher;
use crate::domain::channel::{ChannelEndpoint, ChannelSet, RenderedMessage};
use crate::domain::debt::{DebtTerms, PaymentRecord};
use crate::domain::notification::{
    EventNotification, NewNotification, NotificationStatus, PaymentPhase, RecipientRole,
};
use crate::domain::ports::{
    ClockRef, NotificationStoreRef, RecipientDirectoryRef, TemplateRendererRef,
};
use crate::domain::template::TemplateVars;
use crate::error::{NotifyError, Result};
use std::sync::Arc;
use tracing::{info, warn};

/// Drives the payment-lifecycle notifications: `made`, then `verified` or
/// `rejected`.
#[derive(Clone)]
pub struct EventNotifier {
    notifications: NotificationStoreRef,
    directory: RecipientDirectoryRef,
    templates: TemplateRendererRef,
    dispatcher: Arc<ChannelDispatcher>,
    clock: ClockRef,
}

/// A rendered message and the endpoints it goes to, not yet stored.
struct Outgoing {
    role: RecipientRole,
    message: RenderedMessage,
    endpoints: Vec<ChannelEndpoint>,
}

fn template_key(phase: PaymentPhase, role: RecipientRole) -> String {
    match phase {
        PaymentPhase::Made => format!("payment_made.{role}"),
        PaymentPhase::Verified => "payment_verified".to_string(),
        PaymentPhase::Rejected => "payment_rejected".to_string(),
    }
}

impl EventNotifier {
    pub fn new(
        notifications: NotificationStoreRef,
        directory: RecipientDirectoryRef,
        templates: TemplateRendererRef,
        dispatcher: Arc<ChannelDispatcher>,
        clock: ClockRef,
    ) -> Self {
        Self {
            notifications,
            directory,
            templates,
            dispatcher,
            clock,
        }
    }

    /// Moves the payment into `to` and notifies every recipient of that phase.
    ///
    /// Every message is rendered and every endpoint resolved before the phase
    /// is committed, so a template or directory failure leaves the payment
    /// where it was and the event can simply be retried. The phase change is a
    /// compare-and-set on the stored phase, so a repeated or concurrent event
    /// for the same payment yields `InvalidTransition` instead of a second
    /// round of notifications.
    pub async fn transition(
        &self,
        terms: &DebtTerms,
        payment: &PaymentRecord,
        to: PaymentPhase,
        reason: Option<&str>,
        channels: &ChannelSet,
    ) -> Result<Vec<EventNotification>> {
        let from = self.notifications.phase(payment.payment_id).await?;
        let invalid = || NotifyError::InvalidTransition {
            payment_id: payment.payment_id,
            from,
            to,
        };
        if !to.can_follow(from) {
            return Err(invalid());
        }

        let mut vars = TemplateVars::new()
            .with("payer_name", &terms.payer_name)
            .with("counterparty_name", &terms.counterparty_name)
            .with("amount", payment.amount)
            .with("currency", &terms.currency);
        if let Some(reason) = reason {
            vars = vars.with("reason", reason);
        }

        let mut outgoing = Vec::with_capacity(to.recipients().len());
        for &role in to.recipients() {
            outgoing.push(self.prepare(terms, to, role, &vars, channels).await?);
        }

        if !self
            .notifications
            .advance_phase(payment.payment_id, from, to)
            .await?
        {
            return Err(invalid());
        }
        info!(payment_id = %payment.payment_id, ?from, phase = %to, "payment phase changed");

        let mut sent = Vec::with_capacity(outgoing.len());
        for notification in outgoing {
            sent.push(self.deliver(terms, payment, to, notification).await?);
        }
        Ok(sent)
    }

    async fn prepare(
        &self,
        terms: &DebtTerms,
        phase: PaymentPhase,
        role: RecipientRole,
        vars: &TemplateVars,
        channels: &ChannelSet,
    ) -> Result<Outgoing> {
        let key = template_key(phase, role);
        let message = RenderedMessage {
            subject: Some(self.templates.render(&format!("{key}.subject"), vars)?),
            body: self.templates.render(&format!("{key}.body"), vars)?,
        };

        let mut endpoints: Vec<ChannelEndpoint> = Vec::new();
        for channel in channels.iter() {
            if let Some(endpoint) = self
                .directory
                .resolve_endpoint(terms.debt_id, role, channel)
                .await?
            {
                endpoints.push(endpoint);
            }
        }
        Ok(Outgoing {
            role,
            message,
            endpoints,
        })
    }

    async fn deliver(
        &self,
        terms: &DebtTerms,
        payment: &PaymentRecord,
        phase: PaymentPhase,
        outgoing: Outgoing,
    ) -> Result<EventNotification> {
        let Outgoing {
            role,
            message,
            endpoints,
        } = outgoing;
        let mut stored = self
            .notifications
            .insert(NewNotification {
                debt_id: terms.debt_id,
                payment_id: payment.payment_id,
                recipient_role: role,
                occasion: phase,
                message: message.body.clone(),
                created_at: self.clock.now(),
            })
            .await?;

        let report = self.dispatcher.dispatch(endpoints, &message).await;
        let (status, sent_at) = if report.delivered() {
            (NotificationStatus::Sent, Some(self.clock.now()))
        } else {
            warn!(
                payment_id = %payment.payment_id,
                %role,
                phase = %phase,
                error = report.failure_detail().as_deref().unwrap_or("no enabled channel"),
                "event notification not delivered"
            );
            (NotificationStatus::Failed, None)
        };
        self.notifications.mark(stored.id, status, sent_at).await?;
        stored.status = status;
        stored.sent_at = sent_at;
        Ok(stored)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::channel::{Channel, EndpointAddress};
    use crate::domain::debt::PaymentState;
    use crate::domain::money::Amount;
    use crate::domain::ports::{NotificationStore, RecipientDirectory};
    use crate::domain::schedule::{CountMode, InstallmentPlan};
    use crate::infrastructure::clock::ManualClock;
    use crate::infrastructure::in_memory::{InMemoryNotificationStore, StaticDirectory};
    use crate::infrastructure::senders::RecordingSender;
    use crate::infrastructure::templates::DefaultTemplates;
    use async_trait::async_trait;
    use chrono::{NaiveDate, TimeZone, Utc};
    use rust_decimal_macros::dec;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::time::Duration;
    use uuid::Uuid;

    /// Fails the first counterparty lookup, then answers normally.
    struct FlakyDirectory {
        inner: StaticDirectory,
        failed: AtomicBool,
    }

    #[async_trait]
    impl RecipientDirectory for FlakyDirectory {
        async fn resolve_endpoint(
            &self,
            debt_id: Uuid,
            role: RecipientRole,
            channel: Channel,
        ) -> Result<Option<ChannelEndpoint>> {
            if role == RecipientRole::Counterparty && !self.failed.swap(true, Ordering::SeqCst) {
                return Err(NotifyError::IoError(std::io::Error::other(
                    "directory unavailable",
                )));
            }
            self.inner.resolve_endpoint(debt_id, role, channel).await
        }
    }

    struct Fixture {
        notifier: EventNotifier,
        store: InMemoryNotificationStore,
        sender: RecordingSender,
        terms: DebtTerms,
        payment: PaymentRecord,
    }

    async fn fixture() -> Fixture {
        fixture_with(|directory| Arc::new(directory) as RecipientDirectoryRef).await
    }

    async fn fixture_with(wrap: impl FnOnce(StaticDirectory) -> RecipientDirectoryRef) -> Fixture {
        let debt_id = Uuid::new_v4();
        let directory = StaticDirectory::new();
        directory
            .register(
                debt_id,
                RecipientRole::Payer,
                ChannelEndpoint::new(
                    Channel::Email,
                    EndpointAddress::Email {
                        address: "ben@example.com".to_string(),
                    },
                ),
            )
            .await;
        directory
            .register(
                debt_id,
                RecipientRole::Counterparty,
                ChannelEndpoint::new(
                    Channel::Email,
                    EndpointAddress::Email {
                        address: "ana@example.com".to_string(),
                    },
                ),
            )
            .await;
        let sender = RecordingSender::new();
        let dispatcher = ChannelDispatcher::new(2, Duration::from_secs(1))
            .with_sender(Channel::Email, Arc::new(sender.clone()));
        let clock = ManualClock::new(Utc.with_ymd_and_hms(2025, 3, 1, 12, 0, 0).unwrap());
        let store = InMemoryNotificationStore::new();

        Fixture {
            notifier: EventNotifier::new(
                Arc::new(store.clone()),
                wrap(directory),
                Arc::new(DefaultTemplates::new()),
                Arc::new(dispatcher),
                Arc::new(clock),
            ),
            store,
            sender,
            terms: DebtTerms {
                debt_id,
                principal: Amount::new(dec!(500)).unwrap(),
                currency: "PHP".to_string(),
                plan: InstallmentPlan::OneTime,
                anchor_date: NaiveDate::from_ymd_opt(2025, 3, 15).unwrap(),
                count_mode: CountMode::FixedCount(1),
                payer_name: "Ben".to_string(),
                counterparty_name: "Ana".to_string(),
                reminders: Default::default(),
            },
            payment: PaymentRecord {
                payment_id: Uuid::new_v4(),
                debt_id,
                amount: Amount::new(dec!(500)).unwrap(),
                installment_number: None,
                state: PaymentState::Pending,
            },
        }
    }

    fn email_only() -> ChannelSet {
        [Channel::Email].into_iter().collect()
    }

    #[tokio::test]
    async fn test_made_then_verified() {
        let f = fixture().await;
        let made = f
            .notifier
            .transition(&f.terms, &f.payment, PaymentPhase::Made, None, &email_only())
            .await
            .unwrap();
        assert_eq!(made.len(), 2);
        assert_eq!(made[0].recipient_role, RecipientRole::Payer);
        assert_eq!(made[1].recipient_role, RecipientRole::Payer.opposite());
        assert!(made.iter().all(|n| n.status == NotificationStatus::Sent));
        assert!(made[0].message.contains("recorded, pending verification"));
        assert!(made[1].message.contains("received, pending verification"));

        let verified = f
            .notifier
            .transition(&f.terms, &f.payment, PaymentPhase::Verified, None, &email_only())
            .await
            .unwrap();
        assert_eq!(verified.len(), 1);
        assert_eq!(verified[0].recipient_role, RecipientRole::Payer);
        assert!(verified[0].message.contains("verified and accepted"));

        let deliveries = f.sender.deliveries().await;
        assert_eq!(deliveries.len(), 3);
        assert_eq!(deliveries[1].destination, "ana@example.com");
    }

    #[tokio::test]
    async fn test_rejected_carries_reason() {
        let f = fixture().await;
        f.notifier
            .transition(&f.terms, &f.payment, PaymentPhase::Made, None, &email_only())
            .await
            .unwrap();
        let rejected = f
            .notifier
            .transition(
                &f.terms,
                &f.payment,
                PaymentPhase::Rejected,
                Some("amount does not match"),
                &email_only(),
            )
            .await
            .unwrap();
        assert_eq!(rejected.len(), 1);
        assert!(rejected[0].message.ends_with("rejected: amount does not match"));
    }

    #[tokio::test]
    async fn test_invalid_transitions() {
        let f = fixture().await;
        assert!(matches!(
            f.notifier
                .transition(&f.terms, &f.payment, PaymentPhase::Verified, None, &email_only())
                .await,
            Err(NotifyError::InvalidTransition { from: None, .. })
        ));

        f.notifier
            .transition(&f.terms, &f.payment, PaymentPhase::Made, None, &email_only())
            .await
            .unwrap();
        assert!(matches!(
            f.notifier
                .transition(&f.terms, &f.payment, PaymentPhase::Made, None, &email_only())
                .await,
            Err(NotifyError::InvalidTransition {
                from: Some(PaymentPhase::Made),
                ..
            })
        ));
    }

    #[tokio::test]
    async fn test_undeliverable_notification_is_failed() {
        let f = fixture().await;
        let made = f
            .notifier
            .transition(
                &f.terms,
                &f.payment,
                PaymentPhase::Made,
                None,
                &[Channel::Sms].into_iter().collect(),
            )
            .await
            .unwrap();
        assert_eq!(made.len(), 2);
        assert!(made.iter().all(|n| n.status == NotificationStatus::Failed));
        assert!(made.iter().all(|n| n.sent_at.is_none()));
    }

    #[tokio::test]
    async fn test_failed_lookup_leaves_transition_retryable() {
        let f = fixture_with(|inner| {
            Arc::new(FlakyDirectory {
                inner,
                failed: AtomicBool::new(false),
            }) as RecipientDirectoryRef
        })
        .await;

        assert!(matches!(
            f.notifier
                .transition(&f.terms, &f.payment, PaymentPhase::Made, None, &email_only())
                .await,
            Err(NotifyError::IoError(_))
        ));
        // nothing committed, stored or sent
        assert_eq!(f.store.phase(f.payment.payment_id).await.unwrap(), None);
        assert!(f.store.for_payment(f.payment.payment_id).await.unwrap().is_empty());
        assert!(f.sender.deliveries().await.is_empty());

        let made = f
            .notifier
            .transition(&f.terms, &f.payment, PaymentPhase::Made, None, &email_only())
            .await
            .unwrap();
        assert_eq!(made.len(), 2);
        assert!(made.iter().all(|n| n.status == NotificationStatus::Sent));
        assert_eq!(
            f.store.phase(f.payment.payment_id).await.unwrap(),
            Some(PaymentPhase::Made)
        );
        assert_eq!(f.sender.deliveries().await.len(), 2);
    }
}
