use crate::domain::channel::{Channel, ChannelEndpoint, DeliveryAttempt, RenderedMessage};
use crate::domain::ports::ChannelSenderRef;
use crate::error::NotifyError;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{debug, error, warn};

/// Outcome of one fan-out.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DispatchReport {
    pub attempts: Vec<DeliveryAttempt>,
}

impl DispatchReport {
    /// At least one enabled channel got the message through.
    pub fn delivered(&self) -> bool {
        self.attempts.iter().any(DeliveryAttempt::is_sent)
    }

    /// Joined error details of the failed attempts.
    pub fn failure_detail(&self) -> Option<String> {
        let details: Vec<String> = self
            .attempts
            .iter()
            .filter(|a| !a.is_sent())
            .map(|a| {
                format!(
                    "{}: {}",
                    a.channel,
                    a.error_detail.as_deref().unwrap_or("unknown error")
                )
            })
            .collect();
        (!details.is_empty()).then(|| details.join("; "))
    }
}

/// Sends one rendered message over a set of endpoints.
///
/// Each endpoint is attempted independently on a bounded pool of workers;
/// a slow or failing channel neither blocks nor aborts its siblings. Every
/// send is capped by the per-channel timeout.
pub struct ChannelDispatcher {
    senders: HashMap<Channel, ChannelSenderRef>,
    workers: Arc<Semaphore>,
    timeout: Duration,
}

impl ChannelDispatcher {
    pub fn new(workers: usize, timeout: Duration) -> Self {
        Self {
            senders: HashMap::new(),
            workers: Arc::new(Semaphore::new(workers.max(1))),
            timeout,
        }
    }

    pub fn with_sender(mut self, channel: Channel, sender: ChannelSenderRef) -> Self {
        self.register(channel, sender);
        self
    }

    pub fn register(&mut self, channel: Channel, sender: ChannelSenderRef) {
        self.senders.insert(channel, sender);
    }

    pub async fn dispatch(
        &self,
        endpoints: Vec<ChannelEndpoint>,
        message: &RenderedMessage,
    ) -> DispatchReport {
        let message = Arc::new(message.clone());
        let mut attempts = Vec::new();
        let mut tasks = JoinSet::new();

        for endpoint in endpoints.into_iter().filter(|e| e.enabled) {
            let destination = endpoint.address.destination();
            let Some(sender) = self.senders.get(&endpoint.channel).cloned() else {
                warn!(channel = %endpoint.channel, "no sender registered");
                attempts.push(DeliveryAttempt::failed(
                    endpoint.channel,
                    destination,
                    "no sender registered",
                ));
                continue;
            };
            let workers = self.workers.clone();
            let message = message.clone();
            let timeout = self.timeout;
            tasks.spawn(async move {
                let Ok(_permit) = workers.acquire_owned().await else {
                    return DeliveryAttempt::failed(endpoint.channel, destination, "dispatcher closed");
                };
                match tokio::time::timeout(timeout, sender.send(&endpoint, &message)).await {
                    Ok(Ok(())) => DeliveryAttempt::sent(endpoint.channel, destination),
                    Ok(Err(NotifyError::Delivery { detail, .. })) => {
                        DeliveryAttempt::failed(endpoint.channel, destination, detail)
                    }
                    Ok(Err(e)) => DeliveryAttempt::failed(endpoint.channel, destination, e.to_string()),
                    Err(_) => DeliveryAttempt::failed(
                        endpoint.channel,
                        destination,
                        format!("timed out after {}ms", timeout.as_millis()),
                    ),
                }
            });
        }

        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok(attempt) => {
                    if attempt.is_sent() {
                        debug!(channel = %attempt.channel, destination = %attempt.destination, "delivered");
                    } else {
                        warn!(
                            channel = %attempt.channel,
                            destination = %attempt.destination,
                            error = attempt.error_detail.as_deref().unwrap_or_default(),
                            "delivery failed"
                        );
                    }
                    attempts.push(attempt);
                }
                Err(e) => error!(error = %e, "delivery task aborted"),
            }
        }

        attempts.sort_by_key(|a| a.channel);
        DispatchReport { attempts }
    }
}
