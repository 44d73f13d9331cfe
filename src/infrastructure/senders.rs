use crate::domain::channel::{Channel, ChannelEndpoint, EndpointAddress, RenderedMessage};
use crate::domain::ports::ChannelSender;
use crate::error::{NotifyError, Result};
use async_trait::async_trait;
use serde_json::json;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tracing::info;

/// Target and JSON body of one webhook call.
#[derive(Debug, Clone, PartialEq)]
pub struct WebhookPayload {
    pub url: String,
    pub body: serde_json::Value,
}

impl WebhookPayload {
    /// Builds the request each webhook flavour expects.
    pub fn for_channel(endpoint: &ChannelEndpoint, message: &RenderedMessage) -> Result<Self> {
        let text = message.text_for(endpoint.channel);
        match (endpoint.channel, &endpoint.address) {
            (Channel::Slack, EndpointAddress::Webhook { url }) => Ok(Self {
                url: url.clone(),
                body: json!({ "text": text }),
            }),
            (Channel::Discord, EndpointAddress::Webhook { url }) => Ok(Self {
                url: url.clone(),
                body: json!({ "content": text }),
            }),
            (Channel::Telegram, EndpointAddress::TelegramBot { bot_token, chat_id }) => Ok(Self {
                url: format!("https://api.telegram.org/bot{bot_token}/sendMessage"),
                body: json!({ "chat_id": chat_id, "text": text }),
            }),
            (channel, address) => Err(NotifyError::ValidationError(format!(
                "{channel} cannot be sent to {}",
                address.destination()
            ))),
        }
    }
}

/// Logs every delivery instead of talking to a provider.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingSender;

#[async_trait]
impl ChannelSender for TracingSender {
    async fn send(&self, endpoint: &ChannelEndpoint, message: &RenderedMessage) -> Result<()> {
        if endpoint.channel.is_webhook() {
            let payload = WebhookPayload::for_channel(endpoint, message)?;
            info!(
                channel = %endpoint.channel,
                destination = %endpoint.address.destination(),
                payload = %payload.body,
                "webhook delivery"
            );
        } else {
            info!(
                channel = %endpoint.channel,
                destination = %endpoint.address.destination(),
                subject = message.subject.as_deref().unwrap_or_default(),
                "direct delivery"
            );
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordedDelivery {
    pub channel: Channel,
    pub destination: String,
    pub text: String,
}

#[derive(Default)]
struct RecorderState {
    deliveries: Vec<RecordedDelivery>,
    failing: HashSet<Channel>,
}

/// Keeps every delivery in memory. Channels can be told to fail or to stall.
#[derive(Default, Clone)]
pub struct RecordingSender {
    state: Arc<RwLock<RecorderState>>,
    delay: Option<Duration>,
}

impl RecordingSender {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every send sleeps for `delay` first.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub async fn fail_channel(&self, channel: Channel) {
        self.state.write().await.failing.insert(channel);
    }

    pub async fn restore_channel(&self, channel: Channel) {
        self.state.write().await.failing.remove(&channel);
    }

    pub async fn deliveries(&self) -> Vec<RecordedDelivery> {
        self.state.read().await.deliveries.clone()
    }
}

#[async_trait]
impl ChannelSender for RecordingSender {
    async fn send(&self, endpoint: &ChannelEndpoint, message: &RenderedMessage) -> Result<()> {
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        let mut state = self.state.write().await;
        if state.failing.contains(&endpoint.channel) {
            return Err(NotifyError::Delivery {
                channel: endpoint.channel,
                detail: "provider unavailable".to_string(),
            });
        }
        let text = if endpoint.channel.is_webhook() {
            WebhookPayload::for_channel(endpoint, message)?.body.to_string()
        } else {
            message.text_for(endpoint.channel)
        };
        state.deliveries.push(RecordedDelivery {
            channel: endpoint.channel,
            destination: endpoint.address.destination(),
            text,
        });
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn message() -> RenderedMessage {
        RenderedMessage {
            subject: Some("Reminder".to_string()),
            body: "Pay 1000 PHP".to_string(),
        }
    }

    fn webhook(channel: Channel) -> ChannelEndpoint {
        ChannelEndpoint::new(
            channel,
            EndpointAddress::Webhook {
                url: "https://hooks.example.com/abc".to_string(),
            },
        )
    }

    #[test]
    fn test_webhook_payload_shapes() {
        let slack = WebhookPayload::for_channel(&webhook(Channel::Slack), &message()).unwrap();
        assert_eq!(slack.body, json!({ "text": "Pay 1000 PHP" }));
        assert_eq!(slack.url, "https://hooks.example.com/abc");

        let discord = WebhookPayload::for_channel(&webhook(Channel::Discord), &message()).unwrap();
        assert_eq!(discord.body, json!({ "content": "Pay 1000 PHP" }));

        let telegram = WebhookPayload::for_channel(
            &ChannelEndpoint::new(
                Channel::Telegram,
                EndpointAddress::TelegramBot {
                    bot_token: "123:abc".to_string(),
                    chat_id: "42".to_string(),
                },
            ),
            &message(),
        )
        .unwrap();
        assert_eq!(telegram.url, "https://api.telegram.org/bot123:abc/sendMessage");
        assert_eq!(telegram.body, json!({ "chat_id": "42", "text": "Pay 1000 PHP" }));
    }

    #[test]
    fn test_webhook_payload_rejects_mismatched_address() {
        assert!(WebhookPayload::for_channel(&webhook(Channel::Telegram), &message()).is_err());
        assert!(WebhookPayload::for_channel(&webhook(Channel::Email), &message()).is_err());
    }

    #[tokio::test]
    async fn test_recording_sender() {
        let sender = RecordingSender::new();
        let email = ChannelEndpoint::new(
            Channel::Email,
            EndpointAddress::Email {
                address: "ben@example.com".to_string(),
            },
        );
        sender.send(&email, &message()).await.unwrap();
        sender.send(&webhook(Channel::Slack), &message()).await.unwrap();

        sender.fail_channel(Channel::Email).await;
        assert!(matches!(
            sender.send(&email, &message()).await,
            Err(NotifyError::Delivery { channel: Channel::Email, .. })
        ));

        let deliveries = sender.deliveries().await;
        assert_eq!(deliveries.len(), 2);
        assert_eq!(deliveries[0].text, "Reminder\n\nPay 1000 PHP");
        assert_eq!(deliveries[1].text, r#"{"text":"Pay 1000 PHP"}"#);
    }

    #[tokio::test]
    async fn test_tracing_sender_validates_webhooks() {
        assert!(TracingSender.send(&webhook(Channel::Slack), &message()).await.is_ok());
        assert!(TracingSender.send(&webhook(Channel::Telegram), &message()).await.is_err());
    }
}
