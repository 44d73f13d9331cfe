use crate::error::NotifyError;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Channel {
    Email,
    Sms,
    Slack,
    Telegram,
    Discord,
}

impl Channel {
    /// Webhook-style channels post a JSON payload instead of addressing a
    /// single mailbox or phone number.
    pub fn is_webhook(&self) -> bool {
        matches!(self, Channel::Slack | Channel::Telegram | Channel::Discord)
    }

    pub fn uses_subject(&self) -> bool {
        matches!(self, Channel::Email)
    }
}

impl fmt::Display for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Channel::Email => "email",
            Channel::Sms => "sms",
            Channel::Slack => "slack",
            Channel::Telegram => "telegram",
            Channel::Discord => "discord",
        };
        f.write_str(name)
    }
}

impl FromStr for Channel {
    type Err = NotifyError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "email" => Ok(Channel::Email),
            "sms" => Ok(Channel::Sms),
            "slack" => Ok(Channel::Slack),
            "telegram" => Ok(Channel::Telegram),
            "discord" => Ok(Channel::Discord),
            other => Err(NotifyError::ValidationError(format!(
                "unknown channel '{other}'"
            ))),
        }
    }
}

/// Ordered, duplicate-free set of channels a notification fans out to.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ChannelSet(pub BTreeSet<Channel>);

impl ChannelSet {
    pub fn iter(&self) -> impl Iterator<Item = Channel> + '_ {
        self.0.iter().copied()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl FromIterator<Channel> for ChannelSet {
    fn from_iter<I: IntoIterator<Item = Channel>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

impl FromStr for ChannelSet {
    type Err = NotifyError;

    /// Parses a comma or `|` separated list, e.g. `email,sms`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        s.split([',', '|'])
            .map(str::trim)
            .filter(|part| !part.is_empty())
            .map(Channel::from_str)
            .collect()
    }
}

impl fmt::Display for ChannelSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let names: Vec<String> = self.iter().map(|c| c.to_string()).collect();
        f.write_str(&names.join("|"))
    }
}

/// Delivery coordinates for one recipient on one channel.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum EndpointAddress {
    Email { address: String },
    Phone { number: String },
    Webhook { url: String },
    TelegramBot { bot_token: String, chat_id: String },
}

impl EndpointAddress {
    /// Printable destination, with bot credentials left out.
    pub fn destination(&self) -> String {
        match self {
            EndpointAddress::Email { address } => address.clone(),
            EndpointAddress::Phone { number } => number.clone(),
            EndpointAddress::Webhook { url } => url.clone(),
            EndpointAddress::TelegramBot { chat_id, .. } => format!("telegram:{chat_id}"),
        }
    }
}

/// Owned by the recipient preference store; read-only here.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChannelEndpoint {
    pub channel: Channel,
    pub address: EndpointAddress,
    pub enabled: bool,
}

impl ChannelEndpoint {
    pub fn new(channel: Channel, address: EndpointAddress) -> Self {
        Self {
            channel,
            address,
            enabled: true,
        }
    }

    pub fn disabled(mut self) -> Self {
        self.enabled = false;
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RenderedMessage {
    pub subject: Option<String>,
    pub body: String,
}

impl RenderedMessage {
    /// Text as it should appear on `channel`: email keeps its subject line,
    /// every other channel gets the body alone.
    pub fn text_for(&self, channel: Channel) -> String {
        match (&self.subject, channel.uses_subject()) {
            (Some(subject), true) => format!("{subject}\n\n{}", self.body),
            _ => self.body.clone(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeliveryOutcome {
    Sent,
    Failed,
}

/// Result of one send on one channel.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeliveryAttempt {
    pub channel: Channel,
    pub destination: String,
    pub outcome: DeliveryOutcome,
    pub error_detail: Option<String>,
}

impl DeliveryAttempt {
    pub fn sent(channel: Channel, destination: String) -> Self {
        Self {
            channel,
            destination,
            outcome: DeliveryOutcome::Sent,
            error_detail: None,
        }
    }

    pub fn failed(channel: Channel, destination: String, detail: impl Into<String>) -> Self {
        Self {
            channel,
            destination,
            outcome: DeliveryOutcome::Failed,
            error_detail: Some(detail.into()),
        }
    }

    pub fn is_sent(&self) -> bool {
        self.outcome == DeliveryOutcome::Sent
    }
}
