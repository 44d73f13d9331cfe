use crate::domain::channel::ChannelSet;
use crate::domain::trigger::{DayOffsets, ReminderDefaults};
use crate::error::{NotifyError, Result};
use chrono::NaiveTime;
use envconfig::Envconfig;
use std::time::Duration;

/// Process-level settings, read from `DUES_*` environment variables.
#[derive(Envconfig, Clone, Debug)]
pub struct EngineConfig {
    #[envconfig(from = "DUES_REMINDER_OFFSETS", default = "7,3,1")]
    pub reminder_offsets: String,
    #[envconfig(from = "DUES_OVERDUE_FOLLOW_UPS", default = "")]
    pub overdue_follow_ups: String,
    #[envconfig(from = "DUES_SEND_TIME", default = "09:00:00")]
    pub send_time: String,
    #[envconfig(from = "DUES_CHANNELS", default = "email")]
    pub channels: String,
    #[envconfig(from = "DUES_DISPATCH_WORKERS", default = "16")]
    pub dispatch_workers: usize,
    #[envconfig(from = "DUES_MAX_CONCURRENT_FIRES", default = "64")]
    pub max_concurrent_fires: usize,
    #[envconfig(from = "DUES_CHANNEL_TIMEOUT_MS", default = "10000")]
    pub channel_timeout_ms: u64,
    // "json" switches the log output to structured lines
    #[envconfig(from = "DUES_LOG_FORMAT")]
    pub log_format: Option<String>,
}

impl EngineConfig {
    /// Account-level reminder defaults described by this configuration.
    pub fn reminder_defaults(&self) -> Result<ReminderDefaults> {
        let send_time = NaiveTime::parse_from_str(&self.send_time, "%H:%M:%S")
            .or_else(|_| NaiveTime::parse_from_str(&self.send_time, "%H:%M"))
            .map_err(|_| {
                NotifyError::ValidationError(format!(
                    "'{}' is not a time of day",
                    self.send_time
                ))
            })?;
        let channels: ChannelSet = self.channels.parse()?;
        if channels.is_empty() {
            return Err(NotifyError::ValidationError(
                "at least one reminder channel is required".to_string(),
            ));
        }
        Ok(ReminderDefaults {
            offsets: self.reminder_offsets.parse::<DayOffsets>()?,
            overdue_follow_ups: self.overdue_follow_ups.parse::<DayOffsets>()?,
            send_time,
            channels,
        })
    }

    pub fn channel_timeout(&self) -> Duration {
        Duration::from_millis(self.channel_timeout_ms)
    }

    pub fn json_logs(&self) -> bool {
        matches!(
            self.log_format.as_deref().map(str::to_ascii_lowercase).as_deref(),
            Some("json" | "structured")
        )
    }
}
