use crate::domain::channel::Channel;
use crate::domain::notification::PaymentPhase;
use crate::domain::trigger::TriggerKey;
use thiserror::Error;
use uuid::Uuid;

#[derive(Error, Debug)]
pub enum NotifyError {
    #[error("Invalid schedule: {0}")]
    InvalidSchedule(String),
    #[error("Trigger already exists: {0}")]
    DuplicateTrigger(TriggerKey),
    #[error("Delivery over {channel} failed: {detail}")]
    Delivery { channel: Channel, detail: String },
    #[error("Trigger {0} is no longer scheduled")]
    StaleTrigger(TriggerKey),
    #[error("Payment {payment_id} cannot move from {from:?} to {to:?}")]
    InvalidTransition {
        payment_id: Uuid,
        from: Option<PaymentPhase>,
        to: PaymentPhase,
    },
    #[error("Not found: {0}")]
    NotFound(String),
    #[error("Template error: {0}")]
    Template(String),
    #[error("Validation error: {0}")]
    ValidationError(String),
    #[error("CSV error: {0}")]
    CsvError(#[from] csv::Error),
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
    #[cfg(feature = "storage-rocksdb")]
    #[error("Storage error: {0}")]
    StorageError(#[from] rocksdb::Error),
    #[error("Internal error: {0}")]
    InternalError(Box<dyn std::error::Error + Send + Sync>),
}

pub type Result<T> = std::result::Result<T, NotifyError>;
