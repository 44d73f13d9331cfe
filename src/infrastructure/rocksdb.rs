use crate::domain::ports::TriggerStore;
use crate::domain::trigger::{JobHandle, ReminderTrigger, TriggerKey, TriggerStatus};
use crate::error::{NotifyError, Result};
use async_trait::async_trait;
use rocksdb::{ColumnFamily, ColumnFamilyDescriptor, DB, Direction, IteratorMode, Options};
use std::path::Path;
use std::sync::Arc;
use tokio::sync::Mutex;
use uuid::Uuid;

/// Column Family holding reminder triggers, keyed by `TriggerKey::to_bytes`.
pub const CF_TRIGGERS: &str = "triggers";

/// A persistent trigger store backed by RocksDB.
///
/// Keys are the fixed-width binary trigger key (debt id, installment, offset),
/// so all triggers of one debt, and of one installment group, are adjacent and
/// can be read with a prefix scan. Values are JSON.
///
/// Status changes are read-modify-write sequences; they run under a single
/// write guard so compare-and-set stays atomic across clones of the store.
#[derive(Clone)]
pub struct RocksDbTriggerStore {
    db: Arc<DB>,
    write_guard: Arc<Mutex<()>>,
}

fn internal(message: String) -> NotifyError {
    NotifyError::InternalError(Box::new(std::io::Error::new(
        std::io::ErrorKind::InvalidData,
        message,
    )))
}

impl RocksDbTriggerStore {
    /// Opens or creates a RocksDB instance at `path`, creating the triggers
    /// column family when missing.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let mut opts = Options::default();
        opts.create_if_missing(true);
        opts.create_missing_column_families(true);

        let cf_triggers = ColumnFamilyDescriptor::new(CF_TRIGGERS, Options::default());
        let db = DB::open_cf_descriptors(&opts, path, vec![cf_triggers])?;

        Ok(Self {
            db: Arc::new(db),
            write_guard: Arc::new(Mutex::new(())),
        })
    }

    fn read(&self, key: &TriggerKey) -> Result<Option<ReminderTrigger>> {
        let cf = self.cf()?;
        match self.db.get_cf(&cf, key.to_bytes())? {
            Some(bytes) => serde_json::from_slice(&bytes)
                .map(Some)
                .map_err(|e| internal(format!("Deserialization error: {e}"))),
            None => Ok(None),
        }
    }

    fn write(&self, trigger: &ReminderTrigger) -> Result<()> {
        let cf = self.cf()?;
        let value = serde_json::to_vec(trigger)
            .map_err(|e| internal(format!("Serialization error: {e}")))?;
        self.db.put_cf(&cf, trigger.key.to_bytes(), value)?;
        Ok(())
    }

    fn scan(&self, prefix: &[u8]) -> Result<Vec<ReminderTrigger>> {
        let cf = self.cf()?;
        let mut triggers = Vec::new();
        let iter = self
            .db
            .iterator_cf(cf, IteratorMode::From(prefix, Direction::Forward));
        for item in iter {
            let (key, value) = item?;
            if !key.starts_with(prefix) {
                break;
            }
            let trigger = serde_json::from_slice(&value)
                .map_err(|e| internal(format!("Failed to deserialize trigger: {e}")))?;
            triggers.push(trigger);
        }
        Ok(triggers)
    }

    fn cf(&self) -> Result<&ColumnFamily> {
        self.db.cf_handle(CF_TRIGGERS).ok_or_else(|| {
            NotifyError::InternalError(Box::new(std::io::Error::other(
                "Triggers column family not found",
            )))
        })
    }
}

#[async_trait]
impl TriggerStore for RocksDbTriggerStore {
    async fn insert(&self, trigger: ReminderTrigger) -> Result<()> {
        let _guard = self.write_guard.lock().await;
        if self.read(&trigger.key)?.is_some() {
            return Err(NotifyError::DuplicateTrigger(trigger.key));
        }
        self.write(&trigger)
    }

    async fn get(&self, key: &TriggerKey) -> Result<Option<ReminderTrigger>> {
        self.read(key)
    }

    async fn group(&self, debt_id: Uuid, installment_number: u32) -> Result<Vec<ReminderTrigger>> {
        self.scan(&TriggerKey::group_prefix(debt_id, installment_number))
    }

    async fn for_debt(&self, debt_id: Uuid) -> Result<Vec<ReminderTrigger>> {
        self.scan(debt_id.as_bytes())
    }

    async fn scheduled(&self) -> Result<Vec<ReminderTrigger>> {
        Ok(self
            .scan(&[])?
            .into_iter()
            .filter(|t| t.status == TriggerStatus::Scheduled)
            .collect())
    }

    async fn compare_and_set_status(
        &self,
        key: &TriggerKey,
        expected: TriggerStatus,
        next: TriggerStatus,
    ) -> Result<bool> {
        let _guard = self.write_guard.lock().await;
        let mut trigger = self
            .read(key)?
            .ok_or_else(|| NotifyError::NotFound(format!("trigger {key}")))?;
        if trigger.status != expected {
            return Ok(false);
        }
        trigger.status = next;
        self.write(&trigger)?;
        Ok(true)
    }

    async fn attach_job(&self, key: &TriggerKey, handle: Option<JobHandle>) -> Result<()> {
        let _guard = self.write_guard.lock().await;
        let mut trigger = self
            .read(key)?
            .ok_or_else(|| NotifyError::NotFound(format!("trigger {key}")))?;
        trigger.job_handle = handle;
        self.write(&trigger)
    }

    async fn reschedule(&self, trigger: &ReminderTrigger) -> Result<bool> {
        let _guard = self.write_guard.lock().await;
        let mut current = self
            .read(&trigger.key)?
            .ok_or_else(|| NotifyError::NotFound(format!("trigger {}", trigger.key)))?;
        if current.status != TriggerStatus::Scheduled {
            return Ok(false);
        }
        current.installment_due_at = trigger.installment_due_at;
        current.scheduled_amount = trigger.scheduled_amount;
        current.fire_at = trigger.fire_at;
        current.channel_set = trigger.channel_set.clone();
        self.write(&current)?;
        Ok(true)
    }
}
