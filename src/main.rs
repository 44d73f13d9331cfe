use chrono::{DateTime, Utc};
use clap::Parser;
use dues_notifier::application::dispatcher::ChannelDispatcher;
use dues_notifier::application::engine::{EnginePorts, ReminderEngine};
use dues_notifier::config::EngineConfig;
use dues_notifier::domain::channel::Channel;
use dues_notifier::domain::ports::{ClockRef, TriggerStoreRef};
use dues_notifier::infrastructure::clock::{ManualClock, SystemClock};
use dues_notifier::infrastructure::in_memory::{
    InMemoryDebtBook, InMemoryNotificationStore, InMemoryTriggerStore, StaticDirectory,
};
use dues_notifier::infrastructure::senders::TracingSender;
use dues_notifier::infrastructure::templates::DefaultTemplates;
use dues_notifier::infrastructure::timer::TokioScheduler;
use dues_notifier::interfaces::csv::debt_reader::DebtReader;
use dues_notifier::interfaces::csv::trigger_writer::TriggerWriter;
use dues_notifier::logging::init_log;
use envconfig::Envconfig;
use miette::{IntoDiagnostic, Result};
use std::fs::File;
use std::io;
use std::path::PathBuf;
use std::sync::Arc;

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Input debts CSV file
    input: PathBuf,

    /// Instant the plan is computed at, RFC 3339 (defaults to now)
    #[arg(long)]
    as_of: Option<DateTime<Utc>>,

    /// Path to persistent trigger database (optional). If provided, uses RocksDB.
    #[arg(long)]
    db_path: Option<PathBuf>,
}

#[cfg(feature = "storage-rocksdb")]
fn open_trigger_store(db_path: Option<PathBuf>) -> Result<TriggerStoreRef> {
    use dues_notifier::infrastructure::rocksdb::RocksDbTriggerStore;

    match db_path {
        Some(path) => Ok(Arc::new(RocksDbTriggerStore::open(path).into_diagnostic()?)),
        None => Ok(Arc::new(InMemoryTriggerStore::new())),
    }
}

#[cfg(not(feature = "storage-rocksdb"))]
fn open_trigger_store(db_path: Option<PathBuf>) -> Result<TriggerStoreRef> {
    if db_path.is_some() {
        eprintln!(
            "WARNING: Persistent storage requested via --db-path, but 'storage-rocksdb' feature is not enabled. Falling back to In-Memory storage."
        );
    }
    Ok(Arc::new(InMemoryTriggerStore::new()))
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = EngineConfig::init_from_env().into_diagnostic()?;
    init_log(config.json_logs());

    let clock: ClockRef = match cli.as_of {
        Some(as_of) => Arc::new(ManualClock::new(as_of)),
        None => Arc::new(SystemClock),
    };
    let triggers = open_trigger_store(cli.db_path)?;
    // Nothing consumes fires here: the tool only plans.
    let (scheduler, _fires) = TokioScheduler::new(clock.clone());
    let book = InMemoryDebtBook::new();

    let mut dispatcher =
        ChannelDispatcher::new(config.dispatch_workers, config.channel_timeout());
    for channel in [
        Channel::Email,
        Channel::Sms,
        Channel::Slack,
        Channel::Telegram,
        Channel::Discord,
    ] {
        dispatcher.register(channel, Arc::new(TracingSender));
    }

    let engine = ReminderEngine::new(
        EnginePorts {
            triggers,
            notifications: Arc::new(InMemoryNotificationStore::new()),
            debts: Arc::new(book.clone()),
            directory: Arc::new(StaticDirectory::new()),
            templates: Arc::new(DefaultTemplates::new()),
            scheduler: Arc::new(scheduler),
            clock,
        },
        dispatcher,
        config.reminder_defaults().into_diagnostic()?,
        config.max_concurrent_fires,
    );
    engine.restore().await.into_diagnostic()?;

    // Plan every debt in the input
    let file = File::open(cli.input).into_diagnostic()?;
    let mut planned = Vec::new();
    for debt in DebtReader::new(file).debts() {
        match debt {
            Ok(terms) => {
                let debt_id = terms.debt_id;
                book.upsert_debt(terms).await;
                match engine.on_debt_created_or_rescheduled(debt_id).await {
                    Ok(_) if !planned.contains(&debt_id) => planned.push(debt_id),
                    Ok(_) => {}
                    Err(e) => eprintln!("Error scheduling debt {}: {}", debt_id, e),
                }
            }
            Err(e) => {
                eprintln!("Error reading debt: {}", e);
            }
        }
    }

    let mut plan = Vec::new();
    for debt_id in planned {
        let mut triggers = engine.triggers_for(debt_id).await.into_diagnostic()?;
        triggers.sort_by_key(|t| (t.key.installment_number, t.fire_at));
        plan.extend(triggers);
    }

    let stdout = io::stdout();
    let mut writer = TriggerWriter::new(stdout.lock());
    writer.write_triggers(&plan).into_diagnostic()?;

    Ok(())
}
