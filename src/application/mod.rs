//! Application layer: the reminder engine and the services it is built from.
//!
//! `ReminderEngine` is the entry point. It materializes triggers through the
//! `TriggerMaterializer`, checks settlement through the `SuppressionGate`
//! on both the fire path and the payment path, and hands deliveries to the
//! `ChannelDispatcher`. Payment lifecycle notifications go through the
//! `EventNotifier`.

pub mod dispatcher;
pub mod engine;
pub mod gate;
pub mod materializer;
pub mod notifier;
