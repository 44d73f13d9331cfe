//! Domain types and the ports the engine talks to collaborators through.

pub mod channel;
pub mod debt;
pub mod money;
pub mod notification;
pub mod ports;
pub mod schedule;
pub mod template;
pub mod trigger;
