//! CSV input of debts and output of trigger plans for the command line tool.

pub mod debt_reader;
pub mod trigger_writer;
