//! CSV adapters for the replay CLI: events in, account balances out.

pub mod account_writer;
pub mod event_reader;
