//! Application layer: settlement orchestration over the domain ports.
//!
//! `SettlementEngine` is the entry point. It composes the ledger writer, the
//! idempotency gate, the payout saga and the notification dispatcher.

pub mod engine;
pub mod gate;
pub mod ledger;
pub mod notifier;
pub mod payout;
