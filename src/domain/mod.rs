//! Domain types and the ports the settlement core depends on.

pub mod account;
pub mod fee;
pub mod ledger;
pub mod lock;
pub mod ports;
pub mod transaction;
