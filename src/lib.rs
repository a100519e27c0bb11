//! Community crowdfunding ledger.
//!
//! * [`ledger`]: projects, donations and creator withdrawals, with the
//!   accounting rules and event log.
//! * [`chain`]: a serialized transaction environment around the ledger,
//!   holding wallets, block metadata and receipts.
//! * [`catalog`]: listing, filtering, history and dashboard views.
//! * [`units`]: ether/wei conversion.
//! * [`store`] and [`config`]: persistence and runtime settings for the
//!   binaries.

#![forbid(unsafe_code)]

pub mod catalog;
pub mod chain;
pub mod config;
pub mod ledger;
pub mod store;
pub mod units;

pub use chain::{Chain, ChainError, Receipt, Transaction};
pub use ledger::{
    Address, Amount, ErrorKind, Ledger, LedgerError, LedgerEvent, NewProject, Payee, Project,
    ProjectId, Timestamp,
};
