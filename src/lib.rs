//! Atomic Ledger - account balances backed by an append-only ledger
//!
//! Funds move between two accounts as one atomic unit: a transfer row, two
//! entry rows and two balance adjustments, all committed together or not at
//! all, without deadlocks between concurrent transfers.
//!
//! # Modules
//!
//! - [`ledger`] - Store capabilities, transaction coordinator, transfer engine
//! - [`db`] - PostgreSQL connection pool
//! - [`config`] - YAML configuration
//! - [`logging`] - tracing subscriber setup

pub mod config;
pub mod db;
pub mod ledger;
pub mod logging;

// Convenient re-exports at crate root
pub use ledger::{
    Account, Entry, LedgerError, MemoryLedger, PgLedgerStore, Transfer, TransferEngine,
    TransferTxParams, TransferTxResult, TxCoordinator,
};
