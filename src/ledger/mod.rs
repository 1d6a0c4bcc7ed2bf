//! Ledger transfer core
//!
//! Moves funds between two accounts as one atomic unit.
//!
//! # Architecture
//!
//! ```text
//! caller ──▶ TransferEngine ──▶ TxCoordinator ──▶ TxBegin::begin
//!                                     │
//!                               LedgerQueries × 5 (one scope)
//!                                     │
//!                              commit / rollback
//! ```
//!
//! - [`store`]: capability traits. Queries run on an explicit scope handle.
//! - [`coordinator`]: begin, run, commit or roll back, combine errors.
//! - [`engine`]: transfer + two entries + two balance adjustments in
//!   ascending account-id order.
//! - [`pg`] / [`memory`]: PostgreSQL and in-process stores.
//! - [`precheck`]: request-layer validation the engine relies on.
//!
//! # Safety Invariants
//!
//! 1. **All or nothing**: no transfer, entry or balance change of a failed
//!    unit is ever visible
//! 2. **Fixed lock order**: the lower account id is always adjusted first
//! 3. **No read-modify-write in callers**: balances change only through
//!    `add_account_balance`
//! 4. **No hidden failures**: a failed rollback is reported together with
//!    the error that caused it

pub mod coordinator;
pub mod engine;
pub mod error;
pub mod memory;
pub mod models;
pub mod pg;
pub mod precheck;
pub mod store;


// Re-exports for convenience
pub use coordinator::TxCoordinator;
pub use engine::TransferEngine;
pub use error::LedgerError;
pub use memory::MemoryLedger;
pub use models::{Account, Entry, Transfer, TransferTxParams, TransferTxResult};
pub use pg::PgLedgerStore;
pub use precheck::{TransferRequest, check_transfer};
pub use store::{AccountLookup, LedgerQueries, LedgerTx, TxBegin};
