//! Store capabilities
//!
//! Two separate seams:
//! - [`LedgerQueries`]: the query set, always bound to one transactional scope
//! - [`TxBegin`] / [`LedgerTx`]: opening a scope and finishing it
//!
//! There is no ambient connection. Every query runs on the handle it is
//! called on, so a query can only ever join the unit that owns that handle.

use async_trait::async_trait;

use super::error::LedgerError;
use super::models::{
    Account, AddAccountBalanceParams, CreateAccountParams, CreateEntryParams,
    CreateTransferParams, Entry, Transfer,
};

/// Ledger queries within one transactional scope
#[async_trait]
pub trait LedgerQueries: Send {
    async fn get_account(&mut self, id: i64) -> Result<Account, LedgerError>;

    async fn create_account(&mut self, arg: CreateAccountParams) -> Result<Account, LedgerError>;

    /// Append one immutable entry row. `amount` may be negative.
    async fn create_entry(&mut self, arg: CreateEntryParams) -> Result<Entry, LedgerError>;

    async fn get_entry(&mut self, id: i64) -> Result<Entry, LedgerError>;

    /// Entries of one account, oldest first
    async fn list_entries(&mut self, account_id: i64) -> Result<Vec<Entry>, LedgerError>;

    /// Append one immutable transfer row
    async fn create_transfer(
        &mut self,
        arg: CreateTransferParams,
    ) -> Result<Transfer, LedgerError>;

    async fn get_transfer(&mut self, id: i64) -> Result<Transfer, LedgerError>;

    /// `balance = balance + amount` as one storage-level read-modify-write.
    ///
    /// Takes the exclusive row lock on the account and keeps it until the
    /// enclosing scope commits or rolls back. Returns the post-update row.
    async fn add_account_balance(
        &mut self,
        arg: AddAccountBalanceParams,
    ) -> Result<Account, LedgerError>;
}

/// An open transactional scope
#[async_trait]
pub trait LedgerTx: LedgerQueries + Sized {
    async fn commit(self) -> Result<(), LedgerError>;

    async fn rollback(self) -> Result<(), LedgerError>;
}

/// Something that can open a transactional scope
#[async_trait]
pub trait TxBegin: Send + Sync {
    type Tx: LedgerTx + 'static;

    async fn begin(&self) -> Result<Self::Tx, LedgerError>;
}

/// Account lookup outside any unit, for the request layer's prechecks
#[async_trait]
pub trait AccountLookup: Send + Sync {
    async fn get_account(&self, id: i64) -> Result<Account, LedgerError>;
}
