//! In-memory ledger store
//!
//! Behaves like the Postgres store at the transaction boundary:
//! - `add_account_balance` takes an exclusive per-account lock and keeps it
//!   until the scope commits or rolls back
//! - writes are staged in the scope and published only on commit
//! - id sequences are not rolled back
//! - the same CHECK and FK constraints as `migrations/0001_ledger.sql`
//!
//! A lock wait longer than `lock_timeout` fails with `Deadlock` instead of
//! hanging, which is what Postgres' deadlock detector does for a real cycle.

use async_trait::async_trait;
use chrono::Utc;
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicI64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::sync::OwnedMutexGuard;
use tracing::{debug, warn};

use super::error::LedgerError;
use super::models::{
    Account, AddAccountBalanceParams, CreateAccountParams, CreateEntryParams,
    CreateTransferParams, Entry, Transfer,
};
use super::store::{AccountLookup, LedgerQueries, LedgerTx, TxBegin};

pub const DEFAULT_LOCK_TIMEOUT: Duration = Duration::from_secs(5);

const BALANCE_CHECK: &str = "accounts_balance_check";
const ENTRY_ACCOUNT_FK: &str = "entries_account_id_fkey";
const TRANSFER_FROM_FK: &str = "transfers_from_account_id_fkey";
const TRANSFER_TO_FK: &str = "transfers_to_account_id_fkey";
const TRANSFER_AMOUNT_CHECK: &str = "transfers_amount_check";

/// Operations that can be made to fail in tests
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FailPoint {
    CreateTransfer,
    CreateEntry,
    AddAccountBalance,
    Commit,
    Rollback,
}

#[derive(Default)]
struct Tables {
    accounts: BTreeMap<i64, Account>,
    entries: BTreeMap<i64, Entry>,
    transfers: BTreeMap<i64, Transfer>,
}

struct Shared {
    tables: Mutex<Tables>,
    row_locks: Mutex<HashMap<i64, Arc<tokio::sync::Mutex<()>>>>,
    account_seq: AtomicI64,
    entry_seq: AtomicI64,
    transfer_seq: AtomicI64,
    lock_timeout: Duration,
    commits: AtomicUsize,
    rollbacks: AtomicUsize,
    #[cfg(test)]
    faults: Mutex<faults::Faults>,
}

impl Shared {
    fn tables(&self) -> MutexGuard<'_, Tables> {
        self.tables.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn row_lock(&self, id: i64) -> Arc<tokio::sync::Mutex<()>> {
        let mut locks = self.row_locks.lock().unwrap_or_else(PoisonError::into_inner);
        locks.entry(id).or_default().clone()
    }

    #[cfg(test)]
    fn check_fault(&self, point: FailPoint) -> Result<(), LedgerError> {
        self.faults
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .hit(point)
    }

    #[cfg(not(test))]
    #[inline]
    fn check_fault(&self, _point: FailPoint) -> Result<(), LedgerError> {
        Ok(())
    }
}

/// In-process ledger with Postgres-like transaction semantics
#[derive(Clone)]
pub struct MemoryLedger {
    shared: Arc<Shared>,
}

impl Default for MemoryLedger {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryLedger {
    pub fn new() -> Self {
        Self::with_lock_timeout(DEFAULT_LOCK_TIMEOUT)
    }

    pub fn with_lock_timeout(lock_timeout: Duration) -> Self {
        Self {
            shared: Arc::new(Shared {
                tables: Mutex::new(Tables::default()),
                row_locks: Mutex::new(HashMap::new()),
                account_seq: AtomicI64::new(0),
                entry_seq: AtomicI64::new(0),
                transfer_seq: AtomicI64::new(0),
                lock_timeout,
                commits: AtomicUsize::new(0),
                rollbacks: AtomicUsize::new(0),
                #[cfg(test)]
                faults: Mutex::new(faults::Faults::default()),
            }),
        }
    }

    /// Committed state of one account
    pub fn account(&self, id: i64) -> Option<Account> {
        self.shared.tables().accounts.get(&id).cloned()
    }

    /// All committed transfers, in id order
    pub fn transfers(&self) -> Vec<Transfer> {
        self.shared.tables().transfers.values().cloned().collect()
    }

    /// All committed entries, in id order
    pub fn entries(&self) -> Vec<Entry> {
        self.shared.tables().entries.values().cloned().collect()
    }

    pub fn commit_count(&self) -> usize {
        self.shared.commits.load(Ordering::SeqCst)
    }

    pub fn rollback_count(&self) -> usize {
        self.shared.rollbacks.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl TxBegin for MemoryLedger {
    type Tx = MemoryTx;

    async fn begin(&self) -> Result<MemoryTx, LedgerError> {
        Ok(MemoryTx {
            shared: self.shared.clone(),
            held: HashMap::new(),
            accounts: BTreeMap::new(),
            entries: Vec::new(),
            transfers: Vec::new(),
        })
    }
}

#[async_trait]
impl AccountLookup for MemoryLedger {
    async fn get_account(&self, id: i64) -> Result<Account, LedgerError> {
        self.account(id).ok_or(LedgerError::AccountNotFound(id))
    }
}

/// One open scope on a [`MemoryLedger`]. Dropping it without commit discards
/// staged writes and releases its row locks.
pub struct MemoryTx {
    shared: Arc<Shared>,
    held: HashMap<i64, OwnedMutexGuard<()>>,
    accounts: BTreeMap<i64, Account>,
    entries: Vec<Entry>,
    transfers: Vec<Transfer>,
}

impl MemoryTx {
    /// Own view of an account: staged row first, then committed
    fn visible_account(&self, id: i64) -> Option<Account> {
        self.accounts
            .get(&id)
            .cloned()
            .or_else(|| self.shared.tables().accounts.get(&id).cloned())
    }

    async fn lock_row(&mut self, id: i64) -> Result<(), LedgerError> {
        if self.held.contains_key(&id) {
            return Ok(());
        }
        let lock = self.shared.row_lock(id);
        let guard = tokio::time::timeout(self.shared.lock_timeout, lock.lock_owned())
            .await
            .map_err(|_| {
                warn!(account_id = id, "Row lock wait timed out");
                LedgerError::Deadlock(format!("lock wait on account {} timed out", id))
            })?;
        self.held.insert(id, guard);
        Ok(())
    }
}

#[async_trait]
impl LedgerQueries for MemoryTx {
    async fn get_account(&mut self, id: i64) -> Result<Account, LedgerError> {
        self.visible_account(id)
            .ok_or(LedgerError::AccountNotFound(id))
    }

    async fn create_account(&mut self, arg: CreateAccountParams) -> Result<Account, LedgerError> {
        if arg.balance < 0 {
            return Err(LedgerError::Constraint(BALANCE_CHECK.to_string()));
        }
        let account = Account {
            id: self.shared.account_seq.fetch_add(1, Ordering::SeqCst) + 1,
            owner: arg.owner,
            balance: arg.balance,
            currency: arg.currency,
            created_at: Utc::now(),
        };
        self.accounts.insert(account.id, account.clone());
        Ok(account)
    }

    async fn create_entry(&mut self, arg: CreateEntryParams) -> Result<Entry, LedgerError> {
        self.shared.check_fault(FailPoint::CreateEntry)?;
        if self.visible_account(arg.account_id).is_none() {
            return Err(LedgerError::Constraint(ENTRY_ACCOUNT_FK.to_string()));
        }
        let entry = Entry {
            id: self.shared.entry_seq.fetch_add(1, Ordering::SeqCst) + 1,
            account_id: arg.account_id,
            amount: arg.amount,
            created_at: Utc::now(),
        };
        self.entries.push(entry.clone());
        Ok(entry)
    }

    async fn get_entry(&mut self, id: i64) -> Result<Entry, LedgerError> {
        if let Some(entry) = self.entries.iter().find(|e| e.id == id) {
            return Ok(entry.clone());
        }
        self.shared
            .tables()
            .entries
            .get(&id)
            .cloned()
            .ok_or(LedgerError::EntryNotFound(id))
    }

    async fn list_entries(&mut self, account_id: i64) -> Result<Vec<Entry>, LedgerError> {
        let mut entries: Vec<Entry> = self
            .shared
            .tables()
            .entries
            .values()
            .filter(|e| e.account_id == account_id)
            .cloned()
            .collect();
        entries.extend(
            self.entries
                .iter()
                .filter(|e| e.account_id == account_id)
                .cloned(),
        );
        entries.sort_by_key(|e| e.id);
        Ok(entries)
    }

    async fn create_transfer(
        &mut self,
        arg: CreateTransferParams,
    ) -> Result<Transfer, LedgerError> {
        self.shared.check_fault(FailPoint::CreateTransfer)?;
        if arg.amount <= 0 {
            return Err(LedgerError::Constraint(TRANSFER_AMOUNT_CHECK.to_string()));
        }
        if self.visible_account(arg.from_account_id).is_none() {
            return Err(LedgerError::Constraint(TRANSFER_FROM_FK.to_string()));
        }
        if self.visible_account(arg.to_account_id).is_none() {
            return Err(LedgerError::Constraint(TRANSFER_TO_FK.to_string()));
        }
        let transfer = Transfer {
            id: self.shared.transfer_seq.fetch_add(1, Ordering::SeqCst) + 1,
            from_account_id: arg.from_account_id,
            to_account_id: arg.to_account_id,
            amount: arg.amount,
            created_at: Utc::now(),
        };
        self.transfers.push(transfer.clone());
        Ok(transfer)
    }

    async fn get_transfer(&mut self, id: i64) -> Result<Transfer, LedgerError> {
        if let Some(transfer) = self.transfers.iter().find(|t| t.id == id) {
            return Ok(transfer.clone());
        }
        self.shared
            .tables()
            .transfers
            .get(&id)
            .cloned()
            .ok_or(LedgerError::TransferNotFound(id))
    }

    async fn add_account_balance(
        &mut self,
        arg: AddAccountBalanceParams,
    ) -> Result<Account, LedgerError> {
        self.shared.check_fault(FailPoint::AddAccountBalance)?;
        // UPDATE on a missing row matches nothing and takes no lock
        if self.visible_account(arg.id).is_none() {
            return Err(LedgerError::AccountNotFound(arg.id));
        }
        self.lock_row(arg.id).await?;

        // Re-read under the lock: no other scope can publish this row now
        let mut account = self
            .visible_account(arg.id)
            .ok_or(LedgerError::AccountNotFound(arg.id))?;
        let balance = account
            .balance
            .checked_add(arg.amount)
            .ok_or_else(|| LedgerError::Database("bigint out of range".to_string()))?;
        if balance < 0 {
            return Err(LedgerError::Constraint(BALANCE_CHECK.to_string()));
        }
        account.balance = balance;
        self.accounts.insert(account.id, account.clone());
        Ok(account)
    }
}

#[async_trait]
impl LedgerTx for MemoryTx {
    async fn commit(self) -> Result<(), LedgerError> {
        self.shared.check_fault(FailPoint::Commit)?;
        {
            let mut tables = self.shared.tables();
            tables.accounts.extend(self.accounts);
            tables
                .entries
                .extend(self.entries.into_iter().map(|e| (e.id, e)));
            tables
                .transfers
                .extend(self.transfers.into_iter().map(|t| (t.id, t)));
        }
        self.shared.commits.fetch_add(1, Ordering::SeqCst);
        debug!(locks = self.held.len(), "Memory tx committed");
        // Row locks are released here, after the writes are visible
        drop(self.held);
        Ok(())
    }

    async fn rollback(self) -> Result<(), LedgerError> {
        self.shared.check_fault(FailPoint::Rollback)?;
        self.shared.rollbacks.fetch_add(1, Ordering::SeqCst);
        debug!(locks = self.held.len(), "Memory tx rolled back");
        Ok(())
    }
}


#[cfg(test)]
impl MemoryLedger {
    /// Make the nth call of `point` fail with a `Database` error
    pub fn fail_at(&self, point: FailPoint, nth: usize) {
        self.shared
            .faults
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .arm(point, nth);
    }

    /// Create and commit an account
    pub async fn seed_account(&self, owner: &str, balance: i64, currency: &str) -> Account {
        let mut tx = self.begin().await.unwrap();
        let account = tx
            .create_account(CreateAccountParams {
                owner: owner.to_string(),
                balance,
                currency: currency.to_string(),
            })
            .await
            .unwrap();
        tx.commit().await.unwrap();
        account
    }
}
