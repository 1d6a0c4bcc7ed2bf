//! Transfer Engine
//!
//! Moves funds between two accounts as one atomic unit: one transfer row,
//! two entry rows and two balance adjustments.
//!
//! # Lock order
//!
//! Balance adjustments always go to the lower account id first, whichever
//! side it is on. Two transfers sharing accounts therefore take the row
//! locks in the same order and cannot wait on each other in a cycle.
//!
//! # Preconditions
//!
//! The caller has already checked that `amount > 0`, that both accounts
//! exist and that their currencies match (see [`super::precheck`]). The
//! engine does not re-validate. A source balance that would go below zero
//! is rejected by the store's balance constraint and aborts the unit.
//!
//! The operation is not idempotent: the same params twice move funds twice.

use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use super::coordinator::TxCoordinator;
use super::error::LedgerError;
use super::models::{
    Account, AddAccountBalanceParams, CreateEntryParams, CreateTransferParams, TransferTxParams,
    TransferTxResult,
};
use super::store::{LedgerQueries, TxBegin};

pub struct TransferEngine<S> {
    coordinator: TxCoordinator<S>,
}

impl<S> Clone for TransferEngine<S> {
    fn clone(&self) -> Self {
        Self {
            coordinator: self.coordinator.clone(),
        }
    }
}

impl<S: TxBegin> TransferEngine<S> {
    pub fn new(coordinator: TxCoordinator<S>) -> Self {
        Self { coordinator }
    }

    /// Engine over `store` with no unit deadline
    pub fn from_store(store: Arc<S>) -> Self {
        Self::new(TxCoordinator::new(store))
    }

    pub fn coordinator(&self) -> &TxCoordinator<S> {
        &self.coordinator
    }

    /// Perform a money transfer from one account to the other
    pub async fn transfer(&self, arg: TransferTxParams) -> Result<TransferTxResult, LedgerError> {
        self.transfer_with_cancel(arg, &CancellationToken::new())
            .await
    }

    /// Like [`Self::transfer`], aborting and rolling back when `cancel` fires
    pub async fn transfer_with_cancel(
        &self,
        arg: TransferTxParams,
        cancel: &CancellationToken,
    ) -> Result<TransferTxResult, LedgerError> {
        let result = self
            .coordinator
            .run_atomic(cancel, move |q| Box::pin(transfer_tx(q, arg)))
            .await?;

        info!(
            transfer_id = result.transfer.id,
            from_account_id = arg.from_account_id,
            to_account_id = arg.to_account_id,
            amount = arg.amount,
            "Transfer committed"
        );
        Ok(result)
    }
}

/// The statements of one transfer, run on an open scope
async fn transfer_tx<Q: LedgerQueries>(
    q: &mut Q,
    arg: TransferTxParams,
) -> Result<TransferTxResult, LedgerError> {
    let transfer = q
        .create_transfer(CreateTransferParams {
            from_account_id: arg.from_account_id,
            to_account_id: arg.to_account_id,
            amount: arg.amount,
        })
        .await?;

    let from_entry = q
        .create_entry(CreateEntryParams {
            account_id: arg.from_account_id,
            amount: -arg.amount,
        })
        .await?;

    let to_entry = q
        .create_entry(CreateEntryParams {
            account_id: arg.to_account_id,
            amount: arg.amount,
        })
        .await?;

    let (from_account, to_account) = if arg.from_account_id < arg.to_account_id {
        add_money(
            q,
            arg.from_account_id,
            -arg.amount,
            arg.to_account_id,
            arg.amount,
        )
        .await?
    } else {
        let (to_account, from_account) = add_money(
            q,
            arg.to_account_id,
            arg.amount,
            arg.from_account_id,
            -arg.amount,
        )
        .await?;
        (from_account, to_account)
    };

    debug!(transfer_id = transfer.id, "Transfer statements applied");

    Ok(TransferTxResult {
        transfer,
        from_account,
        to_account,
        from_entry,
        to_entry,
    })
}

/// Adjust two balances in the given order
async fn add_money<Q: LedgerQueries>(
    q: &mut Q,
    account_id1: i64,
    amount1: i64,
    account_id2: i64,
    amount2: i64,
) -> Result<(Account, Account), LedgerError> {
    let account1 = q
        .add_account_balance(AddAccountBalanceParams {
            id: account_id1,
            amount: amount1,
        })
        .await?;
    let account2 = q
        .add_account_balance(AddAccountBalanceParams {
            id: account_id2,
            amount: amount2,
        })
        .await?;
    Ok((account1, account2))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ledger::memory::MemoryLedger;
    use crate::ledger::models::{CreateAccountParams, Entry, Transfer};
    use async_trait::async_trait;
    use std::sync::Mutex;

    /// Records the order of balance adjustments
    #[derive(Default)]
    struct RecordingTx {
        adjusted: Arc<Mutex<Vec<i64>>>,
    }

    #[async_trait]
    impl LedgerQueries for RecordingTx {
        async fn get_account(&mut self, id: i64) -> Result<Account, LedgerError> {
            Err(LedgerError::AccountNotFound(id))
        }

        async fn create_account(
            &mut self,
            _arg: CreateAccountParams,
        ) -> Result<Account, LedgerError> {
            Err(LedgerError::Database("not supported by RecordingTx".to_string()))
        }

        async fn create_entry(&mut self, arg: CreateEntryParams) -> Result<Entry, LedgerError> {
            Ok(Entry {
                id: 1,
                account_id: arg.account_id,
                amount: arg.amount,
                created_at: chrono::Utc::now(),
            })
        }

        async fn get_entry(&mut self, id: i64) -> Result<Entry, LedgerError> {
            Err(LedgerError::EntryNotFound(id))
        }

        async fn list_entries(&mut self, _account_id: i64) -> Result<Vec<Entry>, LedgerError> {
            Ok(Vec::new())
        }

        async fn create_transfer(
            &mut self,
            arg: CreateTransferParams,
        ) -> Result<Transfer, LedgerError> {
            Ok(Transfer {
                id: 1,
                from_account_id: arg.from_account_id,
                to_account_id: arg.to_account_id,
                amount: arg.amount,
                created_at: chrono::Utc::now(),
            })
        }

        async fn get_transfer(&mut self, id: i64) -> Result<Transfer, LedgerError> {
            Err(LedgerError::TransferNotFound(id))
        }

        async fn add_account_balance(
            &mut self,
            arg: AddAccountBalanceParams,
        ) -> Result<Account, LedgerError> {
            self.adjusted.lock().unwrap().push(arg.id);
            Ok(Account {
                id: arg.id,
                owner: "test".to_string(),
                balance: arg.amount,
                currency: "EUR".to_string(),
                created_at: chrono::Utc::now(),
            })
        }
    }

    async fn adjustment_order(from: i64, to: i64) -> (Vec<i64>, TransferTxResult) {
        let mut tx = RecordingTx::default();
        let result = transfer_tx(
            &mut tx,
            TransferTxParams {
                from_account_id: from,
                to_account_id: to,
                amount: 5,
            },
        )
        .await
        .unwrap();
        let order = tx.adjusted.lock().unwrap().clone();
        (order, result)
    }

    #[tokio::test]
    async fn test_lower_id_adjusted_first() {
        let (order, result) = adjustment_order(3, 8).await;
        assert_eq!(order, vec![3, 8]);
        assert_eq!(result.from_account.id, 3);
        assert_eq!(result.to_account.id, 8);

        let (order, result) = adjustment_order(8, 3).await;
        assert_eq!(order, vec![3, 8]);
        // Result sides stay logical, not lock order
        assert_eq!(result.from_account.id, 8);
        assert_eq!(result.from_account.balance, -5);
        assert_eq!(result.to_account.id, 3);
        assert_eq!(result.to_account.balance, 5);
    }

    #[tokio::test]
    async fn test_recording_tx_refuses_unused_queries() {
        let mut tx = RecordingTx::default();
        let err = tx
            .create_account(CreateAccountParams {
                owner: "x".to_string(),
                balance: 0,
                currency: "EUR".to_string(),
            })
            .await
            .unwrap_err();
        assert_eq!(err.code(), "DATABASE_ERROR");
        assert!(tx.adjusted.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_scenario_transfer_30() {
        let ledger = MemoryLedger::new();
        let a = ledger.seed_account("alice", 100, "EUR").await;
        let b = ledger.seed_account("bob", 50, "EUR").await;
        let engine = TransferEngine::from_store(Arc::new(ledger.clone()));

        let result = engine
            .transfer(TransferTxParams {
                from_account_id: a.id,
                to_account_id: b.id,
                amount: 30,
            })
            .await
            .unwrap();

        assert_eq!(result.from_account.balance, 70);
        assert_eq!(result.to_account.balance, 80);
        assert_eq!(result.transfer.from_account_id, a.id);
        assert_eq!(result.transfer.to_account_id, b.id);
        assert_eq!(result.transfer.amount, 30);
        assert_eq!(result.from_entry.account_id, a.id);
        assert_eq!(result.from_entry.amount, -30);
        assert_eq!(result.to_entry.account_id, b.id);
        assert_eq!(result.to_entry.amount, 30);
        assert_eq!(result.entry_sum(), 0);

        assert_eq!(ledger.account(a.id).unwrap().balance, 70);
        assert_eq!(ledger.account(b.id).unwrap().balance, 80);
        assert_eq!(ledger.transfers(), vec![result.transfer.clone()]);
        assert_eq!(
            ledger.entries(),
            vec![result.from_entry.clone(), result.to_entry.clone()]
        );
    }

    #[tokio::test]
    async fn test_transfer_is_not_idempotent() {
        let ledger = MemoryLedger::new();
        let a = ledger.seed_account("alice", 100, "EUR").await;
        let b = ledger.seed_account("bob", 50, "EUR").await;
        let engine = TransferEngine::from_store(Arc::new(ledger.clone()));
        let arg = TransferTxParams {
            from_account_id: a.id,
            to_account_id: b.id,
            amount: 10,
        };

        let first = engine.transfer(arg).await.unwrap();
        let second = engine.transfer(arg).await.unwrap();

        assert_ne!(first.transfer.id, second.transfer.id);
        assert_eq!(ledger.account(a.id).unwrap().balance, 80);
        assert_eq!(ledger.account(b.id).unwrap().balance, 70);
    }

    #[tokio::test]
    async fn test_overdraft_aborts_unit() {
        let ledger = MemoryLedger::new();
        let a = ledger.seed_account("alice", 20, "EUR").await;
        let b = ledger.seed_account("bob", 50, "EUR").await;
        let engine = TransferEngine::from_store(Arc::new(ledger.clone()));

        let err = engine
            .transfer(TransferTxParams {
                from_account_id: a.id,
                to_account_id: b.id,
                amount: 21,
            })
            .await
            .unwrap_err();

        assert_eq!(
            err,
            LedgerError::Constraint("accounts_balance_check".to_string())
        );
        assert!(ledger.transfers().is_empty());
        assert!(ledger.entries().is_empty());
        assert_eq!(ledger.account(a.id).unwrap().balance, 20);
        assert_eq!(ledger.account(b.id).unwrap().balance, 50);
    }

    #[tokio::test]
    async fn test_unknown_destination_aborts_unit() {
        let ledger = MemoryLedger::new();
        let a = ledger.seed_account("alice", 100, "EUR").await;
        let engine = TransferEngine::from_store(Arc::new(ledger.clone()));

        let err = engine
            .transfer(TransferTxParams {
                from_account_id: a.id,
                to_account_id: 404,
                amount: 10,
            })
            .await
            .unwrap_err();

        assert_eq!(err.code(), "CONSTRAINT_VIOLATION");
        assert!(ledger.transfers().is_empty());
        assert_eq!(ledger.account(a.id).unwrap().balance, 100);
    }

    #[tokio::test]
    async fn test_cancelled_token_moves_nothing() {
        let ledger = MemoryLedger::new();
        let a = ledger.seed_account("alice", 100, "EUR").await;
        let b = ledger.seed_account("bob", 50, "EUR").await;
        let engine = TransferEngine::from_store(Arc::new(ledger.clone()));
        let cancel = CancellationToken::new();
        cancel.cancel();

        let err = engine
            .transfer_with_cancel(
                TransferTxParams {
                    from_account_id: a.id,
                    to_account_id: b.id,
                    amount: 10,
                },
                &cancel,
            )
            .await
            .unwrap_err();

        assert_eq!(err, LedgerError::Cancelled);
        assert!(ledger.transfers().is_empty());
    }
}
