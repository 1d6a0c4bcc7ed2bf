//! PostgreSQL ledger store
//!
//! Schema: `migrations/0001_ledger.sql`. Balance adjustment is a single
//! `UPDATE ... SET balance = balance + $1 ... RETURNING`, so the row lock is
//! taken by the statement itself and held until the transaction ends.

use async_trait::async_trait;
use sqlx::{PgPool, Postgres, Transaction};

use super::error::LedgerError;
use super::models::{
    Account, AddAccountBalanceParams, CreateAccountParams, CreateEntryParams,
    CreateTransferParams, Entry, Transfer,
};
use super::store::{AccountLookup, LedgerQueries, LedgerTx, TxBegin};

const SELECT_ACCOUNT: &str = "SELECT id, owner, balance, currency, created_at FROM accounts WHERE id = $1";

#[derive(Clone)]
pub struct PgLedgerStore {
    pool: PgPool,
}

impl PgLedgerStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

#[async_trait]
impl TxBegin for PgLedgerStore {
    type Tx = PgLedgerTx;

    async fn begin(&self) -> Result<PgLedgerTx, LedgerError> {
        let tx = self.pool.begin().await?;
        Ok(PgLedgerTx { tx })
    }
}

#[async_trait]
impl AccountLookup for PgLedgerStore {
    async fn get_account(&self, id: i64) -> Result<Account, LedgerError> {
        sqlx::query_as::<_, Account>(SELECT_ACCOUNT)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?
            .ok_or(LedgerError::AccountNotFound(id))
    }
}

/// Open Postgres transaction. Dropped without commit, it rolls back.
pub struct PgLedgerTx {
    tx: Transaction<'static, Postgres>,
}

#[async_trait]
impl LedgerTx for PgLedgerTx {
    async fn commit(self) -> Result<(), LedgerError> {
        self.tx.commit().await?;
        Ok(())
    }

    async fn rollback(self) -> Result<(), LedgerError> {
        self.tx.rollback().await?;
        Ok(())
    }
}

#[async_trait]
impl LedgerQueries for PgLedgerTx {
    async fn get_account(&mut self, id: i64) -> Result<Account, LedgerError> {
        sqlx::query_as::<_, Account>(SELECT_ACCOUNT)
            .bind(id)
            .fetch_optional(&mut *self.tx)
            .await?
            .ok_or(LedgerError::AccountNotFound(id))
    }

    async fn create_account(&mut self, arg: CreateAccountParams) -> Result<Account, LedgerError> {
        let account = sqlx::query_as::<_, Account>(
            r#"
            INSERT INTO accounts (owner, balance, currency)
            VALUES ($1, $2, $3)
            RETURNING id, owner, balance, currency, created_at
            "#,
        )
        .bind(&arg.owner)
        .bind(arg.balance)
        .bind(&arg.currency)
        .fetch_one(&mut *self.tx)
        .await?;
        Ok(account)
    }

    async fn create_entry(&mut self, arg: CreateEntryParams) -> Result<Entry, LedgerError> {
        let entry = sqlx::query_as::<_, Entry>(
            r#"
            INSERT INTO entries (account_id, amount)
            VALUES ($1, $2)
            RETURNING id, account_id, amount, created_at
            "#,
        )
        .bind(arg.account_id)
        .bind(arg.amount)
        .fetch_one(&mut *self.tx)
        .await?;
        Ok(entry)
    }

    async fn get_entry(&mut self, id: i64) -> Result<Entry, LedgerError> {
        sqlx::query_as::<_, Entry>(
            "SELECT id, account_id, amount, created_at FROM entries WHERE id = $1",
        )
        .bind(id)
        .fetch_optional(&mut *self.tx)
        .await?
        .ok_or(LedgerError::EntryNotFound(id))
    }

    async fn list_entries(&mut self, account_id: i64) -> Result<Vec<Entry>, LedgerError> {
        let entries = sqlx::query_as::<_, Entry>(
            r#"
            SELECT id, account_id, amount, created_at FROM entries
            WHERE account_id = $1
            ORDER BY id
            "#,
        )
        .bind(account_id)
        .fetch_all(&mut *self.tx)
        .await?;
        Ok(entries)
    }

    async fn create_transfer(
        &mut self,
        arg: CreateTransferParams,
    ) -> Result<Transfer, LedgerError> {
        let transfer = sqlx::query_as::<_, Transfer>(
            r#"
            INSERT INTO transfers (from_account_id, to_account_id, amount)
            VALUES ($1, $2, $3)
            RETURNING id, from_account_id, to_account_id, amount, created_at
            "#,
        )
        .bind(arg.from_account_id)
        .bind(arg.to_account_id)
        .bind(arg.amount)
        .fetch_one(&mut *self.tx)
        .await?;
        Ok(transfer)
    }

    async fn get_transfer(&mut self, id: i64) -> Result<Transfer, LedgerError> {
        sqlx::query_as::<_, Transfer>(
            r#"
            SELECT id, from_account_id, to_account_id, amount, created_at
            FROM transfers WHERE id = $1
            "#,
        )
        .bind(id)
        .fetch_optional(&mut *self.tx)
        .await?
        .ok_or(LedgerError::TransferNotFound(id))
    }

    async fn add_account_balance(
        &mut self,
        arg: AddAccountBalanceParams,
    ) -> Result<Account, LedgerError> {
        sqlx::query_as::<_, Account>(
            r#"
            UPDATE accounts SET balance = balance + $1
            WHERE id = $2
            RETURNING id, owner, balance, currency, created_at
            "#,
        )
        .bind(arg.amount)
        .bind(arg.id)
        .fetch_optional(&mut *self.tx)
        .await?
        .ok_or(LedgerError::AccountNotFound(arg.id))
    }
}
