//! Ledger Error Types
//!
//! One error type for the store, the coordinator and the transfer engine.
//! Messages from the driver are captured as strings so the error stays
//! `Clone` and can be nested inside a combined rollback failure.

use thiserror::Error;

/// SQLSTATE for `deadlock_detected`
const PG_DEADLOCK_DETECTED: &str = "40P01";
/// SQLSTATE for `serialization_failure`
const PG_SERIALIZATION_FAILURE: &str = "40001";

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum LedgerError {
    // === Lookup Errors ===
    #[error("Account not found: {0}")]
    AccountNotFound(i64),

    #[error("Entry not found: {0}")]
    EntryNotFound(i64),

    #[error("Transfer not found: {0}")]
    TransferNotFound(i64),

    // === Store Failures ===
    #[error("Constraint violation: {0}")]
    Constraint(String),

    #[error("Deadlock detected: {0}")]
    Deadlock(String),

    #[error("Database error: {0}")]
    Database(String),

    // === Unit Failures ===
    #[error("tx err: {tx}, rb err: {rollback}")]
    Rollback {
        tx: Box<LedgerError>,
        rollback: Box<LedgerError>,
    },

    #[error("Commit failed: {0}")]
    Commit(Box<LedgerError>),

    #[error("Operation cancelled")]
    Cancelled,

    #[error("Transaction deadline exceeded")]
    Timeout,

    // === Caller-layer precheck ===
    #[error("Amount must be greater than zero")]
    InvalidAmount,

    #[error("Source and destination accounts are the same")]
    SameAccount,

    #[error("Account {account_id} currency mismatch: {actual} vs {expected}")]
    CurrencyMismatch {
        account_id: i64,
        expected: String,
        actual: String,
    },

    #[error("Insufficient balance")]
    InsufficientBalance,
}

impl LedgerError {
    /// Stable error code for callers mapping failures onto their own surface
    pub fn code(&self) -> &'static str {
        match self {
            LedgerError::AccountNotFound(_) => "ACCOUNT_NOT_FOUND",
            LedgerError::EntryNotFound(_) => "ENTRY_NOT_FOUND",
            LedgerError::TransferNotFound(_) => "TRANSFER_NOT_FOUND",
            LedgerError::Constraint(_) => "CONSTRAINT_VIOLATION",
            LedgerError::Deadlock(_) => "DEADLOCK",
            LedgerError::Database(_) => "DATABASE_ERROR",
            LedgerError::Rollback { .. } => "ROLLBACK_FAILED",
            LedgerError::Commit(_) => "COMMIT_FAILED",
            LedgerError::Cancelled => "CANCELLED",
            LedgerError::Timeout => "TIMEOUT",
            LedgerError::InvalidAmount => "INVALID_AMOUNT",
            LedgerError::SameAccount => "SAME_ACCOUNT",
            LedgerError::CurrencyMismatch { .. } => "CURRENCY_MISMATCH",
            LedgerError::InsufficientBalance => "INSUFFICIENT_BALANCE",
        }
    }

    /// True for lookups that did not resolve
    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            LedgerError::AccountNotFound(_)
                | LedgerError::EntryNotFound(_)
                | LedgerError::TransferNotFound(_)
        )
    }

    /// The failure that aborted the unit, looking through rollback wrapping
    pub fn root(&self) -> &LedgerError {
        match self {
            LedgerError::Rollback { tx, .. } => tx.root(),
            other => other,
        }
    }
}

impl From<sqlx::Error> for LedgerError {
    fn from(e: sqlx::Error) -> Self {
        if let sqlx::Error::Database(db_err) = &e {
            let code = db_err.code();
            let code = code.as_deref().unwrap_or_default();
            // Class 23: integrity constraint violation
            if code.starts_with("23") {
                let name = db_err
                    .constraint()
                    .map(str::to_string)
                    .unwrap_or_else(|| db_err.message().to_string());
                return LedgerError::Constraint(name);
            }
            if code == PG_DEADLOCK_DETECTED || code == PG_SERIALIZATION_FAILURE {
                return LedgerError::Deadlock(db_err.message().to_string());
            }
        }
        LedgerError::Database(e.to_string())
    }
}
