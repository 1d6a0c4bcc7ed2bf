//! Transfer prechecks for the request layer
//!
//! The engine trusts its inputs. Whoever accepts a transfer request runs
//! these checks first, against committed account state:
//! - amount is positive
//! - source and destination differ
//! - both accounts exist and hold the requested currency
//! - the source currently covers the amount
//!
//! The funds check is advisory only. A concurrent transfer can still drain
//! the source between the check and the unit; the store's balance
//! constraint is what finally rejects an overdraft.

use serde::Deserialize;

use super::error::LedgerError;
use super::models::{Account, TransferTxParams};
use super::store::AccountLookup;

/// Transfer request as accepted from an authenticated caller
#[derive(Debug, Clone, Deserialize)]
pub struct TransferRequest {
    pub from_account_id: i64,
    pub to_account_id: i64,
    pub amount: i64,
    pub currency: String,
}

impl TransferRequest {
    pub fn params(&self) -> TransferTxParams {
        TransferTxParams {
            from_account_id: self.from_account_id,
            to_account_id: self.to_account_id,
            amount: self.amount,
        }
    }
}

/// Validate a request. Returns the (source, destination) accounts.
pub async fn check_transfer<L>(
    lookup: &L,
    req: &TransferRequest,
) -> Result<(Account, Account), LedgerError>
where
    L: AccountLookup + ?Sized,
{
    if req.amount <= 0 {
        return Err(LedgerError::InvalidAmount);
    }
    if req.from_account_id == req.to_account_id {
        return Err(LedgerError::SameAccount);
    }

    let from = valid_account(lookup, req.from_account_id, &req.currency).await?;
    let to = valid_account(lookup, req.to_account_id, &req.currency).await?;

    if from.balance < req.amount {
        return Err(LedgerError::InsufficientBalance);
    }
    Ok((from, to))
}

async fn valid_account<L>(lookup: &L, id: i64, currency: &str) -> Result<Account, LedgerError>
where
    L: AccountLookup + ?Sized,
{
    let account = lookup.get_account(id).await?;
    if account.currency != currency {
        return Err(LedgerError::CurrencyMismatch {
            account_id: id,
            expected: currency.to_string(),
            actual: account.currency,
        });
    }
    Ok(account)
}
