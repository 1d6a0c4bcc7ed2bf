//! Transaction Coordinator
//!
//! Runs a sequence of ledger queries as one atomic unit:
//!
//! ```text
//! begin ──▶ op(&mut tx) ──Ok──▶ commit ──▶ Ok(value)
//!                 │
//!                Err / cancelled / deadline
//!                 ▼
//!             rollback ──Ok──▶ Err(original)
//!                 │
//!                Err──▶ Err(Rollback { tx, rollback })
//! ```
//!
//! Cancellation and the optional deadline are observed while beginning,
//! while `op` runs and while committing. Rollback itself is never cut short:
//! a unit interrupted before commit is always rolled back before
//! `Cancelled` / `Timeout` is reported.
//!
//! Once commit has been issued the store may already have applied it, so an
//! interruption from then on is reported as `Commit(Cancelled)` or
//! `Commit(Timeout)`: the outcome is unknown and the caller must not treat
//! it as a clean abort.

use futures::future::BoxFuture;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, warn};

use super::error::LedgerError;
use super::store::{LedgerTx, TxBegin};

/// Atomic-unit runner over any [`TxBegin`] store
pub struct TxCoordinator<S> {
    store: Arc<S>,
    deadline: Option<Duration>,
}

impl<S> Clone for TxCoordinator<S> {
    fn clone(&self) -> Self {
        Self {
            store: self.store.clone(),
            deadline: self.deadline,
        }
    }
}

impl<S: TxBegin> TxCoordinator<S> {
    pub fn new(store: Arc<S>) -> Self {
        Self {
            store,
            deadline: None,
        }
    }

    /// Upper bound on one unit, measured from `begin`
    pub fn with_deadline(mut self, deadline: Option<Duration>) -> Self {
        self.deadline = deadline;
        self
    }

    pub fn store(&self) -> &Arc<S> {
        &self.store
    }

    /// Run `op` inside a fresh transactional scope.
    ///
    /// Nothing `op` does is visible to anyone else unless this returns `Ok`.
    pub async fn run_atomic<T, F>(
        &self,
        cancel: &CancellationToken,
        op: F,
    ) -> Result<T, LedgerError>
    where
        T: Send,
        F: for<'c> FnOnce(&'c mut S::Tx) -> BoxFuture<'c, Result<T, LedgerError>> + Send,
    {
        let expired = expire_after(self.deadline);
        tokio::pin!(expired);

        let mut tx = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(LedgerError::Cancelled),
            _ = &mut expired => return Err(LedgerError::Timeout),
            tx = self.store.begin() => tx?,
        };
        debug!("Unit begun");

        let outcome = tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(LedgerError::Cancelled),
            _ = &mut expired => Err(LedgerError::Timeout),
            res = op(&mut tx) => res,
        };
        let outcome = match outcome {
            Ok(_) if cancel.is_cancelled() => Err(LedgerError::Cancelled),
            other => other,
        };

        match outcome {
            Ok(value) => {
                let committed = tokio::select! {
                    biased;
                    res = tx.commit() => res.map_err(|e| LedgerError::Commit(Box::new(e))),
                    _ = cancel.cancelled() => Err(LedgerError::Commit(Box::new(LedgerError::Cancelled))),
                    _ = &mut expired => Err(LedgerError::Commit(Box::new(LedgerError::Timeout))),
                };
                match &committed {
                    Ok(()) => debug!("Unit committed"),
                    Err(e) => warn!(error = %e, "Unit commit outcome unknown"),
                }
                committed.map(|()| value)
            }
            Err(err) => match tx.rollback().await {
                Ok(()) => {
                    debug!(error = %err, "Unit rolled back");
                    Err(err)
                }
                Err(rb_err) => {
                    error!(error = %err, rollback_error = %rb_err, "Unit rollback failed");
                    Err(LedgerError::Rollback {
                        tx: Box::new(err),
                        rollback: Box::new(rb_err),
                    })
                }
            },
        }
    }
}

async fn expire_after(deadline: Option<Duration>) {
    match deadline {
        Some(d) => tokio::time::sleep(d).await,
        None => std::future::pending().await,
    }
}
