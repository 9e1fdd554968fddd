//! Process-wide mutual exclusion and the transaction template every write runs through.

use std::sync::Arc;

use futures_util::future::BoxFuture;
use inventory_store::{Storage, StoreTransaction};
use tokio::sync::{Mutex, MutexGuard};

use crate::error::Result;

/// Mutual exclusion shared by every stock-mutating operation.
///
/// Clones share the same lock, so several coordinators over the same stores
/// can be built from one section.
#[derive(Debug, Clone, Default)]
pub struct CriticalSection {
    lock: Arc<Mutex<()>>,
}

/// Held while an operation runs. The section is released when this drops,
/// on success, error and cancellation alike.
#[derive(Debug)]
pub struct SectionGuard<'a> {
    _guard: MutexGuard<'a, ()>,
}

impl CriticalSection {
    pub fn new() -> Self {
        Self::default()
    }

    /// Waits until no other operation is inside the section.
    pub async fn enter(&self) -> SectionGuard<'_> {
        SectionGuard {
            _guard: self.lock.lock().await,
        }
    }

    /// Enters only if the section is free right now.
    pub fn try_enter(&self) -> Option<SectionGuard<'_>> {
        self.lock
            .try_lock()
            .ok()
            .map(|guard| SectionGuard { _guard: guard })
    }
}

/// How a transaction ends when the body succeeds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Finish {
    Commit,
    /// Read-only bodies discard their transaction.
    Rollback,
}

/// Body of a transactional operation.
pub(crate) type TxBody<'t, T> = BoxFuture<'t, Result<T>>;

/// Runs `body` inside one store transaction.
///
/// On success the transaction is finished as `finish` says. On failure it is
/// rolled back and the body's error is returned; a failed rollback is logged
/// but never replaces that error.
pub(crate) async fn in_transaction<S, T, F>(storage: &S, finish: Finish, body: F) -> Result<T>
where
    S: Storage + ?Sized,
    F: for<'t> FnOnce(&'t mut dyn StoreTransaction) -> TxBody<'t, T>,
{
    let mut tx = storage.begin().await?;

    match body(tx.as_mut()).await {
        Ok(value) => {
            match finish {
                Finish::Commit => tx.commit().await?,
                Finish::Rollback => tx.rollback().await?,
            }
            Ok(value)
        }
        Err(err) => {
            if let Err(rollback_err) = tx.rollback().await {
                tracing::error!(error = %rollback_err, "Rollback failed");
            }
            Err(err)
        }
    }
}
