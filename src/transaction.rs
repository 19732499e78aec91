//! Task-scoped transaction slot.
//!
//! While [`crate::SqlExecutor::with_transaction`] runs its body, the body's task carries one
//! [`TransactionEntry`]. Every executor call made from that task (directly or through helper
//! functions) finds the entry and uses its connection instead of checking one out of the
//! pool. The entry lives only as long as the scoped future, so it is gone once the body
//! finishes, fails, panics or is dropped. Clones that escape the body keep the id but not
//! the connection: it is released when the transaction ends.

use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use tokio::sync::{Mutex, OwnedMappedMutexGuard, OwnedMutexGuard};

use crate::connector::Checkout;
use crate::error::SqlExecutorError;

tokio::task_local! {
    static CURRENT: TransactionEntry;
}

static NEXT_TRANSACTION_ID: AtomicU64 = AtomicU64::new(1);

pub(crate) type TransactionGuard = OwnedMappedMutexGuard<Option<Checkout>, Checkout>;

/// The connection bound to an in-progress transaction.
#[derive(Clone)]
pub struct TransactionEntry {
    id: u64,
    connection_id: u64,
    connection: Arc<Mutex<Option<Checkout>>>,
}

impl TransactionEntry {
    pub(crate) fn new(checkout: Checkout) -> Self {
        Self {
            id: NEXT_TRANSACTION_ID.fetch_add(1, Ordering::Relaxed),
            connection_id: checkout.id(),
            connection: Arc::new(Mutex::new(Some(checkout))),
        }
    }

    /// Process-unique id of this transaction.
    #[must_use]
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Id of the physical connection the transaction runs on.
    #[must_use]
    pub fn connection_id(&self) -> u64 {
        self.connection_id
    }

    /// Lock the transaction's connection. Statements of one transaction never interleave.
    ///
    /// Fails once the transaction has committed or rolled back.
    pub(crate) async fn lock(&self) -> Result<TransactionGuard, SqlExecutorError> {
        let guard = Arc::clone(&self.connection).lock_owned().await;
        OwnedMutexGuard::try_map(guard, Option::as_mut).map_err(|_| {
            SqlExecutorError::transaction(format!("transaction {} already finished", self.id))
        })
    }

    /// Detach the connection so it goes back to the pool even if clones of this entry
    /// are still around.
    pub(crate) async fn release(&self) -> Option<Checkout> {
        self.connection.lock().await.take()
    }
}

impl fmt::Debug for TransactionEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TransactionEntry")
            .field("id", &self.id)
            .field("connection_id", &self.connection_id)
            .finish()
    }
}

/// Accessors for the current task's transaction slot.
pub struct TransactionContext;

impl TransactionContext {
    /// The entry bound to the current task, if a transaction is active.
    #[must_use]
    pub fn current() -> Option<TransactionEntry> {
        CURRENT.try_with(TransactionEntry::clone).ok()
    }

    #[must_use]
    pub fn is_active() -> bool {
        CURRENT.try_with(|_| ()).is_ok()
    }

    /// Run `future` with `entry` bound as the current transaction.
    ///
    /// The binding is removed when the future completes or is dropped.
    pub async fn scope<F>(entry: TransactionEntry, future: F) -> F::Output
    where
        F: Future,
    {
        CURRENT.scope(entry, future).await
    }
}
