//! Transaction coordination and fatal escalation.
//!
//! The persistence layer has no recovery story for a failed commit or an
//! unexpected store error in the middle of a save: in-memory state may no
//! longer match the store. Such failures go to a [`FatalHandler`], which in
//! production stops the process.

use std::sync::Arc;

use crate::conn::{DbConn, TxMode};
use crate::error::DbError;

/// Hook invoked when state can no longer be trusted.
pub trait FatalHandler: Send + Sync {
    /// Stop the server. Implementations used outside tests do not return.
    fn panic_stop(&self, message: &str);
}

/// Logs the message and exits the process.
#[derive(Debug, Clone, Copy, Default)]
pub struct ExitOnFatal;

impl FatalHandler for ExitOnFatal {
    fn panic_stop(&self, message: &str) {
        tracing::error!(message, "Fatal persistence failure, stopping server");
        std::process::exit(1);
    }
}

/// Opens, commits and aborts transactions on a [`DbConn`].
#[derive(Clone)]
pub struct TxCoordinator {
    fatal: Arc<dyn FatalHandler>,
}

impl core::fmt::Debug for TxCoordinator {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("TxCoordinator").finish_non_exhaustive()
    }
}

impl Default for TxCoordinator {
    fn default() -> Self {
        Self::new(Arc::new(ExitOnFatal))
    }
}

impl TxCoordinator {
    /// A coordinator that escalates to `fatal`.
    pub fn new(fatal: Arc<dyn FatalHandler>) -> Self {
        Self { fatal }
    }

    /// Open a transaction.
    ///
    /// # Errors
    ///
    /// Returns the store error after escalating it; a connection that cannot
    /// open a transaction cannot persist anything.
    pub async fn begin<'c, C>(
        &self,
        conn: &'c mut C,
        mode: TxMode,
    ) -> Result<Transaction<'c, C>, DbError>
    where
        C: DbConn + ?Sized,
    {
        if let Err(err) = conn.begin(mode).await {
            self.escalate(&format!("failed to begin transaction: {err}"));
            return Err(err);
        }
        Ok(Transaction {
            conn,
            finished: false,
        })
    }

    /// Commit. A commit failure is always fatal.
    ///
    /// # Errors
    ///
    /// Returns the store error after escalating it.
    pub async fn commit<C>(&self, mut tx: Transaction<'_, C>) -> Result<(), DbError>
    where
        C: DbConn + ?Sized,
    {
        tx.finished = true;
        if let Err(err) = tx.conn.commit().await {
            self.escalate(&format!("failed to commit transaction: {err}"));
            return Err(err);
        }
        Ok(())
    }

    /// Roll back without escalating.
    ///
    /// # Errors
    ///
    /// Returns the store error.
    pub async fn rollback<C>(&self, mut tx: Transaction<'_, C>) -> Result<(), DbError>
    where
        C: DbConn + ?Sized,
    {
        tx.finished = true;
        tx.conn.rollback().await.inspect_err(|err| {
            tracing::warn!(error = %err, "Failed to roll back transaction");
        })
    }

    /// Roll back after `err` and escalate. The one failure that is not
    /// escalated is a key collision, which callers retry with a new key.
    pub async fn abort<C>(&self, tx: Transaction<'_, C>, err: &DbError, context: &str)
    where
        C: DbConn + ?Sized,
    {
        let rolled_back = self.rollback(tx).await;
        if err.is_duplicate_key() {
            tracing::debug!(context, "Rolled back after key collision");
            return;
        }
        let mut message = format!("{context}: {err}");
        if let Err(rollback_err) = rolled_back {
            message.push_str(&format!(" (rollback also failed: {rollback_err})"));
        }
        self.escalate(&message);
    }

    /// Escalate directly.
    pub fn escalate(&self, message: &str) {
        tracing::error!(message, "Escalating persistence failure");
        self.fatal.panic_stop(message);
    }
}

/// An open transaction borrowing its connection.
pub struct Transaction<'c, C: DbConn + ?Sized> {
    conn: &'c mut C,
    finished: bool,
}

impl<C: DbConn + ?Sized> Transaction<'_, C> {
    /// The connection, for running statements inside the transaction.
    pub fn conn(&mut self) -> &mut C {
        self.conn
    }
}

impl<C: DbConn + ?Sized> Drop for Transaction<'_, C> {
    fn drop(&mut self) {
        if !self.finished {
            tracing::warn!("Transaction dropped without commit or rollback");
        }
    }
}
