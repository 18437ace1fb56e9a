//! Persistence seam for the transactional write path.
//!
//! A [`RegistryStore`] hands out one [`RegistryTransaction`] per submission.
//! The transaction owns its connection exclusively until it is committed,
//! rolled back, or dropped; dropping an unfinished transaction rolls it back
//! and releases the connection.

use anyhow::Result;
use async_trait::async_trait;

use crate::sql::InsertStatement;

pub mod memory;
pub mod postgres;

pub use memory::{FaultKind, MemoryStats, MemoryStore, StoredRow, ABORTED_TRANSACTION};
pub use postgres::PgRegistryStore;

/// Result of a single insert.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InsertOutcome {
    pub rows_affected: u64,
    /// Value of the statement's `RETURNING` column, when it has one.
    pub generated_id: Option<i64>,
}

#[async_trait]
pub trait RegistryStore: Send + Sync {
    /// Acquire a connection and start a transaction on it.
    async fn begin(&self) -> Result<Box<dyn RegistryTransaction>>;

    /// Short backend name for logs and the health endpoint.
    fn backend(&self) -> &'static str;
}

#[async_trait]
pub trait RegistryTransaction: Send {
    /// Plain insert. On backends that abort the whole transaction on a failed
    /// statement (Postgres), a failure here leaves the transaction unusable.
    async fn insert(&mut self, statement: &InsertStatement) -> Result<InsertOutcome>;

    /// Insert under a savepoint. A failure is undone on its own and later
    /// statements on the same transaction still run.
    async fn insert_isolated(&mut self, statement: &InsertStatement) -> Result<InsertOutcome>;

    async fn commit(self: Box<Self>) -> Result<()>;
    async fn rollback(self: Box<Self>) -> Result<()>;
}

/// One-line text for an error chain.
///
/// Walks the chain like `{:#}` but skips a cause whose text the previous
/// segment already contains. sqlx database errors repeat their source message
/// in their own `Display`.
pub fn error_text(err: &anyhow::Error) -> String {
    let mut text = String::new();
    let mut previous = String::new();
    for cause in err.chain() {
        let segment = cause.to_string();
        if !previous.is_empty() && previous.contains(&segment) {
            continue;
        }
        if !text.is_empty() {
            text.push_str(": ");
        }
        text.push_str(&segment);
        previous = segment;
    }
    text
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::Context;
    use thiserror::Error;

    #[derive(Debug, Error)]
    #[error("new row violates check constraint \"cod_check\"")]
    struct CheckViolation;

    #[derive(Debug, Error)]
    #[error("error returned from database: {0}")]
    struct Returned(#[source] CheckViolation);

    #[test]
    fn repeated_source_text_is_dropped() {
        let err = Err::<(), _>(Returned(CheckViolation))
            .context("insert into violencia_asociada failed")
            .unwrap_err();

        assert_eq!(
            error_text(&err),
            "insert into violencia_asociada failed: error returned from database: \
             new row violates check constraint \"cod_check\""
        );
    }

    #[test]
    fn distinct_causes_are_kept() {
        let err = Err::<(), _>(anyhow::anyhow!("connection refused"))
            .context("could not open a database transaction")
            .unwrap_err();
        assert_eq!(
            error_text(&err),
            "could not open a database transaction: connection refused"
        );
    }
}
