//! In-memory store.
//!
//! Rows are staged per transaction and only become visible on commit. Faults
//! can be registered per table, or per column value, to drive the rollback
//! paths without a database.
//!
//! With [`MemoryStore::abort_transactions_on_error`] a failed plain insert
//! poisons its transaction the way Postgres does: every later statement fails
//! until rollback. Isolated inserts behave like savepoints and never poison.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use anyhow::{anyhow, Result};
use async_trait::async_trait;

use super::{InsertOutcome, RegistryStore, RegistryTransaction};
use crate::sql::{InsertStatement, SqlValue};

pub type StoredRow = BTreeMap<String, SqlValue>;

pub const ABORTED_TRANSACTION: &str =
    "current transaction is aborted, commands ignored until end of transaction block";

#[derive(Debug, Clone, PartialEq)]
pub enum FaultKind {
    /// The insert fails with this message.
    Error(String),
    /// The insert succeeds but writes nothing.
    NoRows,
}

#[derive(Debug, Clone)]
struct Fault {
    table: String,
    matching: Option<(String, SqlValue)>,
    kind: FaultKind,
}

impl Fault {
    fn applies_to(&self, statement: &InsertStatement) -> bool {
        if statement.table().as_str() != self.table {
            return false;
        }
        match &self.matching {
            None => true,
            Some((column, value)) => statement.value_of(column) == Some(value),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MemoryStats {
    pub begun: usize,
    pub committed: usize,
    pub rolled_back: usize,
    /// Connections currently held by unfinished transactions.
    pub open_connections: usize,
}

#[derive(Debug, Default)]
struct MemoryState {
    tables: BTreeMap<String, Vec<StoredRow>>,
    attempts: BTreeMap<String, usize>,
    faults: Vec<Fault>,
    abort_on_error: bool,
    stats: MemoryStats,
}

#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    state: Arc<Mutex<MemoryState>>,
    next_id: Arc<AtomicI64>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, MemoryState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Every insert into `table` hits `kind`.
    pub fn fail_inserts_into(&self, table: &str, kind: FaultKind) {
        self.lock().faults.push(Fault {
            table: table.to_string(),
            matching: None,
            kind,
        });
    }

    /// Inserts into `table` whose `column` equals `value` hit `kind`.
    pub fn fail_inserts_where(
        &self,
        table: &str,
        column: &str,
        value: impl Into<SqlValue>,
        kind: FaultKind,
    ) {
        self.lock().faults.push(Fault {
            table: table.to_string(),
            matching: Some((column.to_string(), value.into())),
            kind,
        });
    }

    /// A failed plain insert aborts its transaction.
    pub fn abort_transactions_on_error(&self) {
        self.lock().abort_on_error = true;
    }

    /// Committed rows of `table`.
    pub fn rows(&self, table: &str) -> Vec<StoredRow> {
        self.lock().tables.get(table).cloned().unwrap_or_default()
    }

    pub fn row_count(&self, table: &str) -> usize {
        self.lock().tables.get(table).map_or(0, Vec::len)
    }

    /// Insert statements issued against `table`, including failed ones.
    pub fn insert_attempts(&self, table: &str) -> usize {
        self.lock().attempts.get(table).copied().unwrap_or(0)
    }

    pub fn stats(&self) -> MemoryStats {
        self.lock().stats
    }
}

#[async_trait]
impl RegistryStore for MemoryStore {
    async fn begin(&self) -> Result<Box<dyn RegistryTransaction>> {
        {
            let mut state = self.lock();
            state.stats.begun += 1;
            state.stats.open_connections += 1;
        }
        Ok(Box::new(MemoryTransaction {
            store: self.clone(),
            staged: Vec::new(),
            aborted: false,
            finished: false,
        }))
    }

    fn backend(&self) -> &'static str {
        "memory"
    }
}

struct MemoryTransaction {
    store: MemoryStore,
    staged: Vec<(String, StoredRow)>,
    aborted: bool,
    finished: bool,
}

impl MemoryTransaction {
    fn apply(&mut self, statement: &InsertStatement, isolated: bool) -> Result<InsertOutcome> {
        let table = statement.table().to_string();
        let (fault, abort_on_error) = {
            let mut state = self.store.lock();
            *state.attempts.entry(table.clone()).or_default() += 1;
            let fault = state
                .faults
                .iter()
                .find(|f| f.applies_to(statement))
                .map(|f| f.kind.clone());
            (fault, state.abort_on_error)
        };

        if self.aborted {
            return Err(anyhow!(ABORTED_TRANSACTION));
        }

        match fault {
            Some(FaultKind::Error(message)) => {
                if abort_on_error && !isolated {
                    self.aborted = true;
                }
                return Err(anyhow!(message));
            }
            Some(FaultKind::NoRows) => {
                return Ok(InsertOutcome {
                    rows_affected: 0,
                    generated_id: None,
                })
            }
            None => {}
        }

        let mut row: StoredRow = statement
            .columns()
            .iter()
            .map(|(column, value)| (column.to_string(), value.clone()))
            .collect();

        // Ids behave like a sequence: consumed even when the transaction rolls back
        let generated_id = statement.returning_column().map(|column| {
            let id = self.store.next_id.fetch_add(1, Ordering::SeqCst) + 1;
            row.insert(column.to_string(), SqlValue::Int(id));
            id
        });

        self.staged.push((table, row));
        Ok(InsertOutcome {
            rows_affected: 1,
            generated_id,
        })
    }
}

#[async_trait]
impl RegistryTransaction for MemoryTransaction {
    async fn insert(&mut self, statement: &InsertStatement) -> Result<InsertOutcome> {
        self.apply(statement, false)
    }

    async fn insert_isolated(&mut self, statement: &InsertStatement) -> Result<InsertOutcome> {
        self.apply(statement, true)
    }

    async fn commit(mut self: Box<Self>) -> Result<()> {
        self.finished = true;
        if self.aborted {
            // Postgres turns COMMIT of an aborted transaction into ROLLBACK
            self.staged.clear();
            self.store.lock().stats.rolled_back += 1;
            return Ok(());
        }
        let staged = std::mem::take(&mut self.staged);
        {
            let mut state = self.store.lock();
            for (table, row) in staged {
                state.tables.entry(table).or_default().push(row);
            }
            state.stats.committed += 1;
        }
        Ok(())
    }

    async fn rollback(mut self: Box<Self>) -> Result<()> {
        self.finished = true;
        self.staged.clear();
        self.store.lock().stats.rolled_back += 1;
        Ok(())
    }
}

impl Drop for MemoryTransaction {
    fn drop(&mut self) {
        let mut state = self.store.lock();
        if !self.finished {
            state.stats.rolled_back += 1;
        }
        state.stats.open_connections = state.stats.open_connections.saturating_sub(1);
    }
}
