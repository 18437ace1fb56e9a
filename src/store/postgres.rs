//! Postgres store.
//!
//! Statements are sent as runtime-built queries (sqlx::QueryBuilder) with every
//! value bound as a parameter. Identifiers are validated and quoted upstream.
//!
//! A failed statement aborts a Postgres transaction, so isolated inserts run
//! inside their own savepoint.

use anyhow::{Context, Result};
use async_trait::async_trait;
use sqlx::postgres::{PgConnection, PgPoolOptions, Postgres};
use sqlx::{Connection, PgPool, QueryBuilder, Row, Transaction};
use tracing::warn;

use super::{InsertOutcome, RegistryStore, RegistryTransaction};
use crate::sql::{InsertStatement, SqlValue};

pub struct PgRegistryStore {
    pool: PgPool,
}

impl PgRegistryStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// No connection is opened until the first transaction begins.
    pub fn connect_lazy(database_url: &str, max_connections: u32) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .connect_lazy(database_url)
            .context("invalid database URL")?;
        Ok(Self::new(pool))
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

#[async_trait]
impl RegistryStore for PgRegistryStore {
    async fn begin(&self) -> Result<Box<dyn RegistryTransaction>> {
        let tx = self
            .pool
            .begin()
            .await
            .context("could not open a database transaction")?;
        Ok(Box::new(PgRegistryTransaction { tx }))
    }

    fn backend(&self) -> &'static str {
        "postgres"
    }
}

struct PgRegistryTransaction {
    tx: Transaction<'static, Postgres>,
}

#[async_trait]
impl RegistryTransaction for PgRegistryTransaction {
    async fn insert(&mut self, statement: &InsertStatement) -> Result<InsertOutcome> {
        run_insert(&mut self.tx, statement).await
    }

    async fn insert_isolated(&mut self, statement: &InsertStatement) -> Result<InsertOutcome> {
        // nested begin on a transaction is a SAVEPOINT
        let mut savepoint = Connection::begin(&mut *self.tx)
            .await
            .context("could not open a savepoint")?;

        match run_insert(&mut savepoint, statement).await {
            Ok(inserted) => {
                savepoint
                    .commit()
                    .await
                    .context("could not release savepoint")?;
                Ok(inserted)
            }
            Err(e) => {
                if let Err(rollback) = savepoint.rollback().await {
                    warn!(error = %rollback, "rollback to savepoint failed");
                }
                Err(e)
            }
        }
    }

    async fn commit(self: Box<Self>) -> Result<()> {
        self.tx.commit().await.context("commit failed")
    }

    async fn rollback(self: Box<Self>) -> Result<()> {
        self.tx.rollback().await.context("rollback failed")
    }
}

async fn run_insert(conn: &mut PgConnection, statement: &InsertStatement) -> Result<InsertOutcome> {
    let mut query = build_insert(statement);

    if statement.returning_column().is_none() {
        let done = query
            .build()
            .execute(&mut *conn)
            .await
            .with_context(|| format!("insert into {} failed", statement.table()))?;
        return Ok(InsertOutcome {
            rows_affected: done.rows_affected(),
            generated_id: None,
        });
    }

    let row = query
        .build()
        .fetch_optional(&mut *conn)
        .await
        .with_context(|| format!("insert into {} failed", statement.table()))?;
    let generated_id = row
        .as_ref()
        .map(|r| r.try_get::<Option<i64>, _>(0))
        .transpose()
        .context("generated id is not an integer")?
        .flatten();

    Ok(InsertOutcome {
        rows_affected: u64::from(row.is_some()),
        generated_id,
    })
}

/// Parameterised form of `statement`. NULLs are inlined so the column type
/// decides their type; the returned id is cast so any integer key decodes.
pub(crate) fn build_insert(statement: &InsertStatement) -> QueryBuilder<'static, Postgres> {
    let mut query = QueryBuilder::new("INSERT INTO ");
    query.push(statement.table().quoted());

    if statement.columns().is_empty() {
        query.push(" DEFAULT VALUES");
    } else {
        query.push(" (");
        {
            let mut columns = query.separated(", ");
            for (column, _) in statement.columns() {
                columns.push(column.quoted());
            }
        }
        query.push(") VALUES (");
        {
            let mut values = query.separated(", ");
            for (_, value) in statement.columns() {
                match value.clone() {
                    SqlValue::Null => {
                        values.push("NULL");
                    }
                    SqlValue::Bool(b) => {
                        values.push_bind(b);
                    }
                    SqlValue::Int(i) => {
                        values.push_bind(i);
                    }
                    SqlValue::Float(f) => {
                        values.push_bind(f);
                    }
                    SqlValue::Text(s) => {
                        values.push_bind(s);
                    }
                    SqlValue::Date(d) => {
                        values.push_bind(d);
                    }
                }
            }
        }
        query.push(")");
    }

    if let Some(column) = statement.returning_column() {
        query.push(" RETURNING ");
        query.push(column.quoted());
        query.push("::bigint");
    }
    query
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sql::Identifier;

    fn ident(name: &str) -> Identifier {
        Identifier::parse(name).unwrap()
    }

    #[test]
    fn values_are_bound_not_inlined() {
        let stmt = InsertStatement::into_table(ident("registro_violencia"))
            .value(ident("nombre"), "x'); DROP TABLE registro_violencia; --")
            .value(ident("notas"), SqlValue::Null)
            .value(ident("edad"), 30_i64)
            .returning(ident("numero_violencia"));

        let query = build_insert(&stmt);
        assert_eq!(
            query.sql(),
            "INSERT INTO \"registro_violencia\" (\"nombre\", \"notas\", \"edad\") \
             VALUES ($1, NULL, $2) RETURNING \"numero_violencia\"::bigint"
        );
    }

    #[test]
    fn empty_record_uses_default_values() {
        let stmt = InsertStatement::into_table(ident("registro_violencia"))
            .returning(ident("numero_violencia"));
        assert_eq!(
            build_insert(&stmt).sql(),
            "INSERT INTO \"registro_violencia\" DEFAULT VALUES RETURNING \"numero_violencia\"::bigint"
        );
    }

    #[tokio::test]
    async fn lazy_pool_does_not_connect() {
        let store = PgRegistryStore::connect_lazy("postgres://nobody@127.0.0.1:1/none", 1).unwrap();
        assert_eq!(store.backend(), "postgres");
        assert_eq!(store.pool().size(), 0);
    }
}
