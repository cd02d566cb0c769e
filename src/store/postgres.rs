//! `PostgreSQL` index store.
//!
//! Flow Overview:
//! 1) `begin` opens a pooled transaction and optionally sets `lock_timeout`.
//! 2) `lock_container` runs `SELECT ... ORDER BY order DESC FOR UPDATE`, so
//!    every writer of a container acquires its row locks in the same order.
//! 3) The engine's shifts run as range `UPDATE`s inside that transaction.
//!
//! Under READ COMMITTED a blocked `FOR UPDATE` re-reads the row once the
//! holder commits, which is why orders are taken from the locking statement
//! itself. Deadlocks, lock timeouts and unique races surface as transient
//! `StoreError`s and the engine retries the whole transaction.

use super::{IndexStore, IndexTx, OrderedRow, OrderedTable, StoreError};
use crate::order::Order;
use sqlx::postgres::{PgArguments, PgPool};
use sqlx::query::Query;
use sqlx::{Postgres, Row, Transaction};
use std::cmp::Reverse;
use std::ops::RangeInclusive;
use std::sync::Arc;
use std::time::Duration;
use tracing::{Instrument, debug, info_span};
use uuid::Uuid;

#[derive(Debug, Clone)]
pub struct PgIndexStore {
    pool: PgPool,
    table: Arc<OrderedTable>,
    lock_timeout: Option<Duration>,
}

impl PgIndexStore {
    /// # Errors
    /// Returns `StoreError::InvalidIdentifier` if the table layout is invalid.
    pub fn new(pool: PgPool, table: OrderedTable) -> Result<Self, StoreError> {
        table.validate()?;
        Ok(Self {
            pool,
            table: Arc::new(table),
            lock_timeout: None,
        })
    }

    /// Abort lock waits after `timeout`; the engine retries them as transient.
    #[must_use]
    pub fn with_lock_timeout(mut self, timeout: Duration) -> Self {
        self.lock_timeout = Some(timeout);
        self
    }

    #[must_use]
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    #[must_use]
    pub fn table(&self) -> &OrderedTable {
        &self.table
    }

    /// Create the index table and both unique indexes if they are missing.
    ///
    /// # Errors
    /// Returns an error if any statement fails.
    pub async fn apply_schema(&self) -> Result<(), StoreError> {
        let mut tx = self.pool.begin().await?;
        for statement in self.table.schema_statements() {
            let span = info_span!(
                "db.query",
                db.system = "postgresql",
                db.operation = "CREATE",
                db.statement = statement.as_str()
            );
            sqlx::query(&statement)
                .execute(&mut *tx)
                .instrument(span)
                .await?;
        }
        tx.commit().await?;
        Ok(())
    }
}

impl IndexStore for PgIndexStore {
    type Key = Uuid;
    type Container = Uuid;
    type Tx = PgIndexTx;

    async fn begin(&self) -> Result<PgIndexTx, StoreError> {
        let mut tx = self.pool.begin().await?;
        if let Some(timeout) = self.lock_timeout {
            // SET does not accept bind parameters.
            let statement = format!("SET LOCAL lock_timeout = '{}ms'", timeout.as_millis());
            sqlx::query(&statement).execute(&mut *tx).await?;
        }
        Ok(PgIndexTx {
            tx,
            table: Arc::clone(&self.table),
        })
    }
}

/// An open transaction on a [`PgIndexStore`]; rolled back on drop.
#[derive(Debug)]
pub struct PgIndexTx {
    tx: Transaction<'static, Postgres>,
    table: Arc<OrderedTable>,
}

impl PgIndexTx {
    /// Start a query, binding the container key as `$1` for scoped tables.
    fn scoped<'q>(&self, sql: &'q str, container: Uuid) -> Query<'q, Postgres, PgArguments> {
        let query = sqlx::query(sql);
        if self.table.is_scoped() {
            query.bind(container)
        } else {
            query
        }
    }

    async fn fetch_rows(
        &mut self,
        sql: &str,
        operation: &'static str,
        container: Uuid,
    ) -> Result<Vec<OrderedRow<Uuid>>, StoreError> {
        let span = info_span!(
            "db.query",
            db.system = "postgresql",
            db.operation = operation,
            db.statement = sql
        );
        let rows = self
            .scoped(sql, container)
            .fetch_all(&mut *self.tx)
            .instrument(span)
            .await?;

        rows.iter()
            .map(|row| -> Result<OrderedRow<Uuid>, StoreError> {
                let key: Uuid = row.try_get(0)?;
                let order: i32 = row.try_get(1)?;
                Ok(OrderedRow::new(key, order))
            })
            .collect()
    }
}

impl IndexTx for PgIndexTx {
    type Key = Uuid;
    type Container = Uuid;

    async fn lock_container(
        &mut self,
        container: &Uuid,
    ) -> Result<Vec<OrderedRow<Uuid>>, StoreError> {
        let sql = self.table.lock_sql();
        let mut rows = self.fetch_rows(&sql, "SELECT FOR UPDATE", *container).await?;
        // After waiting on a lock, READ COMMITTED returns the committed orders
        // but keeps the sort position of the values read before the wait.
        rows.sort_by_key(|row| Reverse(row.order));
        debug!(container = %container, locked = rows.len(), "locked container rows");
        Ok(rows)
    }

    async fn rows(&mut self, container: &Uuid) -> Result<Vec<OrderedRow<Uuid>>, StoreError> {
        let sql = self.table.rows_sql();
        self.fetch_rows(&sql, "SELECT", *container).await
    }

    async fn count(&mut self, container: &Uuid) -> Result<Order, StoreError> {
        let sql = self.table.count_sql();
        let span = info_span!(
            "db.query",
            db.system = "postgresql",
            db.operation = "SELECT",
            db.statement = sql.as_str()
        );
        let row = self
            .scoped(&sql, *container)
            .fetch_one(&mut *self.tx)
            .instrument(span)
            .await?;
        let count: i64 = row.try_get(0)?;
        Order::try_from(count)
            .map_err(|_| StoreError::Backend(format!("container holds {count} rows")))
    }

    async fn put(&mut self, container: &Uuid, key: &Uuid, order: Order) -> Result<(), StoreError> {
        let sql = self.table.update_order_sql();
        let span = info_span!(
            "db.query",
            db.system = "postgresql",
            db.operation = "UPDATE",
            db.statement = sql.as_str()
        );
        let updated = self
            .scoped(&sql, *container)
            .bind(*key)
            .bind(order)
            .execute(&mut *self.tx)
            .instrument(span)
            .await?;
        if updated.rows_affected() > 0 {
            return Ok(());
        }

        let sql = self.table.insert_sql();
        let span = info_span!(
            "db.query",
            db.system = "postgresql",
            db.operation = "INSERT",
            db.statement = sql.as_str()
        );
        self.scoped(&sql, *container)
            .bind(*key)
            .bind(order)
            .execute(&mut *self.tx)
            .instrument(span)
            .await?;
        Ok(())
    }

    async fn delete(&mut self, container: &Uuid, key: &Uuid) -> Result<bool, StoreError> {
        let sql = self.table.delete_sql();
        let span = info_span!(
            "db.query",
            db.system = "postgresql",
            db.operation = "DELETE",
            db.statement = sql.as_str()
        );
        let deleted = self
            .scoped(&sql, *container)
            .bind(*key)
            .execute(&mut *self.tx)
            .instrument(span)
            .await?;
        Ok(deleted.rows_affected() > 0)
    }

    async fn mark_deleted(
        &mut self,
        container: &Uuid,
        key: &Uuid,
    ) -> Result<Option<Order>, StoreError> {
        let Some(sql) = self.table.mark_deleted_sql() else {
            return Err(StoreError::Backend(format!(
                "table {} has no soft-delete column",
                self.table.table()
            )));
        };
        let span = info_span!(
            "db.query",
            db.system = "postgresql",
            db.operation = "UPDATE",
            db.statement = sql.as_str()
        );
        let row = self
            .scoped(&sql, *container)
            .bind(*key)
            .fetch_optional(&mut *self.tx)
            .instrument(span)
            .await?;
        row.map(|row| row.try_get::<i32, _>(0))
            .transpose()
            .map_err(StoreError::from)
    }

    async fn offset_orders(
        &mut self,
        container: &Uuid,
        span: RangeInclusive<Order>,
        delta: Order,
        except: Option<&Uuid>,
    ) -> Result<u64, StoreError> {
        let sql = self.table.offset_sql(except.is_some());
        let query_span = info_span!(
            "db.query",
            db.system = "postgresql",
            db.operation = "UPDATE",
            db.statement = sql.as_str()
        );
        let mut query = self
            .scoped(&sql, *container)
            .bind(delta)
            .bind(*span.start())
            .bind(*span.end());
        if let Some(key) = except {
            query = query.bind(*key);
        }
        let updated = query
            .execute(&mut *self.tx)
            .instrument(query_span)
            .await?;
        Ok(updated.rows_affected())
    }

    async fn commit(self) -> Result<(), StoreError> {
        self.tx.commit().await?;
        Ok(())
    }
}
