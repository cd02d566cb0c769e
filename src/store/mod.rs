//! Index store: the persisted `(key, container, order)` rows.
//!
//! The engine talks to storage through two traits. `IndexStore` opens
//! transactions; `IndexTx` exposes the handful of row-level primitives the
//! reordering algorithm is built from. Every primitive is scoped to a single
//! container, and a transaction is rolled back when it is dropped without
//! `commit`.
//!
//! Backends:
//! - [`PgIndexStore`]: `PostgreSQL` via `sqlx`, row locks with `FOR UPDATE`.
//! - [`MemoryStore`]: in-process, one async mutex per container.

pub mod error;
pub mod memory;
pub mod postgres;
pub mod table;

pub use self::error::StoreError;
pub use self::memory::MemoryStore;
pub use self::postgres::PgIndexStore;
pub use self::table::OrderedTable;

use crate::order::Order;
use std::fmt::Debug;
use std::future::Future;
use std::hash::Hash;
use std::ops::RangeInclusive;

/// One active row of a container.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OrderedRow<K> {
    pub key: K,
    pub order: Order,
}

impl<K> OrderedRow<K> {
    pub const fn new(key: K, order: Order) -> Self {
        Self { key, order }
    }
}

pub trait IndexStore: Send + Sync {
    type Key: Clone + Eq + Hash + Debug + Send + Sync;
    type Container: Clone + Eq + Hash + Debug + Send + Sync;
    type Tx: IndexTx<Key = Self::Key, Container = Self::Container>;

    fn begin(&self) -> impl Future<Output = Result<Self::Tx, StoreError>> + Send;
}

pub trait IndexTx: Send {
    type Key: Clone + Eq + Hash + Debug + Send + Sync;
    type Container: Clone + Eq + Hash + Debug + Send + Sync;

    /// Lock every active row of the container and return them highest order
    /// first.
    ///
    /// The returned orders are the only ones the engine trusts: they are read
    /// by the same statement that takes the locks. Callers still sort by the
    /// returned order before using positions.
    fn lock_container(
        &mut self,
        container: &Self::Container,
    ) -> impl Future<Output = Result<Vec<OrderedRow<Self::Key>>, StoreError>> + Send;

    /// Active rows in ascending order, without locking.
    fn rows(
        &mut self,
        container: &Self::Container,
    ) -> impl Future<Output = Result<Vec<OrderedRow<Self::Key>>, StoreError>> + Send;

    fn count(
        &mut self,
        container: &Self::Container,
    ) -> impl Future<Output = Result<Order, StoreError>> + Send;

    /// Insert the row, or update the order of an existing one.
    fn put(
        &mut self,
        container: &Self::Container,
        key: &Self::Key,
        order: Order,
    ) -> impl Future<Output = Result<(), StoreError>> + Send;

    /// Delete the row, active or soft-deleted. Returns whether it existed.
    fn delete(
        &mut self,
        container: &Self::Container,
        key: &Self::Key,
    ) -> impl Future<Output = Result<bool, StoreError>> + Send;

    /// Flag the row as soft-deleted, leaving its order untouched. Returns the
    /// stale order, or `None` when the row does not exist.
    fn mark_deleted(
        &mut self,
        container: &Self::Container,
        key: &Self::Key,
    ) -> impl Future<Output = Result<Option<Order>, StoreError>> + Send;

    /// Add `delta` to the order of every active row whose order is in `span`,
    /// skipping `except`. Returns the number of rows changed.
    fn offset_orders(
        &mut self,
        container: &Self::Container,
        span: RangeInclusive<Order>,
        delta: Order,
        except: Option<&Self::Key>,
    ) -> impl Future<Output = Result<u64, StoreError>> + Send;

    fn commit(self) -> impl Future<Output = Result<(), StoreError>> + Send;
}
