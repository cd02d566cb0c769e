//! Reordering engine.
//!
//! Flow Overview:
//! 1) Open a transaction and lock every active row of the container. Current
//!    orders come from that locking read only, and positions come from
//!    sorting by them, never from the order the rows arrived in.
//! 2) Shift siblings with a two-phase update: park the affected run above
//!    `count + 1000`, then bring it down to its final slots. A plain
//!    `order = order + 1` over a range would hit the non-deferred
//!    `(container, order)` unique index halfway through.
//! 3) Save the target row, recount, clamp if needed, commit.
//!
//! The whole transaction is retried on transient store failures.

use super::{DensityReport, Order, OrderError, OrderedEntity, RetryPolicy};
use crate::store::{IndexStore, IndexTx, OrderedRow, StoreError};
use std::collections::HashSet;
use std::fmt::Debug;
use std::hash::Hash;
use std::ops::RangeInclusive;
use tracing::{debug, instrument, warn};

/// Rows are parked this far above the container size while they shift.
const PARKING_GAP: Order = 1000;

fn as_order(len: usize) -> Result<Order, StoreError> {
    Order::try_from(len).map_err(|_| StoreError::Backend(format!("{len} rows exceed the order range")))
}

/// Keeps the `order` of every entity in a container dense and zero-based.
#[derive(Debug, Clone)]
pub struct Reorderer<S> {
    store: S,
    retry: RetryPolicy,
}

impl<S: IndexStore> Reorderer<S> {
    #[must_use]
    pub fn new(store: S) -> Self {
        Self {
            store,
            retry: RetryPolicy::default(),
        }
    }

    #[must_use]
    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry.normalize();
        self
    }

    #[must_use]
    pub fn store(&self) -> &S {
        &self.store
    }

    #[must_use]
    pub fn retry_policy(&self) -> &RetryPolicy {
        &self.retry
    }

    /// Insert or move `entity` to `desired`, shifting siblings by one.
    ///
    /// `None` appends a new entity and leaves an existing one where it is.
    /// Positions past the end are clamped to the last slot. The final order is
    /// written back to the entity and returned.
    ///
    /// # Errors
    /// `OrderError::Validation` for a negative order or a soft-deleted entity
    /// with no row, `OrderError::RetriesExhausted` when every attempt hit a
    /// transient failure, `OrderError::Store` for anything else.
    #[instrument(skip_all, fields(container = ?entity.container_key(), key = ?entity.ordered_key(), desired = ?desired))]
    pub async fn upsert<E>(&self, entity: &mut E, desired: Option<Order>) -> Result<Order, OrderError>
    where
        E: OrderedEntity<Key = S::Key, Container = S::Container>,
    {
        if let Some(order) = desired
            && order < 0
        {
            return Err(OrderError::validation(format!("order {order} is negative")));
        }

        let container = entity.container_key();
        let key = entity.ordered_key();
        let order = if entity.is_deleted() {
            self.retry
                .run("upsert", || self.soft_delete_once(&container, &key))
                .await?
        } else {
            self.retry
                .run("upsert", || self.upsert_once(&container, &key, desired))
                .await?
        };

        entity.set_order(order);
        Ok(order)
    }

    /// Upsert using the entity's own order attribute as the desired order.
    ///
    /// # Errors
    /// Same as [`Reorderer::upsert`].
    pub async fn save<E>(&self, entity: &mut E) -> Result<Order, OrderError>
    where
        E: OrderedEntity<Key = S::Key, Container = S::Container>,
    {
        let desired = entity.order();
        self.upsert(entity, desired).await
    }

    /// Delete `entity` and close the gap it leaves.
    ///
    /// # Errors
    /// `OrderError::Validation` if the entity has no row in its container,
    /// otherwise the same as [`Reorderer::upsert`].
    #[instrument(skip_all, fields(container = ?entity.container_key(), key = ?entity.ordered_key()))]
    pub async fn remove<E>(&self, entity: &E) -> Result<(), OrderError>
    where
        E: OrderedEntity<Key = S::Key, Container = S::Container>,
    {
        let container = entity.container_key();
        let key = entity.ordered_key();
        let soft_deleted = entity.is_deleted();
        self.retry
            .run("remove", || self.remove_once(&container, &key, soft_deleted))
            .await
    }

    /// Permute the container into exactly `keys`, returning the number of
    /// single-entity moves applied.
    ///
    /// # Errors
    /// `OrderError::Validation` unless `keys` is the current membership with
    /// no duplicates, otherwise the same as [`Reorderer::upsert`].
    #[instrument(skip_all, fields(container = ?container, keys = keys.len()))]
    pub async fn reorder_all(
        &self,
        container: &S::Container,
        keys: &[S::Key],
    ) -> Result<usize, OrderError> {
        self.retry
            .run("reorder_all", || self.reorder_all_once(container, keys))
            .await
    }

    /// Keys of the container's active members, in order.
    ///
    /// # Errors
    /// Returns `OrderError::Store` if the store cannot be read.
    pub async fn list(&self, container: &S::Container) -> Result<Vec<S::Key>, OrderError> {
        let mut tx = self.store.begin().await?;
        let rows = tx.rows(container).await?;
        tx.commit().await?;
        Ok(rows.into_iter().map(|row| row.key).collect())
    }

    /// Check the container against the dense-ordering invariant.
    ///
    /// # Errors
    /// Returns `OrderError::Store` if the store cannot be read.
    pub async fn verify(&self, container: &S::Container) -> Result<DensityReport, OrderError> {
        let mut tx = self.store.begin().await?;
        let rows = tx.rows(container).await?;
        tx.commit().await?;
        Ok(DensityReport::from_orders(rows.into_iter().map(|row| row.order)))
    }

    /// Renumber the container densely, keeping the relative order. Returns
    /// the number of rows that moved.
    ///
    /// # Errors
    /// Same as [`Reorderer::upsert`].
    #[instrument(skip_all, fields(container = ?container))]
    pub async fn compact(&self, container: &S::Container) -> Result<usize, OrderError> {
        self.retry
            .run("compact", || self.compact_once(container))
            .await
    }

    async fn upsert_once(
        &self,
        container: &S::Container,
        key: &S::Key,
        desired: Option<Order>,
    ) -> Result<Order, OrderError> {
        let mut tx = self.store.begin().await?;
        let order = place(&mut tx, container, key, desired).await?;
        tx.commit().await?;
        Ok(order)
    }

    async fn soft_delete_once(&self, container: &S::Container, key: &S::Key) -> Result<Order, OrderError> {
        let mut tx = self.store.begin().await?;
        let Some(order) = tx.mark_deleted(container, key).await? else {
            return Err(OrderError::validation(format!(
                "{key:?} is not a member of {container:?}"
            )));
        };
        tx.commit().await?;
        debug!(order, "soft-deleted row keeps its order");
        Ok(order)
    }

    async fn remove_once(
        &self,
        container: &S::Container,
        key: &S::Key,
        soft_deleted: bool,
    ) -> Result<(), OrderError> {
        let mut tx = self.store.begin().await?;
        if soft_deleted {
            if !tx.delete(container, key).await? {
                return Err(OrderError::validation(format!(
                    "{key:?} is not a member of {container:?}"
                )));
            }
        } else {
            take_out(&mut tx, container, key).await?;
        }
        tx.commit().await?;
        Ok(())
    }

    async fn reorder_all_once(
        &self,
        container: &S::Container,
        keys: &[S::Key],
    ) -> Result<usize, OrderError> {
        let mut tx = self.store.begin().await?;
        let rows = lock_dense(&mut tx, container).await?;
        let mut current: Vec<S::Key> = rows.into_iter().map(|row| row.key).collect();
        check_permutation(&current, keys)?;

        let count = as_order(current.len())?;
        let mut moves = 0;
        for (index, key) in keys.iter().enumerate() {
            if current[index] == *key {
                continue;
            }
            // Everything before `index` is already final, so `key` sits after it.
            let from = current
                .iter()
                .position(|candidate| candidate == key)
                .ok_or_else(|| OrderError::validation(format!("{key:?} vanished while reordering")))?;
            relocate(&mut tx, container, key, as_order(from)?, as_order(index)?, count).await?;
            let moved = current.remove(from);
            current.insert(index, moved);
            moves += 1;
        }

        tx.commit().await?;
        debug!(moves, "container reordered");
        Ok(moves)
    }

    async fn compact_once(&self, container: &S::Container) -> Result<usize, OrderError> {
        let mut tx = self.store.begin().await?;
        let mut rows = tx.lock_container(container).await?;
        rows.sort_by_key(|row| row.order);
        let moved = densify(&mut tx, container, &mut rows).await?;
        tx.commit().await?;
        Ok(moved)
    }
}

/// `desired` must be a permutation of `current`.
fn check_permutation<K: Eq + Hash + Debug>(current: &[K], desired: &[K]) -> Result<(), OrderError> {
    let wanted: HashSet<&K> = desired.iter().collect();
    if wanted.len() != desired.len() {
        return Err(OrderError::validation("new order lists a member more than once"));
    }
    let existing: HashSet<&K> = current.iter().collect();
    if wanted != existing {
        let missing = existing.difference(&wanted).count();
        let unknown = wanted.difference(&existing).count();
        return Err(OrderError::validation(format!(
            "can only change the order, not add or remove members ({missing} missing, {unknown} unknown)"
        )));
    }
    Ok(())
}

/// Lock the container and return its rows in ascending order, renumbering
/// them first if they are not exactly `0..count`.
async fn lock_dense<T: IndexTx>(
    tx: &mut T,
    container: &T::Container,
) -> Result<Vec<OrderedRow<T::Key>>, StoreError> {
    let mut rows = tx.lock_container(container).await?;
    rows.sort_by_key(|row| row.order);
    let moved = densify(tx, container, &mut rows).await?;
    if moved > 0 {
        warn!(?container, moved, "container had gaps; renumbered before reordering");
    }
    Ok(rows)
}

/// Renumber ascending `rows` to `0..len`. Rows already in place stay put; the
/// others are parked above every current order and then written to their
/// index, which is free once they are parked.
async fn densify<T: IndexTx>(
    tx: &mut T,
    container: &T::Container,
    rows: &mut [OrderedRow<T::Key>],
) -> Result<usize, StoreError> {
    let mut stale = Vec::new();
    for (index, row) in rows.iter().enumerate() {
        let index = as_order(index)?;
        if row.order != index {
            stale.push(index);
        }
    }
    if stale.is_empty() {
        return Ok(0);
    }

    let highest = rows.iter().map(|row| row.order).max().unwrap_or(0);
    let parking = highest.max(as_order(rows.len())?) + PARKING_GAP;
    for &index in &stale {
        let row = &rows[index as usize];
        tx.put(container, &row.key, parking + index).await?;
    }
    for &index in &stale {
        let row = &mut rows[index as usize];
        tx.put(container, &row.key, index).await?;
        row.order = index;
    }
    Ok(stale.len())
}

/// Move the run `span` by `step` (±1) through the parking range, leaving
/// `except` parked for the caller to place.
async fn shift<T: IndexTx>(
    tx: &mut T,
    container: &T::Container,
    span: RangeInclusive<Order>,
    step: Order,
    except: Option<&T::Key>,
    count: Order,
) -> Result<(), StoreError> {
    let parking = count + PARKING_GAP;
    let (low, high) = span.into_inner();
    tx.offset_orders(container, low..=high, parking, None).await?;
    tx.offset_orders(container, low + parking..=high + parking, step - parking, except)
        .await?;
    Ok(())
}

/// Move an existing member from `current` to `target`; siblings in between
/// shift one step toward `current`.
async fn relocate<T: IndexTx>(
    tx: &mut T,
    container: &T::Container,
    key: &T::Key,
    current: Order,
    target: Order,
    count: Order,
) -> Result<(), StoreError> {
    if current == target {
        return tx.put(container, key, current).await;
    }
    let (span, step) = if current < target {
        (current..=target, -1)
    } else {
        (target..=current, 1)
    };
    shift(tx, container, span, step, Some(key), count).await?;
    tx.put(container, key, target).await
}

async fn place<T: IndexTx>(
    tx: &mut T,
    container: &T::Container,
    key: &T::Key,
    desired: Option<Order>,
) -> Result<Order, OrderError> {
    let rows = lock_dense(tx, container).await?;
    let count = as_order(rows.len())?;
    let current = rows.iter().find(|row| row.key == *key).map(|row| row.order);

    let mut order = match current {
        None => {
            let target = desired.map_or(count, |order| order.min(count));
            if target < count {
                shift(tx, container, target..=count - 1, 1, None, count).await?;
            }
            tx.put(container, key, target).await?;
            debug!(order = target, count, "inserted");
            target
        }
        Some(current) => {
            let target = desired.map_or(current, |order| order.min(count - 1));
            relocate(tx, container, key, current, target, count).await?;
            debug!(from = current, to = target, "moved");
            target
        }
    };

    let last = tx.count(container).await? - 1;
    if order > last {
        warn!(order, last, "order past the end of the container, clamping");
        tx.put(container, key, last).await?;
        order = last;
    }
    Ok(order)
}

/// Delete an active member and shift everything after it down by one. A row
/// that exists but is soft-deleted is deleted without reordering.
async fn take_out<T: IndexTx>(
    tx: &mut T,
    container: &T::Container,
    key: &T::Key,
) -> Result<(), OrderError> {
    let rows = lock_dense(tx, container).await?;
    let count = as_order(rows.len())?;
    let Some(current) = rows.iter().find(|row| row.key == *key).map(|row| row.order) else {
        if tx.delete(container, key).await? {
            return Ok(());
        }
        return Err(OrderError::validation(format!(
            "{key:?} is not a member of {container:?}"
        )));
    };

    tx.delete(container, key).await?;
    if current < count - 1 {
        shift(tx, container, current + 1..=count - 1, -1, None, count).await?;
    }
    debug!(order = current, count, "removed");
    Ok(())
}
