//! In-memory index store.
//!
//! Each container lives behind its own async mutex. A transaction takes that
//! mutex the first time it touches the container and keeps it until commit or
//! drop, which gives the same per-container serialization as the row locks of
//! the `PostgreSQL` store. Writes go to a staged copy that is published on
//! commit and discarded on drop.
//!
//! A container that no transaction holds and that has no rows left, active or
//! soft-deleted, is dropped from the store when the last transaction touching
//! it ends.
//!
//! Unique constraints are checked row by row, the way a non-deferred unique
//! index is, so a range update that would momentarily collide fails with
//! `StoreError::UniqueViolation`.

use super::{IndexStore, IndexTx, OrderedRow, StoreError};
use crate::order::Order;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::collections::hash_map::Entry;
use std::fmt::Debug;
use std::hash::Hash;
use std::ops::RangeInclusive;
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Slot {
    order: Order,
    deleted: bool,
}

type Rows<K> = HashMap<K, Slot>;

#[derive(Debug)]
struct Shared<K, C> {
    containers: Mutex<HashMap<C, Arc<AsyncMutex<Rows<K>>>>>,
    injected_failures: AtomicU32,
}

impl<K, C> Shared<K, C>
where
    C: Clone + Eq + Hash,
{
    fn container(&self, container: &C) -> Arc<AsyncMutex<Rows<K>>> {
        let mut containers = self.containers.lock();
        Arc::clone(
            containers
                .entry(container.clone())
                .or_insert_with(|| Arc::new(AsyncMutex::new(HashMap::new()))),
        )
    }
}

impl<K, C> Shared<K, C>
where
    C: Eq + Hash,
{
    /// Forget the given containers if they are idle and empty. The map lock
    /// is held across the check, so no other transaction can pick up the
    /// entry in between.
    fn release(&self, released: impl IntoIterator<Item = C>) {
        let mut containers = self.containers.lock();
        for container in released {
            let Entry::Occupied(entry) = containers.entry(container) else {
                continue;
            };
            let idle = Arc::strong_count(entry.get()) == 1
                && entry.get().try_lock().is_ok_and(|rows| rows.is_empty());
            if idle {
                entry.remove();
            }
        }
    }
}

#[derive(Debug)]
pub struct MemoryStore<K, C> {
    shared: Arc<Shared<K, C>>,
}

impl<K, C> MemoryStore<K, C> {
    #[must_use]
    pub fn new() -> Self {
        Self {
            shared: Arc::new(Shared {
                containers: Mutex::new(HashMap::new()),
                injected_failures: AtomicU32::new(0),
            }),
        }
    }

    /// Make the next `count` commits fail with a serialization failure.
    pub fn fail_next_commits(&self, count: u32) {
        self.shared.injected_failures.store(count, Ordering::SeqCst);
    }
}

impl<K, C> Default for MemoryStore<K, C> {
    fn default() -> Self {
        Self::new()
    }
}

impl<K, C> Clone for MemoryStore<K, C> {
    fn clone(&self) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
        }
    }
}

impl<K, C> IndexStore for MemoryStore<K, C>
where
    K: Clone + Eq + Hash + Debug + Send + Sync,
    C: Clone + Eq + Hash + Debug + Send + Sync,
{
    type Key = K;
    type Container = C;
    type Tx = MemoryTx<K, C>;

    async fn begin(&self) -> Result<MemoryTx<K, C>, StoreError> {
        Ok(MemoryTx {
            shared: Arc::clone(&self.shared),
            open: HashMap::new(),
        })
    }
}

#[derive(Debug)]
struct Staged<K> {
    guard: OwnedMutexGuard<Rows<K>>,
    rows: Rows<K>,
}

#[derive(Debug)]
pub struct MemoryTx<K, C>
where
    C: Eq + Hash,
{
    shared: Arc<Shared<K, C>>,
    open: HashMap<C, Staged<K>>,
}

impl<K, C> Drop for MemoryTx<K, C>
where
    C: Eq + Hash,
{
    fn drop(&mut self) {
        // Draining drops the guards before the release check.
        let touched: Vec<C> = self.open.drain().map(|(container, _)| container).collect();
        self.shared.release(touched);
    }
}

impl<K, C> MemoryTx<K, C>
where
    K: Clone + Eq + Hash + Debug + Send + Sync,
    C: Clone + Eq + Hash + Debug + Send + Sync,
{
    /// The staged rows of `container`, locking it on first use.
    async fn staged(&mut self, container: &C) -> &mut Rows<K> {
        let staged = match self.open.entry(container.clone()) {
            Entry::Occupied(entry) => entry.into_mut(),
            Entry::Vacant(entry) => {
                let guard = self.shared.container(container).lock_owned().await;
                let rows = guard.clone();
                entry.insert(Staged { guard, rows })
            }
        };
        &mut staged.rows
    }

    async fn active(&mut self, container: &C) -> Vec<OrderedRow<K>> {
        let rows = self.staged(container).await;
        let mut active: Vec<_> = rows
            .iter()
            .filter(|(_, slot)| !slot.deleted)
            .map(|(key, slot)| OrderedRow::new(key.clone(), slot.order))
            .collect();
        active.sort_by_key(|row| row.order);
        active
    }
}

fn collision<K: PartialEq>(rows: &Rows<K>, key: &K, order: Order) -> bool {
    rows.iter()
        .any(|(other, slot)| other != key && !slot.deleted && slot.order == order)
}

impl<K, C> IndexTx for MemoryTx<K, C>
where
    K: Clone + Eq + Hash + Debug + Send + Sync,
    C: Clone + Eq + Hash + Debug + Send + Sync,
{
    type Key = K;
    type Container = C;

    async fn lock_container(&mut self, container: &C) -> Result<Vec<OrderedRow<K>>, StoreError> {
        let mut rows = self.active(container).await;
        rows.reverse();
        Ok(rows)
    }

    async fn rows(&mut self, container: &C) -> Result<Vec<OrderedRow<K>>, StoreError> {
        Ok(self.active(container).await)
    }

    async fn count(&mut self, container: &C) -> Result<Order, StoreError> {
        let count = self.active(container).await.len();
        Order::try_from(count)
            .map_err(|_| StoreError::Backend(format!("container holds {count} rows")))
    }

    async fn put(&mut self, container: &C, key: &K, order: Order) -> Result<(), StoreError> {
        let rows = self.staged(container).await;
        if collision(rows, key, order) {
            return Err(StoreError::UniqueViolation(format!(
                "order {order} already taken in container {container:?}"
            )));
        }
        rows.insert(
            key.clone(),
            Slot {
                order,
                deleted: false,
            },
        );
        Ok(())
    }

    async fn delete(&mut self, container: &C, key: &K) -> Result<bool, StoreError> {
        Ok(self.staged(container).await.remove(key).is_some())
    }

    async fn mark_deleted(&mut self, container: &C, key: &K) -> Result<Option<Order>, StoreError> {
        let rows = self.staged(container).await;
        Ok(rows.get_mut(key).map(|slot| {
            slot.deleted = true;
            slot.order
        }))
    }

    async fn offset_orders(
        &mut self,
        container: &C,
        span: RangeInclusive<Order>,
        delta: Order,
        except: Option<&K>,
    ) -> Result<u64, StoreError> {
        let rows = self.staged(container).await;
        let targets: Vec<K> = rows
            .iter()
            .filter(|(key, slot)| {
                !slot.deleted && span.contains(&slot.order) && except != Some(*key)
            })
            .map(|(key, _)| key.clone())
            .collect();

        // Row-at-a-time, in no particular order, like a non-deferred index.
        for key in &targets {
            let Some(order) = rows.get(key).map(|slot| slot.order + delta) else {
                continue;
            };
            if collision(rows, key, order) {
                return Err(StoreError::UniqueViolation(format!(
                    "order {order} already taken in container {container:?}"
                )));
            }
            if let Some(slot) = rows.get_mut(key) {
                slot.order = order;
            }
        }
        Ok(targets.len() as u64)
    }

    async fn commit(mut self) -> Result<(), StoreError> {
        let injected = self
            .shared
            .injected_failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |left| left.checked_sub(1));
        if injected.is_ok() {
            return Err(StoreError::Serialization(
                "could not serialize access due to concurrent update".to_string(),
            ));
        }

        let mut touched = Vec::with_capacity(self.open.len());
        for (container, staged) in std::mem::take(&mut self.open) {
            let Staged { mut guard, rows } = staged;
            *guard = rows;
            touched.push(container);
        }
        self.shared.release(touched);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    type Store = MemoryStore<&'static str, u32>;

    async fn seed(store: &Store, keys: &[&'static str]) -> Result<(), StoreError> {
        let mut tx = store.begin().await?;
        for (order, key) in keys.iter().enumerate() {
            tx.put(&1, key, Order::try_from(order).unwrap_or(Order::MAX)).await?;
        }
        tx.commit().await
    }

    async fn keys(store: &Store) -> Result<Vec<&'static str>, StoreError> {
        let mut tx = store.begin().await?;
        let rows = tx.rows(&1).await?;
        Ok(rows.into_iter().map(|row| row.key).collect())
    }

    fn tracked(store: &Store) -> usize {
        store.shared.containers.lock().len()
    }

    #[tokio::test]
    async fn idle_empty_containers_are_forgotten() -> Result<(), StoreError> {
        let store = Store::new();
        let mut tx = store.begin().await?;
        assert!(tx.rows(&5).await?.is_empty());
        assert_eq!(tracked(&store), 1);
        drop(tx);
        assert_eq!(tracked(&store), 0);

        seed(&store, &["a"]).await?;
        assert_eq!(tracked(&store), 1);
        let mut tx = store.begin().await?;
        assert!(tx.delete(&1, &"a").await?);
        tx.commit().await?;
        assert_eq!(tracked(&store), 0);
        Ok(())
    }

    #[tokio::test]
    async fn held_containers_are_kept() -> Result<(), StoreError> {
        let store = Store::new();
        let mut holder = store.begin().await?;
        assert!(holder.rows(&5).await?.is_empty());
        let mut reader = store.begin().await?;
        assert!(reader.rows(&6).await?.is_empty());
        drop(reader);
        assert_eq!(tracked(&store), 1);

        seed(&store, &["a"]).await?;
        let mut tx = store.begin().await?;
        assert_eq!(tx.mark_deleted(&1, &"a").await?, Some(0));
        tx.commit().await?;
        // Soft-deleted rows still count as content.
        assert_eq!(tracked(&store), 2);
        drop(holder);
        assert_eq!(tracked(&store), 1);
        Ok(())
    }

    #[tokio::test]
    async fn commit_publishes_staged_rows() -> Result<(), StoreError> {
        let store = Store::new();
        seed(&store, &["a", "b", "c"]).await?;
        assert_eq!(keys(&store).await?, vec!["a", "b", "c"]);
        Ok(())
    }

    #[tokio::test]
    async fn dropped_transaction_rolls_back() -> Result<(), StoreError> {
        let store = Store::new();
        seed(&store, &["a", "b"]).await?;
        {
            let mut tx = store.begin().await?;
            tx.delete(&1, &"a").await?;
        }
        assert_eq!(keys(&store).await?, vec!["a", "b"]);
        Ok(())
    }

    #[tokio::test]
    async fn put_rejects_taken_order() -> Result<(), StoreError> {
        let store = Store::new();
        seed(&store, &["a", "b"]).await?;
        let mut tx = store.begin().await?;
        let err = tx.put(&1, &"c", 1).await;
        assert!(matches!(err, Err(StoreError::UniqueViolation(_))));
        Ok(())
    }

    #[tokio::test]
    async fn in_place_shift_into_sibling_collides() -> Result<(), StoreError> {
        let store = Store::new();
        seed(&store, &["a", "b", "c"]).await?;
        let mut tx = store.begin().await?;
        // "b" moving from 1 to 2 always lands on "c".
        let err = tx.offset_orders(&1, 0..=1, 1, None).await;
        assert!(matches!(err, Err(StoreError::UniqueViolation(_))));
        Ok(())
    }

    #[tokio::test]
    async fn parked_shift_never_collides() -> Result<(), StoreError> {
        let store = Store::new();
        seed(&store, &["a", "b", "c"]).await?;
        let mut tx = store.begin().await?;
        assert_eq!(tx.offset_orders(&1, 0..=2, 1003, None).await?, 3);
        assert_eq!(tx.offset_orders(&1, 1003..=1005, -1002, None).await?, 3);
        let rows = tx.rows(&1).await?;
        let orders: Vec<Order> = rows.iter().map(|row| row.order).collect();
        assert_eq!(orders, vec![1, 2, 3]);
        Ok(())
    }

    #[tokio::test]
    async fn soft_deleted_rows_leave_the_active_set() -> Result<(), StoreError> {
        let store = Store::new();
        seed(&store, &["a", "b"]).await?;
        let mut tx = store.begin().await?;
        assert_eq!(tx.mark_deleted(&1, &"a").await?, Some(0));
        assert_eq!(tx.mark_deleted(&1, &"zz").await?, None);
        assert_eq!(tx.count(&1).await?, 1);
        // The stale order no longer blocks an active row.
        tx.put(&1, &"c", 0).await?;
        tx.commit().await?;
        assert_eq!(keys(&store).await?, vec!["c", "b"]);
        Ok(())
    }

    #[tokio::test]
    async fn lock_container_returns_highest_order_first() -> Result<(), StoreError> {
        let store = Store::new();
        seed(&store, &["a", "b", "c"]).await?;
        let mut tx = store.begin().await?;
        let locked = tx.lock_container(&1).await?;
        let orders: Vec<Order> = locked.iter().map(|row| row.order).collect();
        assert_eq!(orders, vec![2, 1, 0]);
        Ok(())
    }

    #[tokio::test]
    async fn injected_failures_abort_commits() -> Result<(), StoreError> {
        let store = Store::new();
        store.fail_next_commits(1);
        let err = seed(&store, &["a"]).await;
        assert!(matches!(err, Err(StoreError::Serialization(_))));
        assert!(keys(&store).await?.is_empty());
        seed(&store, &["a"]).await?;
        assert_eq!(keys(&store).await?, vec!["a"]);
        Ok(())
    }

    #[tokio::test]
    async fn containers_are_isolated() -> Result<(), StoreError> {
        let store = Store::new();
        seed(&store, &["a"]).await?;
        let mut tx = store.begin().await?;
        tx.put(&2, &"a", 0).await?;
        tx.commit().await?;
        let mut tx = store.begin().await?;
        assert_eq!(tx.count(&1).await?, 1);
        assert_eq!(tx.count(&2).await?, 1);
        Ok(())
    }
}
