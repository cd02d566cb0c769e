use std::fmt::Debug;
use std::hash::Hash;

/// Zero-based position of an entity inside its container.
pub type Order = i32;

/// Capability implemented by anything that is ordered inside a container.
///
/// The engine only needs the identity used to recognize the member
/// (`ordered_key`), the container it lives in, and its order attribute.
/// For rows of a through table the ordered key is usually the referenced
/// entity's id rather than the row's own primary key.
pub trait OrderedEntity {
    type Key: Clone + Eq + Hash + Debug + Send + Sync;
    type Container: Clone + Eq + Hash + Debug + Send + Sync;

    fn ordered_key(&self) -> Self::Key;

    /// Must not change for an existing row; moving between containers is a
    /// remove followed by an upsert.
    fn container_key(&self) -> Self::Container;

    fn order(&self) -> Option<Order>;

    fn set_order(&mut self, order: Order);

    /// Soft-deleted entities keep their stale order and are never reordered.
    fn is_deleted(&self) -> bool {
        false
    }
}

/// A member known only by its keys.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntityRef<K, C> {
    key: K,
    container: C,
    order: Option<Order>,
    deleted: bool,
}

impl<K, C> EntityRef<K, C> {
    #[must_use]
    pub fn new(container: C, key: K) -> Self {
        Self {
            key,
            container,
            order: None,
            deleted: false,
        }
    }

    #[must_use]
    pub fn with_order(mut self, order: Order) -> Self {
        self.order = Some(order);
        self
    }

    #[must_use]
    pub fn deleted(mut self) -> Self {
        self.deleted = true;
        self
    }

    #[must_use]
    pub fn key(&self) -> &K {
        &self.key
    }

    #[must_use]
    pub fn container(&self) -> &C {
        &self.container
    }
}

impl<K, C> OrderedEntity for EntityRef<K, C>
where
    K: Clone + Eq + Hash + Debug + Send + Sync,
    C: Clone + Eq + Hash + Debug + Send + Sync,
{
    type Key = K;
    type Container = C;

    fn ordered_key(&self) -> K {
        self.key.clone()
    }

    fn container_key(&self) -> C {
        self.container.clone()
    }

    fn order(&self) -> Option<Order> {
        self.order
    }

    fn set_order(&mut self, order: Order) {
        self.order = Some(order);
    }

    fn is_deleted(&self) -> bool {
        self.deleted
    }
}
