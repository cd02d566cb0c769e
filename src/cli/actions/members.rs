use crate::cli::actions::{Target, print_json, reorderer};
use crate::order::{EntityRef, Order};
use anyhow::{Context, Result};
use serde::Serialize;
use uuid::Uuid;

#[derive(Debug, Serialize)]
struct Listing {
    container: Uuid,
    keys: Vec<Uuid>,
}

#[derive(Debug, Serialize)]
struct Placed {
    container: Uuid,
    key: Uuid,
    order: Order,
    deleted: bool,
}

#[derive(Debug, Serialize)]
struct Removed {
    container: Uuid,
    key: Uuid,
}

#[derive(Debug, Serialize)]
struct Reordered {
    container: Uuid,
    moves: usize,
}

/// # Errors
/// Returns an error if the store cannot be read.
pub async fn list(target: &Target) -> Result<()> {
    let engine = reorderer(&target.globals).await?;
    let keys = engine.list(&target.container).await?;
    print_json(&Listing {
        container: target.container,
        keys,
    })
}

/// # Errors
/// Returns an error if the member cannot be placed.
pub async fn upsert(target: &Target, key: Uuid, order: Option<Order>, deleted: bool) -> Result<()> {
    let engine = reorderer(&target.globals).await?;
    let mut member = EntityRef::new(target.container, key);
    if deleted {
        member = member.deleted();
    }
    let order = engine
        .upsert(&mut member, order)
        .await
        .with_context(|| format!("failed to place {key}"))?;
    print_json(&Placed {
        container: target.container,
        key,
        order,
        deleted,
    })
}

/// # Errors
/// Returns an error if the member cannot be removed.
pub async fn remove(target: &Target, key: Uuid, deleted: bool) -> Result<()> {
    let engine = reorderer(&target.globals).await?;
    let mut member = EntityRef::new(target.container, key);
    if deleted {
        member = member.deleted();
    }
    engine
        .remove(&member)
        .await
        .with_context(|| format!("failed to remove {key}"))?;
    print_json(&Removed {
        container: target.container,
        key,
    })
}

/// # Errors
/// Returns an error if `keys` is not the container's membership or the store fails.
pub async fn reorder(target: &Target, keys: &[Uuid]) -> Result<()> {
    let engine = reorderer(&target.globals).await?;
    let moves = engine
        .reorder_all(&target.container, keys)
        .await
        .with_context(|| format!("failed to reorder {}", target.container))?;
    print_json(&Reordered {
        container: target.container,
        moves,
    })
}
