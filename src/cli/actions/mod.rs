pub mod maintenance;
pub mod members;
pub mod schema;

// Internal "interpreter" for `Action`.
mod run;

use crate::cli::globals::GlobalArgs;
use crate::order::Reorderer;
use crate::store::{OrderedTable, PgIndexStore};
use anyhow::{Context, Result};
use secrecy::ExposeSecret;
use serde::Serialize;
use sqlx::postgres::PgPoolOptions;
use tracing::info;
use uuid::Uuid;

/// A container inside the configured table.
#[derive(Debug)]
pub struct Target {
    pub globals: GlobalArgs,
    pub container: Uuid,
}

#[derive(Debug)]
pub enum Action {
    Schema(OrderedTable),
    Init(GlobalArgs),
    List(Target),
    Upsert {
        target: Target,
        key: Uuid,
        order: Option<i32>,
        deleted: bool,
    },
    Remove {
        target: Target,
        key: Uuid,
        deleted: bool,
    },
    Reorder {
        target: Target,
        keys: Vec<Uuid>,
    },
    Check(Target),
    Compact(Target),
}

impl Action {
    /// Execute the action.
    /// # Errors
    /// Returns an error if the action fails.
    pub async fn execute(self) -> Result<()> {
        run::execute(self).await
    }
}

/// Open a pool and wrap it in a store for the configured table.
async fn connect(globals: &GlobalArgs) -> Result<PgIndexStore> {
    info!(
        dsn = %globals.redacted_dsn(),
        table = globals.table.table(),
        max_connections = globals.max_connections,
        "connecting"
    );
    let pool = PgPoolOptions::new()
        .max_connections(globals.max_connections)
        .connect(globals.dsn.expose_secret())
        .await
        .context("failed to connect to database")?;

    let store = PgIndexStore::new(pool, globals.table.clone())?;
    Ok(match globals.lock_timeout {
        Some(timeout) => store.with_lock_timeout(timeout),
        None => store,
    })
}

async fn reorderer(globals: &GlobalArgs) -> Result<Reorderer<PgIndexStore>> {
    let store = connect(globals).await?;
    Ok(Reorderer::new(store).with_retry_policy(globals.retry))
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    let json = serde_json::to_string_pretty(value)?;
    println!("{json}");
    Ok(())
}
