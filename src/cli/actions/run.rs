use crate::cli::actions::{Action, maintenance, members, schema};
use anyhow::Result;

/// Execute the provided action.
// This is the single dispatch point for all CLI actions.
/// # Errors
/// Returns an error if the action fails.
pub async fn execute(action: Action) -> Result<()> {
    match action {
        Action::Schema(table) => {
            schema::print(&table);
            Ok(())
        }
        Action::Init(globals) => schema::init(&globals).await,
        Action::List(target) => members::list(&target).await,
        Action::Upsert {
            target,
            key,
            order,
            deleted,
        } => members::upsert(&target, key, order, deleted).await,
        Action::Remove {
            target,
            key,
            deleted,
        } => members::remove(&target, key, deleted).await,
        Action::Reorder { target, keys } => members::reorder(&target, &keys).await,
        Action::Check(target) => maintenance::check(&target).await,
        Action::Compact(target) => maintenance::compact(&target).await,
    }
}
