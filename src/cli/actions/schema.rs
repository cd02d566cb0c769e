use crate::cli::actions::{connect, print_json};
use crate::cli::globals::GlobalArgs;
use crate::store::OrderedTable;
use anyhow::{Context, Result};
use serde::Serialize;
use tracing::info;

#[derive(Debug, Serialize)]
struct Applied<'a> {
    table: &'a str,
    statements: usize,
}

fn render(table: &OrderedTable) -> String {
    table
        .schema_statements()
        .iter()
        .map(|statement| format!("{statement};\n"))
        .collect()
}

/// Print the DDL for the configured table.
pub fn print(table: &OrderedTable) {
    print!("{}", render(table));
}

/// Apply the DDL for the configured table.
/// # Errors
/// Returns an error if the connection or any statement fails.
pub async fn init(globals: &GlobalArgs) -> Result<()> {
    let store = connect(globals).await?;
    store
        .apply_schema()
        .await
        .with_context(|| format!("failed to create {}", globals.table.table()))?;
    info!(table = globals.table.table(), "schema applied");

    print_json(&Applied {
        table: globals.table.table(),
        statements: globals.table.schema_statements().len(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn render_terminates_every_statement() {
        let table = OrderedTable::new("steps")
            .with_container_column("lesson_id")
            .with_deleted_column("is_deleted");
        let sql = render(&table);
        assert_eq!(sql.matches(";\n").count(), 3);
        assert!(sql.starts_with("CREATE TABLE IF NOT EXISTS \"steps\""), "{sql}");
        assert!(sql.contains("WHERE NOT \"is_deleted\""), "{sql}");
    }
}
