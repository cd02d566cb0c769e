use crate::store::OrderedTable;
use anyhow::Context;
use clap::{Arg, ArgMatches, Command};

pub const ARG_TABLE: &str = "table";
pub const ARG_KEY_COLUMN: &str = "key-column";
pub const ARG_CONTAINER_COLUMN: &str = "container-column";
pub const ARG_ORDER_COLUMN: &str = "order-column";
pub const ARG_DELETED_COLUMN: &str = "deleted-column";

/// Build the table layout from matches.
///
/// An empty `--container-column` makes the table one global container and
/// an empty `--deleted-column` disables soft deletes.
///
/// # Errors
/// Returns an error if a name is not a valid SQL identifier.
pub fn parse(matches: &ArgMatches) -> anyhow::Result<OrderedTable> {
    let get_non_empty = |id: &str| {
        matches
            .get_one::<String>(id)
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty())
    };

    let name = get_non_empty(ARG_TABLE)
        .ok_or_else(|| anyhow::anyhow!("missing required argument: --{ARG_TABLE}"))?;
    let mut table = OrderedTable::new(name);
    if let Some(column) = get_non_empty(ARG_KEY_COLUMN) {
        table = table.with_key_column(column);
    }
    if let Some(column) = get_non_empty(ARG_CONTAINER_COLUMN) {
        table = table.with_container_column(column);
    }
    if let Some(column) = get_non_empty(ARG_ORDER_COLUMN) {
        table = table.with_order_column(column);
    }
    if let Some(column) = get_non_empty(ARG_DELETED_COLUMN) {
        table = table.with_deleted_column(column);
    }

    table.validate().context("invalid table layout")?;
    Ok(table)
}

#[must_use]
pub fn with_args(command: Command) -> Command {
    command
        .arg(
            Arg::new(ARG_TABLE)
                .short('t')
                .long(ARG_TABLE)
                .help("Table holding the ordered rows, optionally schema-qualified")
                .env("ORDERKEEPER_TABLE")
                .default_value("ordered_members")
                .global(true),
        )
        .arg(
            Arg::new(ARG_KEY_COLUMN)
                .long(ARG_KEY_COLUMN)
                .help("Column holding the ordered key")
                .env("ORDERKEEPER_KEY_COLUMN")
                .default_value("id")
                .global(true),
        )
        .arg(
            Arg::new(ARG_CONTAINER_COLUMN)
                .long(ARG_CONTAINER_COLUMN)
                .help("Column holding the container key (empty for a single global container)")
                .env("ORDERKEEPER_CONTAINER_COLUMN")
                .default_value("container_id")
                .global(true),
        )
        .arg(
            Arg::new(ARG_ORDER_COLUMN)
                .long(ARG_ORDER_COLUMN)
                .help("Column holding the order")
                .env("ORDERKEEPER_ORDER_COLUMN")
                .default_value("order")
                .global(true),
        )
        .arg(
            Arg::new(ARG_DELETED_COLUMN)
                .long(ARG_DELETED_COLUMN)
                .help("Boolean soft-delete column (unset disables soft deletes)")
                .env("ORDERKEEPER_DELETED_COLUMN")
                .global(true),
        )
}
