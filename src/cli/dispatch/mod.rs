//! Command-line argument dispatch.
//!
//! Maps validated CLI matches to an [`Action`]. Every subcommand except
//! `schema` needs a database, so the connection settings are parsed here once.

use crate::cli::actions::{Action, Target};
use crate::cli::commands::{database, members, table};
use crate::cli::globals::GlobalArgs;
use crate::order::RetryPolicy;
use anyhow::{Result, bail};

/// Map validated CLI matches to an action.
///
/// # Errors
/// Returns an error if required arguments are missing or inconsistent.
pub fn handler(matches: &clap::ArgMatches) -> Result<Action> {
    let table = table::parse(matches)?;

    let Some((name, sub)) = matches.subcommand() else {
        bail!("missing subcommand");
    };
    if name == "schema" {
        return Ok(Action::Schema(table));
    }

    let options = database::Options::parse(matches)?;
    let mut globals = GlobalArgs::new(options.dsn, table);
    globals.max_connections = options.max_connections;
    globals.retry = RetryPolicy::default().with_max_attempts(options.max_attempts);
    globals.lock_timeout = options.lock_timeout;

    let target = |globals| -> Result<Target> {
        Ok(Target {
            globals,
            container: members::container(sub)?,
        })
    };

    Ok(match name {
        "init" => Action::Init(globals),
        "list" => Action::List(target(globals)?),
        "upsert" => Action::Upsert {
            target: target(globals)?,
            key: members::key(sub)?,
            order: members::order(sub),
            deleted: members::deleted(sub),
        },
        "remove" => Action::Remove {
            target: target(globals)?,
            key: members::key(sub)?,
            deleted: members::deleted(sub),
        },
        "reorder" => Action::Reorder {
            target: target(globals)?,
            keys: members::keys(sub),
        },
        "check" => Action::Check(target(globals)?),
        "compact" => Action::Compact(target(globals)?),
        other => bail!("unknown subcommand: {other}"),
    })
}
