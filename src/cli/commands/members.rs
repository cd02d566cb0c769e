use clap::{Arg, ArgAction, ArgMatches, Command};
use uuid::Uuid;

pub const ARG_CONTAINER: &str = "container";
pub const ARG_KEY: &str = "key";
pub const ARG_ORDER: &str = "order";
pub const ARG_DELETED: &str = "deleted";
pub const ARG_KEYS: &str = "keys";

fn container_arg() -> Arg {
    Arg::new(ARG_CONTAINER)
        .short('c')
        .long(ARG_CONTAINER)
        .help("Container key (ignored for tables without a container column)")
        .default_value("00000000-0000-0000-0000-000000000000")
        .value_parser(clap::value_parser!(Uuid))
}

fn key_arg() -> Arg {
    Arg::new(ARG_KEY)
        .short('k')
        .long(ARG_KEY)
        .help("Ordered key of the member")
        .required(true)
        .value_parser(clap::value_parser!(Uuid))
}

fn deleted_arg(help: &'static str) -> Arg {
    Arg::new(ARG_DELETED)
        .long(ARG_DELETED)
        .help(help)
        .action(ArgAction::SetTrue)
}

#[must_use]
pub fn subcommands() -> Vec<Command> {
    vec![
        Command::new("schema").about("Print the DDL for the configured table"),
        Command::new("init").about("Create the table and its unique indexes if missing"),
        Command::new("list")
            .about("List the members of a container in order")
            .arg(container_arg()),
        Command::new("upsert")
            .about("Insert or move a member, shifting its siblings")
            .arg(container_arg())
            .arg(key_arg())
            .arg(
                Arg::new(ARG_ORDER)
                    .short('o')
                    .long(ARG_ORDER)
                    .help("Desired order; omit to append a new member or keep an existing one")
                    .allow_negative_numbers(true)
                    .value_parser(clap::value_parser!(i32)),
            )
            .arg(deleted_arg(
                "Soft-delete the member instead, keeping its order and skipping reordering",
            )),
        Command::new("remove")
            .about("Delete a member and close the gap it leaves")
            .arg(container_arg())
            .arg(key_arg())
            .arg(deleted_arg("The member is already soft-deleted; skip reordering")),
        Command::new("reorder")
            .about("Rearrange a container into exactly the given key order")
            .arg(container_arg())
            .arg(
                Arg::new(ARG_KEYS)
                    .long(ARG_KEYS)
                    .help("Every member key, comma separated, in the new order")
                    .required(true)
                    .num_args(1..)
                    .value_delimiter(',')
                    .value_parser(clap::value_parser!(Uuid)),
            ),
        Command::new("check")
            .about("Report whether a container's orders are dense")
            .arg(container_arg()),
        Command::new("compact")
            .about("Renumber a container densely, keeping the relative order")
            .arg(container_arg()),
    ]
}

/// # Errors
/// Returns an error if the container argument is missing.
pub fn container(matches: &ArgMatches) -> anyhow::Result<Uuid> {
    matches
        .get_one::<Uuid>(ARG_CONTAINER)
        .copied()
        .ok_or_else(|| anyhow::anyhow!("missing required argument: --{ARG_CONTAINER}"))
}

/// # Errors
/// Returns an error if the key argument is missing.
pub fn key(matches: &ArgMatches) -> anyhow::Result<Uuid> {
    matches
        .get_one::<Uuid>(ARG_KEY)
        .copied()
        .ok_or_else(|| anyhow::anyhow!("missing required argument: --{ARG_KEY}"))
}

#[must_use]
pub fn order(matches: &ArgMatches) -> Option<i32> {
    matches.get_one::<i32>(ARG_ORDER).copied()
}

#[must_use]
pub fn deleted(matches: &ArgMatches) -> bool {
    matches.get_flag(ARG_DELETED)
}

#[must_use]
pub fn keys(matches: &ArgMatches) -> Vec<Uuid> {
    matches
        .get_many::<Uuid>(ARG_KEYS)
        .map(|keys| keys.copied().collect())
        .unwrap_or_default()
}
