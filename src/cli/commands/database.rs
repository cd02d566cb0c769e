use clap::{Arg, ArgMatches, Command};
use secrecy::SecretString;
use std::time::Duration;

pub const ARG_DSN: &str = "dsn";
pub const ARG_MAX_CONNECTIONS: &str = "max-connections";
pub const ARG_MAX_ATTEMPTS: &str = "max-attempts";
pub const ARG_LOCK_TIMEOUT_MS: &str = "lock-timeout-ms";

#[derive(Debug)]
pub struct Options {
    pub dsn: SecretString,
    pub max_connections: u32,
    pub max_attempts: u32,
    pub lock_timeout: Option<Duration>,
}

impl Options {
    /// Parse connection and retry arguments from matches.
    ///
    /// # Errors
    /// Returns an error if `--dsn` is missing or empty.
    pub fn parse(matches: &ArgMatches) -> anyhow::Result<Self> {
        let dsn = matches
            .get_one::<String>(ARG_DSN)
            .filter(|v| !v.trim().is_empty())
            .cloned()
            .ok_or_else(|| anyhow::anyhow!("missing required argument: --{ARG_DSN}"))?;

        // 0 leaves lock waits to the server default
        let lock_timeout = matches
            .get_one::<u64>(ARG_LOCK_TIMEOUT_MS)
            .copied()
            .filter(|ms| *ms > 0)
            .map(Duration::from_millis);

        Ok(Self {
            dsn: SecretString::from(dsn),
            max_connections: matches
                .get_one::<u32>(ARG_MAX_CONNECTIONS)
                .copied()
                .unwrap_or(5),
            max_attempts: matches.get_one::<u32>(ARG_MAX_ATTEMPTS).copied().unwrap_or(5),
            lock_timeout,
        })
    }
}

#[must_use]
pub fn with_args(command: Command) -> Command {
    command
        .arg(
            Arg::new(ARG_DSN)
                .short('d')
                .long(ARG_DSN)
                .help("Database connection string")
                .long_help(
                    "PostgreSQL connection string. Required by every subcommand except `schema`.",
                )
                .env("ORDERKEEPER_DSN")
                .hide_env_values(true)
                .global(true),
        )
        .arg(
            Arg::new(ARG_MAX_CONNECTIONS)
                .long(ARG_MAX_CONNECTIONS)
                .help("Maximum connections in the database pool")
                .env("ORDERKEEPER_MAX_CONNECTIONS")
                .default_value("5")
                .global(true)
                .value_parser(clap::value_parser!(u32).range(1..)),
        )
        .arg(
            Arg::new(ARG_MAX_ATTEMPTS)
                .long(ARG_MAX_ATTEMPTS)
                .help("Attempts per operation before giving up on transient failures")
                .env("ORDERKEEPER_MAX_ATTEMPTS")
                .default_value("5")
                .global(true)
                .value_parser(clap::value_parser!(u32).range(1..)),
        )
        .arg(
            Arg::new(ARG_LOCK_TIMEOUT_MS)
                .long(ARG_LOCK_TIMEOUT_MS)
                .help("Abort row lock waits after this many milliseconds (0 disables)")
                .env("ORDERKEEPER_LOCK_TIMEOUT_MS")
                .default_value("0")
                .global(true)
                .value_parser(clap::value_parser!(u64)),
        )
}
