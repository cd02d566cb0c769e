//! # orderkeeper
//!
//! Keeps a dense, zero-based `order` for entities grouped in containers
//! (steps of a lesson, lessons of a project) while several writers insert,
//! move and delete members of the same container at once.
//!
//! ## Model
//!
//! - Every active member of a container holds a distinct order in
//!   `0..count`. Soft-deleted members keep their stale order and are skipped.
//! - Anything implementing [`order::OrderedEntity`] can be ordered; the
//!   engine only reads its keys and writes its order attribute.
//!
//! ## Concurrency
//!
//! Each operation is one transaction that first locks every active row of the
//! container in descending order. Siblings move with a two-phase shift so the
//! `(container, order)` unique index never sees a duplicate, and transient
//! database failures (deadlocks, serialization failures, lock timeouts,
//! unique races) retry the whole transaction a bounded number of times.
//!
//! ## Storage
//!
//! [`store::PgIndexStore`] persists rows in `PostgreSQL` through `sqlx`;
//! [`store::MemoryStore`] is an in-process backend with the same locking and
//! constraint behavior.

pub mod cli;
pub mod order;
pub mod store;

#[allow(clippy::doc_markdown, clippy::needless_raw_string_hashes)]
pub mod built_info {
    include!(concat!(env!("OUT_DIR"), "/built.rs"));
}

pub const GIT_COMMIT_HASH: &str = match built_info::GIT_COMMIT_HASH {
    Some(hash) => hash,
    None => "unknown",
};

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_git_commit_hash_format() {
        if GIT_COMMIT_HASH == "unknown" {
            // Acceptable in non-git build environments
            return;
        }
        assert!(
            GIT_COMMIT_HASH.chars().all(|c| c.is_ascii_hexdigit()),
            "GIT_COMMIT_HASH should be a hex string, got: {GIT_COMMIT_HASH}"
        );
        assert!(
            GIT_COMMIT_HASH.len() >= 7,
            "GIT_COMMIT_HASH should be at least 7 characters long, got: {GIT_COMMIT_HASH}"
        );
    }
}
