//! Dense ordering of entities within a container.
//!
//! Every active entity of a container holds a distinct `order` in
//! `0..count`. [`Reorderer`] maintains that under inserts, moves, deletions
//! and whole-container permutations, shifting siblings as needed inside a
//! single locked transaction per operation.

pub mod engine;
pub mod entity;
pub mod error;
pub mod report;
pub mod retry;

pub use self::engine::Reorderer;
pub use self::entity::{EntityRef, Order, OrderedEntity};
pub use self::error::OrderError;
pub use self::report::DensityReport;
pub use self::retry::RetryPolicy;
