//! Cairn integration scenarios.
//!
//! End-to-end exercises of the checkpoint store over the in-memory record
//! store: round-trips through both split strategies, shard-set shape,
//! failure injection with rollback, and thread lifecycle.
//!
//!   cargo test --test integration


mod failures;
mod lifecycle;
mod splitting;

pub use infra::*;
