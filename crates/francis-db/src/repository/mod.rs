//! # Repository Module
//!
//! Database repository implementations.
//!
//! ## Available Repositories
//!
//! - [`snapshot::SnapshotRepository`] - Versioned JSON snapshots of engine collections

pub mod snapshot;
