//! # ReplicaDB Testkit
//!
//! Test utilities for ReplicaDB.
//!
//! This crate provides:
//! - Sample schemas and records shared by tests and benchmarks
//! - An in-memory cache harness
//! - Temporary fixture files for CLI tests
//! - Property-based test generators using proptest
//!
//! ## Usage
//!
//! ```rust
//! use replicadb_testkit::prelude::*;
//!
//! with_test_cache(users_schema(), |cache| {
//!     cache.target.apply_dump(&[user_entry(1)], true).unwrap();
//!     assert_eq!(cache.rows("users").len(), 1);
//! });
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

pub mod fixtures;
pub mod generators;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::fixtures::*;
    pub use crate::generators::*;
}

pub use fixtures::*;
pub use generators::*;
