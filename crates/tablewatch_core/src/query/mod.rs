//! Filter construction for store reads and writes.
//!
//! # Responsibility
//! - Provide the only structured way callers express row filters.
//! - Keep placeholder/value alignment inside one builder type.

pub mod predicate;
