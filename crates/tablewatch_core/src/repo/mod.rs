//! Persistence boundary.
//!
//! # Responsibility
//! - Define the statement-level storage contract used by the store facade.
//! - Isolate SQLite statement text from orchestration code.
//!
//! # Invariants
//! - Engine errors surface unchanged as `DbError`.

pub mod gateway;

pub use gateway::{SqliteGateway, StorageGateway};
