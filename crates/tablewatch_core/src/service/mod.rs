//! Store facade consumed by application code.
//!
//! # Responsibility
//! - Compose predicates, storage, row codecs and change observation into the
//!   public query/write/observe API.
//! - Keep callers decoupled from SQL and threading details.

pub mod error;
pub mod store;

pub use error::{StoreError, StoreResult};
pub use store::Store;
