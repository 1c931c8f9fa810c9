//! Background execution and observer delivery threads.
//!
//! # Responsibility
//! - Run blocking store work off caller threads (`BackgroundExecutor`).
//! - Deliver observer callbacks serially per subscription on a small pool
//!   (`Dispatcher`, `DeliveryLane`).
//!
//! # Invariants
//! - No task or callback failure crosses back into application code.

pub mod dispatcher;
pub mod executor;

pub use dispatcher::{DeliveryLane, Dispatcher};
pub use executor::{BackgroundExecutor, ExecutorStats, SubmitOutcome, Task};
