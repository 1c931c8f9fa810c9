//! Table change observation.

pub mod registry;

pub use registry::{
    BasicObserver, ChangeRegistry, ContentObserver, SubscriptionId, SubscriptionKind,
};
