//! Watch coordinator module
//!
//! - `coordinator`: elects one initializer per service name and owns the background watches
//! - `subscription`: per-name subscription record and the initializer handle

pub mod coordinator;
pub mod subscription;

pub use coordinator::{Acquired, PendingLookupPolicy, WatchCoordinator};
pub use subscription::{Initializer, WatchSubscription};
