pub mod cache;
pub mod discovery;
pub mod registry;
pub mod router;
pub mod watch;

pub use cache::{CacheEntry, InstanceCache};
pub use discovery::{DiscoveryError, DiscoveryService};
pub use registry::{InstanceRecord, Registration, RegistryGateway};
pub use watch::{PendingLookupPolicy, WatchCoordinator};
