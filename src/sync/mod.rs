//! Client-side data synchronization for task queries.
//!
//! Keeps an in-memory cache of query results consistent with the remote
//! store:
//! - structural query keys with a prefix hierarchy for invalidation
//! - read-through caching with single-flight de-duplication
//! - optimistic mutations with snapshot and exact rollback on failure
//! - a pure invalidation policy mapping mutations to stale key families

mod cache;
mod engine;
mod key;
mod mutation;
mod policy;

pub use cache::{CacheEntry, CacheEvent, CacheValue, EntryStatus, TaskCache};
pub use engine::{SyncEngine, SyncEvent, WatchGuard};
pub use key::{KeyPrefix, QueryKey};
pub use mutation::{Mutation, MutationCoordinator, SyncError};
pub use policy::MutationKind;
