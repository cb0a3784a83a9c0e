//! The `Storage` contract consumed by the security and node-leasing
//! components. This crate defines the contract only; a reference
//! in-memory implementation lives in `tunnox-storage-memory`.

use std::time::Duration;

use async_trait::async_trait;

use crate::error::Result;

/// Minimum operations every storage backend must provide.
#[async_trait]
pub trait Storage: Send + Sync {
    /// Fetch a value. Returns `Ok(None)` for a missing key — callers
    /// treat "not found" as empty data, never as an error.
    async fn get(&self, key: &str) -> Result<Option<String>>;

    /// Store a value. `ttl = None` means no expiry.
    async fn set(&self, key: &str, value: &str, ttl: Option<Duration>) -> Result<()>;

    async fn delete(&self, key: &str) -> Result<()>;

    async fn exists(&self, key: &str) -> Result<bool>;

    /// Dynamic capability probe: list operations, if supported.
    fn as_list_store(&self) -> Option<&dyn ListStore> {
        None
    }

    /// Dynamic capability probe: atomic compare-and-set, if supported.
    fn as_compare_and_set(&self) -> Option<&dyn CompareAndSet> {
        None
    }

    /// Dynamic capability probe: cache-tier-only writes, if supported.
    fn as_runtime_override(&self) -> Option<&dyn RuntimeOverride> {
        None
    }
}

/// Optional list-index capability used by the IP allow/deny manager
/// to maintain `...:index` keys.
#[async_trait]
pub trait ListStore: Send + Sync {
    async fn get_list(&self, key: &str) -> Result<Option<Vec<String>>>;
    async fn append_to_list(&self, key: &str, value: &str) -> Result<()>;
    async fn remove_from_list(&self, key: &str, value: &str) -> Result<()>;
}

/// Optional atomic "set if not exists" capability, used by the node-ID
/// allocator's compare-and-set lease claim.
#[async_trait]
pub trait CompareAndSet: Send + Sync {
    /// Returns `true` iff the key was unset and is now set.
    async fn set_nx(&self, key: &str, value: &str, ttl: Option<Duration>) -> Result<bool>;
}

/// Optional cache-tier-only write capability. Writes through this trait
/// are guaranteed not to persist beyond the storage's volatile cache,
/// appropriate for pure coordination state like node leases.
#[async_trait]
pub trait RuntimeOverride: Send + Sync {
    async fn set_nx_runtime(&self, key: &str, value: &str, ttl: Option<Duration>) -> Result<bool>;
    async fn set_runtime(&self, key: &str, value: &str, ttl: Option<Duration>) -> Result<()>;
}
