//! In-memory reference implementation of the `tunnox-core::Storage`
//! contract, including the `ListStore`, `CompareAndSet` and
//! `RuntimeOverride` capabilities.
//!
//! This is deliberately simple — a `DashMap` keyed by string with a
//! per-entry expiry (lazy expiry checked on read, periodic sweep for
//! memory reclamation). It is not a production hybrid cache/persistence
//! engine; it exists so the security and node-leasing components have
//! something real to run their tests against.

use std::time::{Duration, Instant};

use async_trait::async_trait;
use dashmap::DashMap;

use tunnox_core::{CompareAndSet, ListStore, Result, RuntimeOverride, Storage, TunnoxError};

struct Entry {
    value: String,
    expires_at: Option<Instant>,
}

impl Entry {
    fn is_expired(&self) -> bool {
        self.expires_at.is_some_and(|at| Instant::now() >= at)
    }
}

/// In-memory `Storage`. All capability probes (`as_list_store`,
/// `as_compare_and_set`, `as_runtime_override`) succeed — a single
/// backing map serves every tier, since there's only one storage
/// interface with optional methods and no real cache/persistence split.
pub struct MemoryStorage {
    entries: DashMap<String, Entry>,
    lists: DashMap<String, Vec<String>>,
}

impl Default for MemoryStorage {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self {
            entries: DashMap::new(),
            lists: DashMap::new(),
        }
    }

    /// Remove all expired entries. Intended for a periodic background
    /// sweep; never called automatically by this type.
    pub fn sweep_expired(&self) {
        self.entries.retain(|_, entry| !entry.is_expired());
    }

    fn insert(&self, key: &str, value: &str, ttl: Option<Duration>) {
        self.entries.insert(
            key.to_string(),
            Entry {
                value: value.to_string(),
                expires_at: ttl.map(|d| Instant::now() + d),
            },
        );
    }
}

#[async_trait]
impl Storage for MemoryStorage {
    async fn get(&self, key: &str) -> Result<Option<String>> {
        match self.entries.get(key) {
            Some(entry) if !entry.is_expired() => Ok(Some(entry.value.clone())),
            Some(_) => {
                self.entries.remove(key);
                Ok(None)
            }
            None => Ok(None),
        }
    }

    async fn set(&self, key: &str, value: &str, ttl: Option<Duration>) -> Result<()> {
        self.insert(key, value, ttl);
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<()> {
        self.entries.remove(key);
        Ok(())
    }

    async fn exists(&self, key: &str) -> Result<bool> {
        Ok(self.get(key).await?.is_some())
    }

    fn as_list_store(&self) -> Option<&dyn ListStore> {
        Some(self)
    }

    fn as_compare_and_set(&self) -> Option<&dyn CompareAndSet> {
        Some(self)
    }

    fn as_runtime_override(&self) -> Option<&dyn RuntimeOverride> {
        Some(self)
    }
}

#[async_trait]
impl ListStore for MemoryStorage {
    async fn get_list(&self, key: &str) -> Result<Option<Vec<String>>> {
        Ok(self.lists.get(key).map(|v| v.clone()))
    }

    async fn append_to_list(&self, key: &str, value: &str) -> Result<()> {
        self.lists
            .entry(key.to_string())
            .or_default()
            .push(value.to_string());
        Ok(())
    }

    async fn remove_from_list(&self, key: &str, value: &str) -> Result<()> {
        if let Some(mut list) = self.lists.get_mut(key) {
            list.retain(|v| v != value);
        }
        Ok(())
    }
}

#[async_trait]
impl CompareAndSet for MemoryStorage {
    async fn set_nx(&self, key: &str, value: &str, ttl: Option<Duration>) -> Result<bool> {
        if self.get(key).await?.is_some() {
            return Ok(false);
        }
        match self.entries.entry(key.to_string()) {
            dashmap::mapref::entry::Entry::Occupied(occ) if !occ.get().is_expired() => Ok(false),
            dashmap::mapref::entry::Entry::Occupied(mut occ) => {
                occ.insert(Entry {
                    value: value.to_string(),
                    expires_at: ttl.map(|d| Instant::now() + d),
                });
                Ok(true)
            }
            dashmap::mapref::entry::Entry::Vacant(vac) => {
                vac.insert(Entry {
                    value: value.to_string(),
                    expires_at: ttl.map(|d| Instant::now() + d),
                });
                Ok(true)
            }
        }
    }
}

#[async_trait]
impl RuntimeOverride for MemoryStorage {
    async fn set_nx_runtime(&self, key: &str, value: &str, ttl: Option<Duration>) -> Result<bool> {
        CompareAndSet::set_nx(self, key, value, ttl).await
    }

    async fn set_runtime(&self, key: &str, value: &str, ttl: Option<Duration>) -> Result<()> {
        self.insert(key, value, ttl);
        Ok(())
    }
}

/// Helper conversion used by callers that need a `TunnoxError::Storage`
/// around a `dashmap`/generic failure; kept here so call sites don't need
/// their own boilerplate for the (unreachable in this impl) error path.
pub fn storage_err(msg: impl Into<String>) -> TunnoxError {
    TunnoxError::Storage(msg.into())
}
