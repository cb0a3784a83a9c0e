//! Tunnox Node
//!
//! Claims a node ID from a fixed-size pool via a compare-and-set lease,
//! renews it with a background heartbeat, and releases it on shutdown.

use std::sync::Arc;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tunnox_core::{
    Disposer, Result, Storage, TunnoxError, NODE_HEARTBEAT_INTERVAL, NODE_ID_POOL_SIZE,
    NODE_LEASE_KEY_PREFIX, NODE_LEASE_TTL,
};

pub struct NodeAllocator {
    storage: Arc<dyn Storage>,
    pool_size: u32,
    lease_ttl: std::time::Duration,
    heartbeat_interval: std::time::Duration,
}

impl NodeAllocator {
    pub fn new(storage: Arc<dyn Storage>) -> Self {
        Self {
            storage,
            pool_size: NODE_ID_POOL_SIZE,
            lease_ttl: NODE_LEASE_TTL,
            heartbeat_interval: NODE_HEARTBEAT_INTERVAL,
        }
    }

    /// Allows tests to shrink the pool and speed up the heartbeat.
    pub fn with_params(
        storage: Arc<dyn Storage>,
        pool_size: u32,
        lease_ttl: std::time::Duration,
        heartbeat_interval: std::time::Duration,
    ) -> Self {
        Self {
            storage,
            pool_size,
            lease_ttl,
            heartbeat_interval,
        }
    }

    /// Walks `node-0001..node-{pool_size}`, claiming the first free slot.
    /// Prefers an atomic cache-only claim, falls back to a durable
    /// compare-and-set, and finally to a non-atomic check-then-set if
    /// the backend supports neither.
    pub async fn allocate(&self) -> Result<LeasedNode> {
        for i in 1..=self.pool_size {
            let node_id = format!("node-{i:04}");
            let key = format!("{NODE_LEASE_KEY_PREFIX}{node_id}");

            let claimed = self.try_claim(&key, &node_id).await?;
            if claimed {
                return Ok(LeasedNode::start(
                    node_id,
                    key,
                    self.storage.clone(),
                    self.lease_ttl,
                    self.heartbeat_interval,
                ));
            }
        }

        Err(TunnoxError::ResourceExhausted(
            "node id pool exhausted".into(),
        ))
    }

    async fn try_claim(&self, key: &str, node_id: &str) -> Result<bool> {
        if let Some(runtime) = self.storage.as_runtime_override() {
            return runtime
                .set_nx_runtime(key, node_id, Some(self.lease_ttl))
                .await;
        }
        if let Some(cas) = self.storage.as_compare_and_set() {
            return cas.set_nx(key, node_id, Some(self.lease_ttl)).await;
        }

        if self.storage.exists(key).await? {
            Ok(false)
        } else {
            self.storage.set(key, node_id, Some(self.lease_ttl)).await?;
            Ok(true)
        }
    }
}

/// A claimed node ID with a live heartbeat task. `release` is safe to
/// call more than once.
pub struct LeasedNode {
    node_id: String,
    key: String,
    storage: Arc<dyn Storage>,
    disposer: Disposer,
    heartbeat: Option<JoinHandle<()>>,
}

impl LeasedNode {
    fn start(
        node_id: String,
        key: String,
        storage: Arc<dyn Storage>,
        lease_ttl: std::time::Duration,
        heartbeat_interval: std::time::Duration,
    ) -> Self {
        let cancel = CancellationToken::new();
        let heartbeat = tokio::spawn(Self::heartbeat_loop(
            node_id.clone(),
            key.clone(),
            storage.clone(),
            lease_ttl,
            heartbeat_interval,
            cancel.clone(),
        ));

        let disposer = Disposer::new();
        let cancel_for_close = cancel.clone();
        disposer.register(move || {
            cancel_for_close.cancel();
            Ok(())
        });

        Self {
            node_id,
            key,
            storage,
            disposer,
            heartbeat: Some(heartbeat),
        }
    }

    async fn heartbeat_loop(
        node_id: String,
        key: String,
        storage: Arc<dyn Storage>,
        lease_ttl: std::time::Duration,
        heartbeat_interval: std::time::Duration,
        cancel: CancellationToken,
    ) {
        loop {
            tokio::select! {
                _ = tokio::time::sleep(heartbeat_interval) => {
                    if let Err(e) = storage.set(&key, &node_id, Some(lease_ttl)).await {
                        tracing::warn!(key, error = %e, "node lease heartbeat failed");
                    }
                }
                _ = cancel.cancelled() => return,
            }
        }
    }

    pub fn node_id(&self) -> &str {
        &self.node_id
    }

    /// Idempotent: stops the heartbeat and deletes the lease. A second
    /// call is a no-op.
    pub async fn release(&mut self) -> Result<()> {
        if self.disposer.is_closed() {
            return Ok(());
        }
        for err in self.disposer.close() {
            tracing::warn!(key = %self.key, error = %err, "node lease cleanup failed");
        }
        if let Some(handle) = self.heartbeat.take() {
            let _ = handle.await;
        }
        self.storage.delete(&self.key).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tunnox_storage_memory::MemoryStorage;

    #[tokio::test]
    async fn allocates_first_free_slot() {
        let storage = Arc::new(MemoryStorage::new());
        let allocator = NodeAllocator::with_params(
            storage,
            10,
            Duration::from_secs(60),
            Duration::from_secs(30),
        );
        let mut node = allocator.allocate().await.unwrap();
        assert_eq!(node.node_id(), "node-0001");
        node.release().await.unwrap();
    }

    #[tokio::test]
    async fn does_not_reallocate_a_held_lease() {
        let storage = Arc::new(MemoryStorage::new());
        let allocator = NodeAllocator::with_params(
            storage,
            2,
            Duration::from_secs(60),
            Duration::from_secs(30),
        );
        let mut first = allocator.allocate().await.unwrap();
        let mut second = allocator.allocate().await.unwrap();
        assert_ne!(first.node_id(), second.node_id());
        first.release().await.unwrap();
        second.release().await.unwrap();
    }

    #[tokio::test]
    async fn pool_exhaustion_is_an_error() {
        let storage = Arc::new(MemoryStorage::new());
        let allocator = NodeAllocator::with_params(
            storage,
            1,
            Duration::from_secs(60),
            Duration::from_secs(30),
        );
        let mut first = allocator.allocate().await.unwrap();
        let err = allocator.allocate().await.unwrap_err();
        assert!(matches!(err, TunnoxError::ResourceExhausted(_)));
        first.release().await.unwrap();
    }

    #[tokio::test]
    async fn release_is_idempotent() {
        let storage = Arc::new(MemoryStorage::new());
        let allocator = NodeAllocator::with_params(
            storage,
            5,
            Duration::from_secs(60),
            Duration::from_secs(30),
        );
        let mut node = allocator.allocate().await.unwrap();
        node.release().await.unwrap();
        node.release().await.unwrap();
    }

    #[tokio::test]
    async fn released_slot_can_be_reclaimed() {
        let storage = Arc::new(MemoryStorage::new());
        let allocator = NodeAllocator::with_params(
            storage,
            1,
            Duration::from_secs(60),
            Duration::from_secs(30),
        );
        let mut node = allocator.allocate().await.unwrap();
        node.release().await.unwrap();

        let mut reclaimed = allocator.allocate().await.unwrap();
        assert_eq!(reclaimed.node_id(), "node-0001");
        reclaimed.release().await.unwrap();
    }

    #[tokio::test]
    async fn heartbeat_renews_lease_before_ttl_expires() {
        let storage = Arc::new(MemoryStorage::new());
        let allocator = NodeAllocator::with_params(
            storage.clone(),
            1,
            Duration::from_millis(150),
            Duration::from_millis(40),
        );
        let mut node = allocator.allocate().await.unwrap();
        tokio::time::sleep(Duration::from_millis(200)).await;
        let key = format!("{NODE_LEASE_KEY_PREFIX}node-0001");
        assert!(storage.exists(&key).await.unwrap());
        node.release().await.unwrap();
    }
}
