//! Tunnox Pending
//!
//! Correlation-ID to one-shot delivery slot, shared by the HTTP-proxy
//! response matcher and the tunnel-establishment waiter.

use std::collections::HashMap;
use std::sync::RwLock;
use std::time::Duration;

use once_cell::sync::Lazy;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tunnox_core::PENDING_REQUEST_DEFAULT_TIMEOUT;

#[derive(Debug, thiserror::Error)]
pub enum PendingError {
    #[error("pending request timed out")]
    Timeout,
    #[error("pending request was cancelled")]
    Cancelled,
}

/// A registry of correlation IDs, each holding a capacity-1 channel.
/// `deliver` never blocks: a second delivery to an already-full slot is
/// logged and discarded, since the consumer already has a value coming.
pub struct PendingRequestCoordinator<T: Send + 'static> {
    slots: RwLock<HashMap<String, mpsc::Sender<T>>>,
}

impl<T: Send + 'static> Default for PendingRequestCoordinator<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Send + 'static> PendingRequestCoordinator<T> {
    pub fn new() -> Self {
        Self {
            slots: RwLock::new(HashMap::new()),
        }
    }

    fn register(&self, id: &str) -> mpsc::Receiver<T> {
        let (tx, rx) = mpsc::channel(1);
        self.slots.write().unwrap().insert(id.to_string(), tx);
        rx
    }

    pub fn unregister(&self, id: &str) {
        self.slots.write().unwrap().remove(id);
    }

    /// Returns `true` if the value was handed to a waiting consumer.
    pub fn deliver(&self, id: &str, value: T) -> bool {
        let slots = self.slots.read().unwrap();
        match slots.get(id) {
            Some(tx) => match tx.try_send(value) {
                Ok(()) => true,
                Err(_) => {
                    tracing::warn!(id, "discarding delivery: slot already holds a pending value");
                    false
                }
            },
            None => {
                tracing::warn!(id, "discarding delivery: no registered slot");
                false
            }
        }
    }

    /// Registers, waits for delivery/timeout/cancel, then always
    /// unregisters before returning.
    pub async fn wait(
        &self,
        cancel: &CancellationToken,
        id: &str,
        timeout: Option<Duration>,
    ) -> Result<T, PendingError> {
        let mut rx = self.register(id);
        let timeout = timeout.unwrap_or(PENDING_REQUEST_DEFAULT_TIMEOUT);

        let result = tokio::select! {
            value = rx.recv() => value.ok_or(PendingError::Cancelled),
            _ = tokio::time::sleep(timeout) => Err(PendingError::Timeout),
            _ = cancel.cancelled() => Err(PendingError::Cancelled),
        };

        self.unregister(id);
        result
    }
}

/// Process-wide coordinator for HTTP-proxy response correlation.
/// Lazily constructed, safe against concurrent first use. Tests should
/// build their own `PendingRequestCoordinator::new()` rather than rely
/// on this shared instance.
static HTTP_PROXY_PENDING: Lazy<PendingRequestCoordinator<Vec<u8>>> =
    Lazy::new(PendingRequestCoordinator::new);

pub fn http_proxy_pending() -> &'static PendingRequestCoordinator<Vec<u8>> {
    &HTTP_PROXY_PENDING
}

/// Process-wide coordinator for tunnel-establishment waits.
static TUNNEL_WAIT_PENDING: Lazy<PendingRequestCoordinator<()>> =
    Lazy::new(PendingRequestCoordinator::new);

pub fn tunnel_wait_pending() -> &'static PendingRequestCoordinator<()> {
    &TUNNEL_WAIT_PENDING
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn register_then_deliver_is_received() {
        let coordinator = PendingRequestCoordinator::<u32>::new();
        let mut rx = coordinator.register("req-1");
        assert!(coordinator.deliver("req-1", 42));
        assert_eq!(rx.recv().await, Some(42));
        coordinator.unregister("req-1");
    }

    #[tokio::test]
    async fn wait_returns_value_delivered_after_register() {
        let coordinator = std::sync::Arc::new(PendingRequestCoordinator::<u32>::new());
        let cancel = CancellationToken::new();

        let waiter = {
            let coordinator = coordinator.clone();
            let cancel = cancel.clone();
            tokio::spawn(async move { coordinator.wait(&cancel, "req-2", None).await })
        };

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(coordinator.deliver("req-2", 7));

        assert_eq!(waiter.await.unwrap().unwrap(), 7);
    }

    #[tokio::test]
    async fn second_delivery_to_full_slot_is_discarded() {
        let coordinator = PendingRequestCoordinator::<u32>::new();
        let mut rx = coordinator.register("req-3");
        assert!(coordinator.deliver("req-3", 1));
        assert!(!coordinator.deliver("req-3", 2));
        assert_eq!(rx.recv().await, Some(1));
    }

    #[tokio::test]
    async fn wait_times_out_without_delivery() {
        let coordinator = PendingRequestCoordinator::<u32>::new();
        let cancel = CancellationToken::new();
        let err = coordinator
            .wait(&cancel, "req-4", Some(Duration::from_millis(20)))
            .await
            .unwrap_err();
        assert!(matches!(err, PendingError::Timeout));
    }

    #[tokio::test]
    async fn wait_is_cancelled_by_token() {
        let coordinator = std::sync::Arc::new(PendingRequestCoordinator::<u32>::new());
        let cancel = CancellationToken::new();

        let waiter = {
            let coordinator = coordinator.clone();
            let cancel = cancel.clone();
            tokio::spawn(async move { coordinator.wait(&cancel, "req-5", None).await })
        };

        tokio::time::sleep(Duration::from_millis(20)).await;
        cancel.cancel();
        let err = waiter.await.unwrap().unwrap_err();
        assert!(matches!(err, PendingError::Cancelled));
    }

    #[tokio::test]
    async fn unregister_missing_id_is_safe() {
        let coordinator = PendingRequestCoordinator::<u32>::new();
        coordinator.unregister("does-not-exist");
    }

    #[test]
    fn global_singletons_are_reachable() {
        let _ = http_proxy_pending();
        let _ = tunnel_wait_pending();
    }
}
