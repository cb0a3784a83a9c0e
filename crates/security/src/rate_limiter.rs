//! Token-bucket rate limiter: one keyed bucket map for IP connection
//! admission, one for tunnel byte throughput.

use std::collections::HashMap;
use std::sync::{Mutex, RwLock};
use std::time::{Duration, Instant};

use tokio_util::sync::CancellationToken;
use tunnox_core::{
    IP_BUCKET_BURST, IP_BUCKET_IDLE_TTL, IP_BUCKET_RATE, IP_WAIT_POLL, TUNNEL_BUCKET_BURST,
    TUNNEL_BUCKET_IDLE_TTL, TUNNEL_BUCKET_RATE, TUNNEL_WAIT_POLL,
};

struct Bucket {
    tokens: f64,
    last_refill: Instant,
}

impl Bucket {
    fn new(capacity: f64) -> Self {
        Self {
            tokens: capacity,
            last_refill: Instant::now(),
        }
    }

    fn take(&mut self, n: f64, capacity: f64, rate_per_sec: f64) -> bool {
        let now = Instant::now();
        let elapsed = now.duration_since(self.last_refill).as_secs_f64();
        self.tokens = (self.tokens + elapsed * rate_per_sec).min(capacity);
        self.last_refill = now;

        if self.tokens >= n {
            self.tokens -= n;
            true
        } else {
            false
        }
    }
}

#[derive(Clone, Copy)]
struct BucketConfig {
    rate_per_sec: f64,
    capacity: f64,
    idle_ttl: Duration,
}

struct BucketMap {
    config: RwLock<BucketConfig>,
    buckets: RwLock<HashMap<String, Mutex<Bucket>>>,
}

impl BucketMap {
    fn new(rate_per_sec: f64, capacity: f64, idle_ttl: Duration) -> Self {
        Self {
            config: RwLock::new(BucketConfig {
                rate_per_sec,
                capacity,
                idle_ttl,
            }),
            buckets: RwLock::new(HashMap::new()),
        }
    }

    fn take(&self, key: &str, n: f64) -> bool {
        let config = *self.config.read().unwrap();

        // Fast path: bucket already exists.
        {
            let buckets = self.buckets.read().unwrap();
            if let Some(bucket) = buckets.get(key) {
                return bucket.lock().unwrap().take(n, config.capacity, config.rate_per_sec);
            }
        }

        // Slow path: create under a write lock, re-checking in case of a race.
        let mut buckets = self.buckets.write().unwrap();
        let bucket = buckets
            .entry(key.to_string())
            .or_insert_with(|| Mutex::new(Bucket::new(config.capacity)));
        bucket.lock().unwrap().take(n, config.capacity, config.rate_per_sec)
    }

    fn reconfigure(&self, rate_per_sec: f64, capacity: f64) {
        let mut config = self.config.write().unwrap();
        config.rate_per_sec = rate_per_sec;
        config.capacity = capacity;
        drop(config);
        self.buckets.write().unwrap().clear();
    }

    fn cleanup(&self) {
        let idle_ttl = self.config.read().unwrap().idle_ttl;
        let now = Instant::now();
        self.buckets
            .write()
            .unwrap()
            .retain(|_, bucket| now.duration_since(bucket.lock().unwrap().last_refill) < idle_ttl);
    }
}

/// Two independent keyed token-bucket maps: connections-per-second for
/// IPs, bytes-per-second for tunnels.
pub struct RateLimiter {
    ip: BucketMap,
    tunnel: BucketMap,
}

impl Default for RateLimiter {
    fn default() -> Self {
        Self::new()
    }
}

impl RateLimiter {
    pub fn new() -> Self {
        Self {
            ip: BucketMap::new(IP_BUCKET_RATE, IP_BUCKET_BURST, IP_BUCKET_IDLE_TTL),
            tunnel: BucketMap::new(TUNNEL_BUCKET_RATE, TUNNEL_BUCKET_BURST, TUNNEL_BUCKET_IDLE_TTL),
        }
    }

    pub fn take_ip(&self, key: &str, n: f64) -> bool {
        self.ip.take(key, n)
    }

    /// Convenience for the common case of admitting a single connection.
    pub fn allow_ip(&self, key: &str) -> bool {
        self.take_ip(key, 1.0)
    }

    pub fn take_tunnel(&self, key: &str, n_bytes: f64) -> bool {
        self.tunnel.take(key, n_bytes)
    }

    pub fn set_ip_rate_limit(&self, rate_per_sec: f64, burst: f64) {
        self.ip.reconfigure(rate_per_sec, burst);
    }

    pub fn set_tunnel_rate_limit(&self, rate_per_sec: f64, burst: f64) {
        self.tunnel.reconfigure(rate_per_sec, burst);
    }

    /// Polls `take_ip` until it succeeds or `cancel` fires.
    pub async fn wait_ip(&self, cancel: &CancellationToken, key: &str, n: f64) -> bool {
        wait_on(cancel, IP_WAIT_POLL, || self.take_ip(key, n)).await
    }

    /// Polls `take_tunnel` until it succeeds or `cancel` fires.
    pub async fn wait_tunnel(&self, cancel: &CancellationToken, key: &str, n_bytes: f64) -> bool {
        wait_on(cancel, TUNNEL_WAIT_POLL, || self.take_tunnel(key, n_bytes)).await
    }

    /// Deletes buckets idle longer than their map's `idle_ttl`. Intended
    /// to run every 60s from a background task.
    pub fn cleanup(&self) {
        self.ip.cleanup();
        self.tunnel.cleanup();
    }
}

async fn wait_on(cancel: &CancellationToken, poll: Duration, mut try_take: impl FnMut() -> bool) -> bool {
    loop {
        if try_take() {
            return true;
        }
        tokio::select! {
            _ = tokio::time::sleep(poll) => {}
            _ = cancel.cancelled() => return false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn allows_up_to_burst_then_rejects() {
        let limiter = RateLimiter::new();
        limiter.set_ip_rate_limit(2.0, 5.0);

        for _ in 0..5 {
            assert!(limiter.allow_ip("1.2.3.4"));
        }
        assert!(!limiter.allow_ip("1.2.3.4"));
    }

    #[tokio::test]
    async fn refills_over_time() {
        let limiter = RateLimiter::new();
        limiter.set_ip_rate_limit(2.0, 5.0);

        for _ in 0..5 {
            assert!(limiter.allow_ip("1.2.3.4"));
        }
        assert!(!limiter.allow_ip("1.2.3.4"));

        tokio::time::sleep(Duration::from_millis(600)).await;
        assert!(limiter.allow_ip("1.2.3.4"));
    }

    #[test]
    fn separate_keys_have_independent_buckets() {
        let limiter = RateLimiter::new();
        limiter.set_ip_rate_limit(1.0, 1.0);

        assert!(limiter.allow_ip("a"));
        assert!(!limiter.allow_ip("a"));
        assert!(limiter.allow_ip("b"));
    }

    #[test]
    fn reconfigure_resets_existing_buckets() {
        let limiter = RateLimiter::new();
        limiter.set_ip_rate_limit(1.0, 1.0);
        assert!(limiter.allow_ip("a"));
        assert!(!limiter.allow_ip("a"));

        limiter.set_ip_rate_limit(1.0, 10.0);
        assert!(limiter.allow_ip("a"));
    }

    #[tokio::test]
    async fn wait_ip_unblocks_on_cancel() {
        let limiter = RateLimiter::new();
        limiter.set_ip_rate_limit(0.001, 1.0);
        assert!(limiter.allow_ip("a"));

        let cancel = CancellationToken::new();
        let cancel_clone = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            cancel_clone.cancel();
        });

        let result = limiter.wait_ip(&cancel, "a", 1.0).await;
        assert!(!result);
    }

    #[tokio::test]
    async fn cleanup_evicts_idle_buckets() {
        let limiter = RateLimiter::new();
        limiter.ip.config.write().unwrap().idle_ttl = Duration::from_millis(10);
        limiter.allow_ip("a");
        tokio::time::sleep(Duration::from_millis(30)).await;
        limiter.cleanup();
        assert_eq!(limiter.ip.buckets.read().unwrap().len(), 0);
    }
}
