//! A single destination's UDP forwarding session.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use tokio::sync::Mutex;
use tunnox_core::Result;
use tunnox_socks5::UdpTunnelConn;

pub fn now_ns() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_nanos() as u64
}

/// Created lazily on first packet to `dst_key`, evicted on idle timeout
/// or tunnel receive failure. `last_active_ns` is updated on every
/// successful inbound send and every outbound receive.
pub struct UdpSession {
    pub dst_key: String,
    pub dst_host: String,
    pub dst_port: u16,
    pub tunnel_conn: Arc<dyn UdpTunnelConn>,
    last_active_ns: AtomicU64,
    send_lock: Mutex<()>,
}

impl UdpSession {
    pub fn new(dst_host: String, dst_port: u16, tunnel_conn: Arc<dyn UdpTunnelConn>) -> Self {
        let dst_key = format!("{dst_host}:{dst_port}");
        Self {
            dst_key,
            dst_host,
            dst_port,
            tunnel_conn,
            last_active_ns: AtomicU64::new(now_ns()),
            send_lock: Mutex::new(()),
        }
    }

    pub fn touch(&self) {
        self.last_active_ns.store(now_ns(), Ordering::SeqCst);
    }

    pub fn is_idle(&self, now: u64, idle_ns: u64) -> bool {
        now.saturating_sub(self.last_active_ns.load(Ordering::SeqCst)) > idle_ns
    }

    /// Serializes concurrent sends on this session's tunnel.
    pub async fn send(&self, data: &[u8]) -> Result<()> {
        let _guard = self.send_lock.lock().await;
        self.tunnel_conn.send_packet(data).await?;
        self.touch();
        Ok(())
    }

    pub async fn close(&self) {
        let _ = self.tunnel_conn.close().await;
    }
}
