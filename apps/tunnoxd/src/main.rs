//! Tunnox ingress daemon binary.
//!
//! Wires settings, the security stack, the crypto managers, node-ID
//! leasing, and the SOCKS5 listener manager, then runs until
//! interrupted.

mod tunnel;

use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tunnox_crypto::{ReconnectTokenManager, SecretKeyManager, SessionTokenManager};
use tunnox_node::NodeAllocator;
use tunnox_security::{BruteForceConfig, BruteForceProtector, IpAccessManager, RateLimiter};
use tunnox_settings::Settings;
use tunnox_socks5::ListenerManager;
use tunnox_storage_memory::MemoryStorage;
use tunnox_udprelay::TunnoxUdpRelayFactory;

use tunnel::DirectTunnelCreator;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tunnox_logging::init();
    tracing::info!("starting tunnoxd");

    let settings = Settings::load_or_default()?;
    settings.save()?;

    let storage = Arc::new(MemoryStorage::new());

    let rate_limiter = Arc::new(RateLimiter::new());
    rate_limiter.set_ip_rate_limit(
        settings.security.rate_limit.ip_rate_per_sec,
        settings.security.rate_limit.ip_burst,
    );
    rate_limiter.set_tunnel_rate_limit(
        settings.security.rate_limit.tunnel_rate_per_sec,
        settings.security.rate_limit.tunnel_burst,
    );

    let brute_force = Arc::new(BruteForceProtector::new(BruteForceConfig {
        max_failures: settings.security.brute_force.max_failures,
        time_window_seconds: settings.security.brute_force.time_window_secs,
        ban_duration_seconds: settings.security.brute_force.ban_duration_secs,
        permanent_ban_at: settings.security.brute_force.permanent_ban_at,
    }));

    let ip_access = Arc::new(IpAccessManager::new(storage.clone()));
    ip_access.load_from_storage().await?;

    let secret_keys = Arc::new(SecretKeyManager::new(&settings.crypto.master_key_base64)?);

    let session_secret = hex::decode(&settings.crypto.session_token_secret_hex)
        .map_err(|e| anyhow::anyhow!("invalid session token secret: {e}"))?;
    let session_tokens = Arc::new(SessionTokenManager::new(
        session_secret,
        settings.crypto.session_token_ttl_secs,
        settings.crypto.session_renewal_threshold_secs,
    ));

    let reconnect_secret = hex::decode(&settings.crypto.reconnect_token_secret_hex)
        .map_err(|e| anyhow::anyhow!("invalid reconnect token secret: {e}"))?;
    let reconnect_tokens = Arc::new(ReconnectTokenManager::new(
        reconnect_secret,
        settings.crypto.reconnect_token_ttl_secs,
        storage.clone(),
    ));
    // Constructed from settings and held for the life of the process;
    // issuance/validation is driven by the (out-of-scope) control plane.
    let _ = (&secret_keys, &session_tokens, &reconnect_tokens);

    let node_allocator = NodeAllocator::new(storage.clone());
    let mut node = node_allocator.allocate().await?;
    tracing::info!(node_id = node.node_id(), "node lease acquired");

    let cleanup_cancel = CancellationToken::new();
    let cleanup_handle = tokio::spawn(run_cleanup_loop(
        rate_limiter.clone(),
        brute_force.clone(),
        ip_access.clone(),
        cleanup_cancel.clone(),
    ));

    let tunnel_creator = Arc::new(DirectTunnelCreator);
    let udp_relay_factory = Arc::new(TunnoxUdpRelayFactory::new(tunnel_creator.clone(), None));
    let _listener_manager = ListenerManager::new(
        node.node_id().to_string(),
        tunnel_creator,
        Some(udp_relay_factory),
    );

    tracing::info!("tunnoxd ready, waiting for mappings from the control plane");

    tokio::signal::ctrl_c().await?;
    tracing::info!("shutdown signal received");

    cleanup_cancel.cancel();
    let _ = cleanup_handle.await;
    node.release().await?;

    tracing::info!("tunnoxd stopped");
    Ok(())
}

async fn run_cleanup_loop(
    rate_limiter: Arc<RateLimiter>,
    brute_force: Arc<BruteForceProtector>,
    ip_access: Arc<IpAccessManager>,
    cancel: CancellationToken,
) {
    let mut ticker = tokio::time::interval(Duration::from_secs(60));
    loop {
        tokio::select! {
            _ = cancel.cancelled() => return,
            _ = ticker.tick() => {
                rate_limiter.cleanup();
                ip_access.cleanup_expired();
                brute_force.cleanup();
            }
        }
    }
}
