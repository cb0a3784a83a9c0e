use std::time::Duration;

/// Maximum UDP sessions tracked by a single relay.
pub const MAX_SESSIONS_PER_RELAY: usize = 128;

/// Largest UDP datagram the relay will read or write.
pub const UDP_MAX_PACKET: usize = 65535;

/// Idle timeout for a UDP session before the sweeper evicts it.
pub const UDP_IDLE: Duration = Duration::from_secs(60);

/// Interval of the UDP relay's idle sweeper.
pub const UDP_SWEEP_INTERVAL: Duration = Duration::from_secs(30);

/// Read timeout used by the control-TCP watcher.
pub const CONTROL_WATCH_TIMEOUT: Duration = Duration::from_secs(30);

/// Full SOCKS5 handshake deadline.
pub const HANDSHAKE_DEADLINE: Duration = Duration::from_secs(30);

/// Default reconnect-token TTL.
pub const RECONNECT_TOKEN_TTL: Duration = Duration::from_secs(30);

/// Default session-token TTL.
pub const SESSION_TOKEN_TTL: Duration = Duration::from_secs(24 * 60 * 60);

/// Renewal advisory threshold for session tokens.
pub const SESSION_RENEWAL_THRESHOLD: Duration = Duration::from_secs(30 * 60);

/// Node lease TTL.
pub const NODE_LEASE_TTL: Duration = Duration::from_secs(90);

/// Node lease heartbeat interval.
pub const NODE_HEARTBEAT_INTERVAL: Duration = Duration::from_secs(30);

/// Size of the fixed node-ID pool.
pub const NODE_ID_POOL_SIZE: u32 = 1000;

/// Default pending-request wait timeout.
pub const PENDING_REQUEST_DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// Storage key prefix for node-ID leases.
pub const NODE_LEASE_KEY_PREFIX: &str = "tunnox:node:allocated:";

/// Storage key prefix for blacklisted IPs.
pub const IP_BLACKLIST_PREFIX: &str = "tunnox:security:ip:blacklist:";

/// Storage key for the blacklist index.
pub const IP_BLACKLIST_INDEX: &str = "tunnox:security:ip:blacklist:index";

/// Storage key prefix for whitelisted IPs.
pub const IP_WHITELIST_PREFIX: &str = "tunnox:security:ip:whitelist:";

/// Storage key for the whitelist index.
pub const IP_WHITELIST_INDEX: &str = "tunnox:security:ip:whitelist:index";

/// Storage key prefix for one-shot reconnect-token replay markers.
pub const RECONNECT_USED_PREFIX: &str = "reconnect:token:used:";

/// Brute-force protector defaults.
pub const BRUTE_FORCE_MAX_FAILURES: u32 = 5;
pub const BRUTE_FORCE_TIME_WINDOW: Duration = Duration::from_secs(5 * 60);
pub const BRUTE_FORCE_BAN_DURATION: Duration = Duration::from_secs(30 * 60);
pub const BRUTE_FORCE_PERMANENT_BAN_AT: u64 = 20;
pub const BRUTE_FORCE_CLEANUP_INTERVAL: Duration = Duration::from_secs(60);

/// Rate limiter defaults.
pub const IP_BUCKET_RATE: f64 = 10.0;
pub const IP_BUCKET_BURST: f64 = 20.0;
pub const IP_BUCKET_IDLE_TTL: Duration = Duration::from_secs(5 * 60);
pub const TUNNEL_BUCKET_RATE: f64 = 1024.0 * 1024.0;
pub const TUNNEL_BUCKET_BURST: f64 = 10.0 * 1024.0 * 1024.0;
pub const TUNNEL_BUCKET_IDLE_TTL: Duration = Duration::from_secs(10 * 60);
pub const BUCKET_CLEANUP_INTERVAL: Duration = Duration::from_secs(60);
pub const IP_WAIT_POLL: Duration = Duration::from_millis(100);
pub const TUNNEL_WAIT_POLL: Duration = Duration::from_millis(10);
