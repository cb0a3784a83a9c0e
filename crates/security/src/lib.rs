//! Tunnox Security
//!
//! Connection-admission building blocks that sit in front of the
//! tunnel data plane: token-bucket rate limiting, sliding-window
//! brute-force protection, and IP allow/deny lists.

mod brute_force;
mod ip_access;
mod rate_limiter;

pub use brute_force::{BruteForceConfig, BruteForceProtector};
pub use ip_access::IpAccessManager;
pub use rate_limiter::RateLimiter;
