//! Sliding-window brute-force protector with temporary and permanent
//! bans.

use std::collections::HashMap;
use std::sync::RwLock;

use tunnox_core::{
    now_unix, BanRecord, FailureRecord, BRUTE_FORCE_BAN_DURATION, BRUTE_FORCE_MAX_FAILURES,
    BRUTE_FORCE_PERMANENT_BAN_AT, BRUTE_FORCE_TIME_WINDOW,
};

pub struct BruteForceConfig {
    pub max_failures: u32,
    pub time_window_seconds: i64,
    pub ban_duration_seconds: i64,
    pub permanent_ban_at: u64,
}

impl Default for BruteForceConfig {
    fn default() -> Self {
        Self {
            max_failures: BRUTE_FORCE_MAX_FAILURES,
            time_window_seconds: BRUTE_FORCE_TIME_WINDOW.as_secs() as i64,
            ban_duration_seconds: BRUTE_FORCE_BAN_DURATION.as_secs() as i64,
            permanent_ban_at: BRUTE_FORCE_PERMANENT_BAN_AT,
        }
    }
}

/// Separate locks for failures and bans: `record_failure` releases the
/// failures lock before acquiring the bans lock, so it can never
/// deadlock against a concurrent manual `ban_ip` call.
pub struct BruteForceProtector {
    config: BruteForceConfig,
    failures: RwLock<HashMap<String, FailureRecord>>,
    bans: RwLock<HashMap<String, BanRecord>>,
}

impl Default for BruteForceProtector {
    fn default() -> Self {
        Self::new(BruteForceConfig::default())
    }
}

impl BruteForceProtector {
    pub fn new(config: BruteForceConfig) -> Self {
        Self {
            config,
            failures: RwLock::new(HashMap::new()),
            bans: RwLock::new(HashMap::new()),
        }
    }

    /// Appends a failure, trims the window, and bans if a threshold is
    /// crossed. Returns `true` iff a ban was issued by this call.
    pub fn record_failure(&self, ip: &str) -> bool {
        let now = now_unix();

        let (total_count, window_count) = {
            let mut failures = self.failures.write().unwrap();
            let record = failures
                .entry(ip.to_string())
                .or_insert_with(|| FailureRecord {
                    ip: ip.to_string(),
                    failures: Vec::new(),
                    total_count: 0,
                    first_failure: now,
                    last_failure: now,
                });

            record.failures.push(now);
            record.total_count += 1;
            record.last_failure = now;
            record
                .failures
                .retain(|&ts| now - ts < self.config.time_window_seconds);

            (record.total_count, record.failures.len() as u64)
        };

        if total_count >= self.config.permanent_ban_at {
            self.ban(ip, None, "permanent ban: too many total failures");
            return true;
        }

        if window_count >= self.config.max_failures as u64 {
            self.ban(
                ip,
                Some(self.config.ban_duration_seconds),
                "temporary ban: too many failures in window",
            );
            return true;
        }

        false
    }

    /// Deletes the failure record only. Existing bans are untouched.
    pub fn record_success(&self, ip: &str) {
        self.failures.write().unwrap().remove(ip);
    }

    /// Manual and automatic bans go through this same path.
    pub fn ban(&self, ip: &str, duration_seconds: Option<i64>, reason: &str) {
        let now = now_unix();
        let mut bans = self.bans.write().unwrap();
        let count = bans.get(ip).map(|b| b.count + 1).unwrap_or(1);
        bans.insert(
            ip.to_string(),
            BanRecord {
                ip: ip.to_string(),
                banned_at: now,
                expires_at: duration_seconds.map(|d| now + d).unwrap_or(0),
                reason: reason.to_string(),
                count,
            },
        );
    }

    pub fn is_banned(&self, ip: &str) -> (bool, String) {
        let now = now_unix();

        {
            let bans = self.bans.read().unwrap();
            match bans.get(ip) {
                Some(ban) if ban.is_expired(now) => {}
                Some(ban) => return (true, ban.reason.clone()),
                None => return (false, String::new()),
            }
        }

        // Expired: schedule removal and report not-banned.
        self.bans.write().unwrap().remove(ip);
        (false, String::new())
    }

    /// Periodic sweep: trims out-of-window failure timestamps and drops
    /// failure/ban records left empty or expired by that trim.
    pub fn cleanup(&self) {
        let now = now_unix();

        self.failures.write().unwrap().retain(|_, record| {
            record
                .failures
                .retain(|&ts| now - ts < self.config.time_window_seconds);
            !record.failures.is_empty()
        });

        self.bans
            .write()
            .unwrap()
            .retain(|_, ban| !ban.is_expired(now));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn bans_after_max_failures_within_window() {
        let protector = BruteForceProtector::new(BruteForceConfig {
            max_failures: 5,
            time_window_seconds: 300,
            ban_duration_seconds: 1800,
            permanent_ban_at: 20,
        });

        let mut should_ban = false;
        for _ in 0..5 {
            should_ban = protector.record_failure("1.2.3.4");
        }
        assert!(should_ban);

        let (banned, _) = protector.is_banned("1.2.3.4");
        assert!(banned);
    }

    #[test]
    fn permanent_ban_at_threshold_even_with_temp_ban_cleared_between() {
        let protector = BruteForceProtector::new(BruteForceConfig {
            max_failures: 3,
            time_window_seconds: 300,
            ban_duration_seconds: 1800,
            permanent_ban_at: 5,
        });

        for _ in 0..3 {
            protector.record_failure("1.2.3.4");
        }
        assert!(protector.is_banned("1.2.3.4").0);

        // Simulate the temp ban being cleared manually, then two more
        // failures push total_count to 5 (permanent_ban_at).
        protector.bans.write().unwrap().remove("1.2.3.4");
        assert!(!protector.is_banned("1.2.3.4").0);

        protector.record_failure("1.2.3.4");
        let should_ban = protector.record_failure("1.2.3.4");
        assert!(should_ban);

        let ban = protector.bans.read().unwrap().get("1.2.3.4").cloned();
        let ban = ban.unwrap();
        assert_eq!(ban.expires_at, 0);
    }

    #[test]
    fn record_success_clears_failures_not_ban() {
        let protector = BruteForceProtector::default();
        protector.record_failure("1.2.3.4");
        protector.ban("1.2.3.4", Some(60), "manual");
        protector.record_success("1.2.3.4");

        assert!(protector.failures.read().unwrap().get("1.2.3.4").is_none());
        assert!(protector.is_banned("1.2.3.4").0);
    }

    #[test]
    fn temporary_ban_expires() {
        let protector = BruteForceProtector::new(BruteForceConfig {
            max_failures: 1,
            time_window_seconds: 300,
            ban_duration_seconds: -1,
            permanent_ban_at: 100,
        });
        protector.record_failure("1.2.3.4");
        let (banned, _) = protector.is_banned("1.2.3.4");
        assert!(!banned);
    }

    #[test]
    fn unbanned_ip_is_allowed() {
        let protector = BruteForceProtector::default();
        assert_eq!(protector.is_banned("9.9.9.9"), (false, String::new()));
        let _ = Duration::ZERO;
    }

    #[test]
    fn cleanup_drops_stale_failures_and_expired_bans() {
        let protector = BruteForceProtector::new(BruteForceConfig {
            max_failures: 100,
            time_window_seconds: -1, // every timestamp is already stale
            ban_duration_seconds: -1,
            permanent_ban_at: 100,
        });
        protector.record_failure("1.2.3.4");
        protector.ban("5.6.7.8", Some(-1), "already expired");

        protector.cleanup();

        assert!(protector.failures.read().unwrap().get("1.2.3.4").is_none());
        assert!(protector.bans.read().unwrap().get("5.6.7.8").is_none());
    }
}
