//! Data model shared by the SOCKS5 ingress, the UDP relay, and the
//! security subsystem.

use serde::{Deserialize, Serialize};

/// The SOCKS5 command negotiated in a handshake.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Socks5Command {
    Connect,
    UdpAssociate,
}

/// Result of a completed SOCKS5 handshake. Lives only for the duration of
/// the handshake call; the dispatcher consumes it immediately.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HandshakeResult {
    pub command: Socks5Command,
    pub target_host: String,
    pub target_port: u16,
}

/// Protocol a port mapping is configured for. Only `Socks5` mappings are
/// handled by the listener manager.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum MappingProtocol {
    Socks5,
    Other(String),
}

/// A port-mapping as observed from the control plane. The listener
/// manager turns a `Mapping` whose `listen_client_id` matches the local
/// client into a running `Listener`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Mapping {
    pub mapping_id: String,
    pub listen_client_id: String,
    pub egress_client_id: String,
    pub mapping_secret_key: String,
    pub source_port: u16,
    pub protocol: MappingProtocol,
}

/// A single recorded authentication/connection failure timestamp, part of
/// a brute-force `FailureRecord`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FailureRecord {
    pub ip: String,
    /// Timestamps (unix seconds) within the configured time window.
    pub failures: Vec<i64>,
    pub total_count: u64,
    pub first_failure: i64,
    pub last_failure: i64,
}

impl FailureRecord {
    pub fn new(ip: impl Into<String>, now: i64) -> Self {
        let ip = ip.into();
        Self {
            ip,
            failures: vec![now],
            total_count: 1,
            first_failure: now,
            last_failure: now,
        }
    }
}

/// A ban issued by the brute-force protector, either automatic or manual.
/// `expires_at == 0` means permanent.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BanRecord {
    pub ip: String,
    pub banned_at: i64,
    pub expires_at: i64,
    pub reason: String,
    pub count: u64,
}

impl BanRecord {
    pub fn is_permanent(&self) -> bool {
        self.expires_at == 0
    }

    pub fn is_expired(&self, now: i64) -> bool {
        !self.is_permanent() && self.expires_at <= now
    }
}

/// An allow/deny list entry, single IP or CIDR.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IpRecord {
    pub ip_or_cidr: String,
    pub added_at: i64,
    /// 0 = permanent. Whitelist records always carry 0.
    pub expires_at: i64,
    pub reason: String,
    pub added_by: String,
}

impl IpRecord {
    pub fn is_expired(&self, now: i64) -> bool {
        self.expires_at != 0 && self.expires_at <= now
    }
}

/// One-shot signed handoff ticket used for failover reconnects.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReconnectToken {
    pub token_id: String,
    pub client_id: String,
    pub node_id: String,
    pub issued_at: i64,
    pub expires_at: i64,
    pub nonce: String,
    pub signature: String,
}

impl ReconnectToken {
    /// Exact string signed by the HMAC: no padding, `|` delimited, no
    /// trailing separator.
    pub fn signable_data(
        token_id: &str,
        client_id: &str,
        node_id: &str,
        issued_at: i64,
        expires_at: i64,
        nonce: &str,
    ) -> String {
        format!(
            "{token_id}|{client_id}|{node_id}|{issued_at}|{expires_at}|{nonce}"
        )
    }

    pub fn remaining(&self, now: i64) -> i64 {
        self.expires_at - now
    }
}

/// Renewable signed session ticket.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionToken {
    pub token_id: String,
    pub client_id: String,
    pub ip: String,
    pub tls_fingerprint: Option<String>,
    pub issued_at: i64,
    pub expires_at: i64,
    pub last_activity: i64,
    pub signature: String,
}

impl SessionToken {
    /// Exact string signed by the HMAC. An absent fingerprint signs as
    /// an empty segment.
    pub fn signable_data(
        token_id: &str,
        client_id: &str,
        ip: &str,
        tls_fingerprint: Option<&str>,
        issued_at: i64,
        expires_at: i64,
    ) -> String {
        format!(
            "{token_id}|{client_id}|{ip}|{}|{issued_at}|{expires_at}",
            tls_fingerprint.unwrap_or("")
        )
    }

    pub fn is_expired(&self, now: i64) -> bool {
        self.expires_at <= now
    }
}
