//! Tunnox Core
//!
//! Shared data model, error taxonomy, the `Storage` contract, and the
//! disposal pattern used by every other Tunnox crate.

mod constants;
mod disposer;
mod error;
mod storage;
mod types;

pub use constants::*;
pub use disposer::Disposer;
pub use error::{Result, TunnoxError};
pub use storage::{CompareAndSet, ListStore, RuntimeOverride, Storage};
pub use types::{
    BanRecord, FailureRecord, HandshakeResult, IpRecord, Mapping, MappingProtocol,
    ReconnectToken, SessionToken, Socks5Command,
};

/// Current unix time in whole seconds.
pub fn now_unix() -> i64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs() as i64
}
