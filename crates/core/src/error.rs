use thiserror::Error;

/// Error taxonomy shared by every Tunnox component.
///
/// Concrete crates (`tunnox-crypto`, `tunnox-security`, ...) define their
/// own narrower error enums and convert into these kinds at the boundary,
/// the way the reference codebase's per-crate errors roll up into a
/// workspace-wide kind set.
#[derive(Error, Debug)]
pub enum TunnoxError {
    #[error("protocol error: {0}")]
    Protocol(String),

    #[error("network error: {0}")]
    Network(String),

    #[error("port conflict: {0}")]
    PortConflict(String),

    #[error("invalid parameter: {0}")]
    InvalidParam(String),

    #[error("authentication failed")]
    AuthFailed,

    #[error("not configured: {0}")]
    NotConfigured(String),

    #[error("operation timed out")]
    Timeout,

    #[error("operation cancelled")]
    Cancelled,

    #[error("resource exhausted: {0}")]
    ResourceExhausted(String),

    #[error("storage error: {0}")]
    Storage(String),

    #[error("internal error: {0}")]
    Internal(String),
}

pub type Result<T> = std::result::Result<T, TunnoxError>;
