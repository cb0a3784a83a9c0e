use thiserror::Error;
use tunnox_core::TunnoxError;

#[derive(Error, Debug)]
pub enum CryptoError {
    #[error("invalid parameter: {0}")]
    InvalidParam(String),

    #[error("authentication failed")]
    AuthFailed,

    #[error("not configured: {0}")]
    NotConfigured(String),

    #[error("storage error: {0}")]
    Storage(String),

    #[error("cryptographic RNG failure: {0}")]
    Rng(String),
}

impl From<CryptoError> for TunnoxError {
    fn from(e: CryptoError) -> Self {
        match e {
            CryptoError::InvalidParam(m) => TunnoxError::InvalidParam(m),
            CryptoError::AuthFailed => TunnoxError::AuthFailed,
            CryptoError::NotConfigured(m) => TunnoxError::NotConfigured(m),
            CryptoError::Storage(m) => TunnoxError::Storage(m),
            CryptoError::Rng(m) => TunnoxError::Internal(m),
        }
    }
}

pub type Result<T> = std::result::Result<T, CryptoError>;
