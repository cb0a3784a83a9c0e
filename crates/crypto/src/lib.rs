//! Tunnox Crypto
//!
//! AES-256-GCM secret-key envelopes with an HMAC challenge/response
//! verifier, plus the session-token and reconnect-token managers that
//! build on the same HMAC-SHA256 signing primitive.

mod error;
mod reconnect_token;
mod secret_key;
mod session_token;

pub use error::{CryptoError, Result};
pub use reconnect_token::ReconnectTokenManager;
pub use secret_key::SecretKeyManager;
pub use session_token::SessionTokenManager;
