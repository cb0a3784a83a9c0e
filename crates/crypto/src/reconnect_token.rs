//! One-shot signed reconnect/failover ticket.

use std::sync::Arc;
use std::time::Duration;

use hmac::{Hmac, Mac};
use rand::rngs::OsRng;
use rand::RngCore;
use sha2::Sha256;
use subtle::ConstantTimeEq;
use tunnox_core::{now_unix, ReconnectToken, Storage, RECONNECT_USED_PREFIX};

use crate::error::{CryptoError, Result};

type HmacSha256 = Hmac<Sha256>;

pub struct ReconnectTokenManager {
    secret: Vec<u8>,
    ttl_seconds: i64,
    storage: Arc<dyn Storage>,
}

impl ReconnectTokenManager {
    pub fn new(secret: impl Into<Vec<u8>>, ttl_seconds: i64, storage: Arc<dyn Storage>) -> Self {
        Self {
            secret: secret.into(),
            ttl_seconds,
            storage,
        }
    }

    fn sign(&self, data: &str) -> String {
        let mut mac = HmacSha256::new_from_slice(&self.secret).expect("HMAC accepts any key length");
        mac.update(data.as_bytes());
        hex::encode(mac.finalize().into_bytes())
    }

    fn random_hex(len_bytes: usize) -> Result<String> {
        let mut buf = vec![0u8; len_bytes];
        OsRng
            .try_fill_bytes(&mut buf)
            .map_err(|e| CryptoError::Rng(e.to_string()))?;
        Ok(hex::encode(buf))
    }

    pub fn generate(&self, client_id: &str, node_id: &str) -> Result<ReconnectToken> {
        let token_id = Self::random_hex(16)?;
        let nonce = Self::random_hex(16)?;
        let issued_at = now_unix();
        let expires_at = issued_at + self.ttl_seconds;

        let data = ReconnectToken::signable_data(&token_id, client_id, node_id, issued_at, expires_at, &nonce);
        let signature = self.sign(&data);

        Ok(ReconnectToken {
            token_id,
            client_id: client_id.to_string(),
            node_id: node_id.to_string(),
            issued_at,
            expires_at,
            nonce,
            signature,
        })
    }

    /// Signature check, then expiry check, then an anti-replay lookup in
    /// storage. The caller MUST call `mark_token_as_used` immediately
    /// after a successful validate.
    pub async fn validate(&self, token: &ReconnectToken) -> Result<()> {
        let data = ReconnectToken::signable_data(
            &token.token_id,
            &token.client_id,
            &token.node_id,
            token.issued_at,
            token.expires_at,
            &token.nonce,
        );
        let expected = self.sign(&data);
        if expected.as_bytes().ct_eq(token.signature.as_bytes()).unwrap_u8() == 0 {
            return Err(CryptoError::AuthFailed);
        }

        if token.remaining(now_unix()) <= 0 {
            return Err(CryptoError::InvalidParam("token expired".into()));
        }

        let used_key = format!("{RECONNECT_USED_PREFIX}{}", token.token_id);
        let already_used = self
            .storage
            .exists(&used_key)
            .await
            .map_err(|e| CryptoError::Storage(e.to_string()))?;
        if already_used {
            return Err(CryptoError::AuthFailed);
        }

        Ok(())
    }

    pub async fn mark_token_as_used(&self, token: &ReconnectToken) -> Result<()> {
        let remaining = token.remaining(now_unix());
        if remaining <= 0 {
            return Err(CryptoError::InvalidParam(
                "cannot mark an expired token as used".into(),
            ));
        }

        let used_key = format!("{RECONNECT_USED_PREFIX}{}", token.token_id);
        self.storage
            .set(&used_key, "1", Some(Duration::from_secs(remaining as u64)))
            .await
            .map_err(|e| CryptoError::Storage(e.to_string()))
    }
}
