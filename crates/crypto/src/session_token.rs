//! Renewable signed session ticket.

use hmac::{Hmac, Mac};
use rand::rngs::OsRng;
use rand::RngCore;
use sha2::Sha256;
use subtle::ConstantTimeEq;
use tunnox_core::{now_unix, SessionToken};

use crate::error::{CryptoError, Result};

type HmacSha256 = Hmac<Sha256>;

pub struct SessionTokenManager {
    secret: Vec<u8>,
    ttl_seconds: i64,
    renewal_threshold_seconds: i64,
}

impl SessionTokenManager {
    pub fn new(secret: impl Into<Vec<u8>>, ttl_seconds: i64, renewal_threshold_seconds: i64) -> Self {
        Self {
            secret: secret.into(),
            ttl_seconds,
            renewal_threshold_seconds,
        }
    }

    fn sign(&self, data: &str) -> String {
        let mut mac = HmacSha256::new_from_slice(&self.secret).expect("HMAC accepts any key length");
        mac.update(data.as_bytes());
        hex::encode(mac.finalize().into_bytes())
    }

    fn new_token_id() -> String {
        let mut id = [0u8; 16];
        OsRng.fill_bytes(&mut id);
        hex::encode(id)
    }

    pub fn generate(&self, client_id: &str, ip: &str, tls_fingerprint: Option<&str>) -> SessionToken {
        let token_id = Self::new_token_id();
        let issued_at = now_unix();
        let expires_at = issued_at + self.ttl_seconds;

        let data = SessionToken::signable_data(&token_id, client_id, ip, tls_fingerprint, issued_at, expires_at);
        let signature = self.sign(&data);

        SessionToken {
            token_id,
            client_id: client_id.to_string(),
            ip: ip.to_string(),
            tls_fingerprint: tls_fingerprint.map(|s| s.to_string()),
            issued_at,
            expires_at,
            last_activity: issued_at,
            signature,
        }
    }

    pub fn validate(&self, token: &SessionToken, current_ip: &str, check_ip: bool) -> Result<()> {
        let data = SessionToken::signable_data(
            &token.token_id,
            &token.client_id,
            &token.ip,
            token.tls_fingerprint.as_deref(),
            token.issued_at,
            token.expires_at,
        );
        let expected = self.sign(&data);
        if expected.as_bytes().ct_eq(token.signature.as_bytes()).unwrap_u8() == 0 {
            return Err(CryptoError::AuthFailed);
        }

        if token.is_expired(now_unix()) {
            return Err(CryptoError::InvalidParam("token expired".into()));
        }

        if check_ip && !current_ip.is_empty() && current_ip != token.ip {
            return Err(CryptoError::InvalidParam("IP mismatch".into()));
        }

        Ok(())
    }

    pub fn should_renew(&self, token: &SessionToken) -> bool {
        token.expires_at - now_unix() < self.renewal_threshold_seconds
    }

    /// Issues a fresh token preserving `client_id`, `ip` and
    /// `tls_fingerprint`; does not consult `validate`.
    pub fn renew(&self, token: &SessionToken) -> SessionToken {
        self.generate(&token.client_id, &token.ip, token.tls_fingerprint.as_deref())
    }

    /// Updates `last_activity` only. `last_activity` is excluded from the
    /// signed data, so this never invalidates the signature.
    pub fn update_activity(&self, token: &mut SessionToken) {
        token.last_activity = now_unix();
    }

    pub fn encode_token(token: &SessionToken) -> Result<String> {
        serde_json::to_string(token).map_err(|e| CryptoError::InvalidParam(e.to_string()))
    }

    pub fn decode_token(data: &str) -> Result<SessionToken> {
        serde_json::from_str(data).map_err(|e| CryptoError::InvalidParam(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn manager() -> SessionTokenManager {
        SessionTokenManager::new(b"top secret".to_vec(), 3600, 1800)
    }

    #[test]
    fn encode_decode_roundtrip_preserves_validity() {
        let mgr = manager();
        let token = mgr.generate("client-1", "1.2.3.4", None);
        let encoded = SessionTokenManager::encode_token(&token).unwrap();
        let decoded = SessionTokenManager::decode_token(&encoded).unwrap();
        assert_eq!(token, decoded);
        assert!(mgr.validate(&decoded, "1.2.3.4", true).is_ok());
    }

    #[test]
    fn tampered_signature_is_rejected() {
        let mgr = manager();
        let mut token = mgr.generate("client-1", "1.2.3.4", None);
        token.signature.push('0');
        assert!(mgr.validate(&token, "1.2.3.4", true).is_err());
    }

    #[test]
    fn ip_mismatch_rejected_when_checked() {
        let mgr = manager();
        let token = mgr.generate("client-1", "1.2.3.4", None);
        assert!(mgr.validate(&token, "9.9.9.9", true).is_err());
        assert!(mgr.validate(&token, "9.9.9.9", false).is_ok());
    }

    #[test]
    fn expired_token_rejected() {
        let mgr = SessionTokenManager::new(b"s".to_vec(), -1, 1800);
        let token = mgr.generate("client-1", "1.2.3.4", None);
        assert!(mgr.validate(&token, "1.2.3.4", false).is_err());
    }

    #[test]
    fn should_renew_near_expiry() {
        let mgr = SessionTokenManager::new(b"s".to_vec(), 60, 1800);
        let token = mgr.generate("client-1", "1.2.3.4", None);
        assert!(mgr.should_renew(&token));
    }

    #[test]
    fn renew_preserves_identity_fields() {
        let mgr = manager();
        let token = mgr.generate("client-1", "1.2.3.4", Some("fp"));
        let renewed = mgr.renew(&token);
        assert_eq!(renewed.client_id, token.client_id);
        assert_eq!(renewed.ip, token.ip);
        assert_eq!(renewed.tls_fingerprint, token.tls_fingerprint);
        assert_ne!(renewed.token_id, token.token_id);
    }

    #[test]
    fn update_activity_does_not_change_signature() {
        let mgr = manager();
        let mut token = mgr.generate("client-1", "1.2.3.4", None);
        let signature_before = token.signature.clone();
        mgr.update_activity(&mut token);
        assert_eq!(token.signature, signature_before);
        assert!(mgr.validate(&token, "1.2.3.4", true).is_ok());
    }
}
