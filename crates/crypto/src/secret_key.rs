//! AES-256-GCM envelope plus an HMAC-SHA256 challenge/response verifier.

use aes_gcm::aead::{Aead, KeyInit};
use aes_gcm::{Aes256Gcm, Key, Nonce};
use base64::Engine;
use hmac::{Hmac, Mac};
use rand::rngs::OsRng;
use rand::RngCore;
use sha2::Sha256;
use subtle::ConstantTimeEq;

use crate::error::{CryptoError, Result};

type HmacSha256 = Hmac<Sha256>;

const NONCE_LEN: usize = 12;
const SECRET_LEN: usize = 32;

/// Envelope/challenge-response manager keyed by one master AES-256-GCM
/// key, supplied base64-encoded via the operator's configuration object.
/// Construction fails fast on a malformed or wrong-length key — the
/// only place master-key mis-configuration is discovered.
pub struct SecretKeyManager {
    cipher: Aes256Gcm,
}

impl SecretKeyManager {
    pub fn new(master_key_base64: &str) -> Result<Self> {
        let key_bytes = base64::engine::general_purpose::STANDARD
            .decode(master_key_base64)
            .map_err(|e| CryptoError::InvalidParam(format!("master key is not base64: {e}")))?;

        if key_bytes.len() != SECRET_LEN {
            return Err(CryptoError::NotConfigured(format!(
                "master key must decode to {SECRET_LEN} bytes, got {}",
                key_bytes.len()
            )));
        }

        let key = Key::<Aes256Gcm>::from_slice(&key_bytes);
        Ok(Self {
            cipher: Aes256Gcm::new(key),
        })
    }

    /// Generate a fresh base64 32-byte master key, for one-shot operator
    /// bootstrap.
    pub fn generate_master_key() -> String {
        let mut key = [0u8; SECRET_LEN];
        OsRng.fill_bytes(&mut key);
        base64::engine::general_purpose::STANDARD.encode(key)
    }

    /// Draw a new 32-byte secret, hex-encode it as the plaintext the
    /// caller hands to its client out of band, and return its envelope
    /// encrypted under the master key.
    pub fn generate_credentials(&self) -> Result<(String, String)> {
        let mut secret = [0u8; SECRET_LEN];
        OsRng.fill_bytes(&mut secret);
        let plaintext_hex = hex::encode(secret);
        let envelope = self.encrypt(&secret)?;
        Ok((plaintext_hex, envelope))
    }

    /// `base64(nonce ‖ ciphertext ‖ tag)`, nonce drawn fresh every call.
    pub fn encrypt(&self, plaintext: &[u8]) -> Result<String> {
        let mut nonce_bytes = [0u8; NONCE_LEN];
        OsRng.fill_bytes(&mut nonce_bytes);
        let nonce = Nonce::from_slice(&nonce_bytes);

        let ciphertext = self
            .cipher
            .encrypt(nonce, plaintext)
            .map_err(|_| CryptoError::InvalidParam("encryption failed".into()))?;

        let mut out = Vec::with_capacity(NONCE_LEN + ciphertext.len());
        out.extend_from_slice(&nonce_bytes);
        out.extend_from_slice(&ciphertext);
        Ok(base64::engine::general_purpose::STANDARD.encode(out))
    }

    pub fn decrypt(&self, envelope_base64: &str) -> Result<Vec<u8>> {
        let raw = base64::engine::general_purpose::STANDARD
            .decode(envelope_base64)
            .map_err(|e| CryptoError::InvalidParam(format!("envelope is not base64: {e}")))?;

        if raw.len() < NONCE_LEN {
            return Err(CryptoError::InvalidParam("envelope too short".into()));
        }

        let (nonce_bytes, ciphertext) = raw.split_at(NONCE_LEN);
        let nonce = Nonce::from_slice(nonce_bytes);

        self.cipher
            .decrypt(nonce, ciphertext)
            .map_err(|_| CryptoError::AuthFailed)
    }

    /// 32 random bytes, hex-encoded (64 chars).
    pub fn generate_challenge() -> String {
        let mut challenge = [0u8; SECRET_LEN];
        OsRng.fill_bytes(&mut challenge);
        hex::encode(challenge)
    }

    /// `hex(HMAC-SHA256(key = secret_key_plaintext, msg = challenge))`.
    /// Both arguments are hex-encoded 32-byte values.
    pub fn compute_response(secret_key_plaintext_hex: &str, challenge_hex: &str) -> Result<String> {
        let key = hex::decode(secret_key_plaintext_hex)
            .map_err(|e| CryptoError::InvalidParam(format!("secret key is not hex: {e}")))?;
        let challenge = hex::decode(challenge_hex)
            .map_err(|e| CryptoError::InvalidParam(format!("challenge is not hex: {e}")))?;
        Ok(hmac_hex(&key, &challenge))
    }

    /// Decrypts `envelope`, recomputes the expected response, and
    /// compares in constant time. Any failure along the way — bad
    /// base64, AEAD auth failure, malformed hex — yields `false` rather
    /// than propagating an error.
    pub fn verify_response(&self, envelope_base64: &str, challenge_hex: &str, response_hex: &str) -> bool {
        let Ok(secret) = self.decrypt(envelope_base64) else {
            return false;
        };
        let Ok(challenge) = hex::decode(challenge_hex) else {
            return false;
        };
        let Ok(expected_response) = hex::decode(response_hex) else {
            return false;
        };

        let expected = hmac_hex(&secret, &challenge);
        let Ok(expected_bytes) = hex::decode(&expected) else {
            return false;
        };

        expected_bytes.ct_eq(&expected_response).into()
    }
}

fn hmac_hex(key: &[u8], msg: &[u8]) -> String {
    let mut mac = HmacSha256::new_from_slice(key).expect("HMAC accepts any key length");
    mac.update(msg);
    hex::encode(mac.finalize().into_bytes())
}
