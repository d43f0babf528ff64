// Encryption at rest for sensitive settings using ChaCha20-Poly1305 AEAD
//
// KEY MATERIAL:
// - Configured master key (base64, inline or from an environment variable)
// - Otherwise derived from machine ID + username + hostname
//
// Machine-derived keys protect secrets in copied or synced storage files but
// not against someone with local access to the same machine.
//
// Two subkeys are expanded from the master key with HKDF-SHA256: one seals
// values, the other derives opaque storage ids for key names so the
// encrypted file does not reveal which settings it holds.

use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use ring::{
    aead::{self, Aad, LessSafeKey, Nonce, UnboundKey},
    hkdf, hmac,
    rand::{SecureRandom, SystemRandom},
};
use std::fmt;

use crate::config::EncryptionConfig;

/// Application salt for key derivation (constant, not secret)
const APP_SALT: &[u8] = b"module-settings-secure-store-v1";

/// Nonce size for ChaCha20-Poly1305
const NONCE_SIZE: usize = aead::NONCE_LEN;

/// Minimum accepted master key length in bytes
const MIN_MASTER_KEY_LEN: usize = 32;

#[derive(Debug, thiserror::Error)]
pub enum CryptoError {
    #[error("Encryption key unavailable: {0}")]
    KeyUnavailable(String),

    #[error("Failed to derive encryption key: {0}")]
    KeyDerivation(String),

    #[error("Failed to generate random data")]
    RandomGeneration,

    #[error("Failed to encrypt data")]
    Encryption,

    #[error("Failed to decrypt data: {0}")]
    Decryption(String),

    #[error("Invalid encrypted data format")]
    InvalidFormat,
}

/// Where the master key comes from
#[derive(Clone, PartialEq, Eq)]
pub enum KeySource {
    /// Base64 key given directly
    Inline(String),
    /// Base64 key read from the named environment variable
    Env(String),
    /// Derived from machine identity
    Machine,
}

impl fmt::Debug for KeySource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            KeySource::Inline(_) => f.write_str("Inline(<redacted>)"),
            KeySource::Env(var) => f.debug_tuple("Env").field(var).finish(),
            KeySource::Machine => f.write_str("Machine"),
        }
    }
}

impl KeySource {
    pub fn from_config(config: &EncryptionConfig) -> Self {
        if let Some(key) = &config.master_key {
            KeySource::Inline(key.clone())
        } else if let Some(var) = &config.master_key_env {
            KeySource::Env(var.clone())
        } else {
            KeySource::Machine
        }
    }

    /// Resolve to raw master key bytes
    fn resolve(&self) -> Result<Vec<u8>, CryptoError> {
        match self {
            KeySource::Inline(encoded) => decode_master_key(encoded),
            KeySource::Env(var) => {
                let encoded = std::env::var(var).map_err(|_| {
                    CryptoError::KeyUnavailable(format!("environment variable {} is not set", var))
                })?;
                decode_master_key(&encoded)
            }
            KeySource::Machine => machine_key_material(),
        }
    }
}

fn decode_master_key(encoded: &str) -> Result<Vec<u8>, CryptoError> {
    let key = BASE64
        .decode(encoded.trim())
        .map_err(|_| CryptoError::KeyUnavailable("master key is not valid base64".to_string()))?;
    if key.len() < MIN_MASTER_KEY_LEN {
        return Err(CryptoError::KeyUnavailable(format!(
            "master key must be at least {} bytes",
            MIN_MASTER_KEY_LEN
        )));
    }
    Ok(key)
}

fn machine_key_material() -> Result<Vec<u8>, CryptoError> {
    let machine_id = machine_uid::get()
        .map_err(|e| CryptoError::KeyUnavailable(format!("failed to get machine ID: {}", e)))?;

    let username = std::env::var("USER")
        .or_else(|_| std::env::var("USERNAME"))
        .unwrap_or_else(|_| "unknown-user".to_string());

    let hostname = hostname::get()
        .map_err(|e| CryptoError::KeyUnavailable(format!("failed to get hostname: {}", e)))?
        .to_string_lossy()
        .to_string();

    let mut material = Vec::with_capacity(machine_id.len() + username.len() + hostname.len());
    material.extend_from_slice(machine_id.as_bytes());
    material.extend_from_slice(username.as_bytes());
    material.extend_from_slice(hostname.as_bytes());
    Ok(material)
}

/// Seals and opens secret values, and derives opaque storage ids
pub struct SecretCipher {
    rng: SystemRandom,
    sealing_key: LessSafeKey,
    id_key: hmac::Key,
}

impl fmt::Debug for SecretCipher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SecretCipher").finish_non_exhaustive()
    }
}

impl SecretCipher {
    pub fn from_source(source: &KeySource) -> Result<Self, CryptoError> {
        let material = source.resolve()?;
        Self::from_key_material(&material)
    }

    /// Derive both subkeys from raw key material
    pub fn from_key_material(material: &[u8]) -> Result<Self, CryptoError> {
        let salt = hkdf::Salt::new(hkdf::HKDF_SHA256, APP_SALT);
        let prk = salt.extract(material);

        let sealing_bytes = expand(&prk, b"settings-value-encryption")?;
        let id_bytes = expand(&prk, b"settings-key-ids")?;

        let unbound = UnboundKey::new(&aead::CHACHA20_POLY1305, &sealing_bytes)
            .map_err(|_| CryptoError::KeyDerivation("invalid sealing key".to_string()))?;

        Ok(Self {
            rng: SystemRandom::new(),
            sealing_key: LessSafeKey::new(unbound),
            id_key: hmac::Key::new(hmac::HMAC_SHA256, &id_bytes),
        })
    }

    /// Opaque, stable storage id for a key within a namespace
    pub fn storage_id(&self, namespace: &str, key: &str) -> String {
        let mut ctx = hmac::Context::with_key(&self.id_key);
        ctx.update(namespace.as_bytes());
        ctx.update(&[0]);
        ctx.update(key.as_bytes());
        hex::encode(ctx.sign().as_ref())
    }

    /// Encrypt `plaintext`, binding it to `aad`.
    /// Returns base64-encoded: nonce || ciphertext || tag
    pub fn seal(&self, aad: &str, plaintext: &str) -> Result<String, CryptoError> {
        let mut nonce_bytes = [0u8; NONCE_SIZE];
        self.rng
            .fill(&mut nonce_bytes)
            .map_err(|_| CryptoError::RandomGeneration)?;
        let nonce = Nonce::assume_unique_for_key(nonce_bytes);

        let mut in_out = plaintext.as_bytes().to_vec();
        self.sealing_key
            .seal_in_place_append_tag(nonce, Aad::from(aad.as_bytes()), &mut in_out)
            .map_err(|_| CryptoError::Encryption)?;

        let mut result = Vec::with_capacity(NONCE_SIZE + in_out.len());
        result.extend_from_slice(&nonce_bytes);
        result.extend_from_slice(&in_out);
        Ok(BASE64.encode(&result))
    }

    /// Decrypt a value produced by [`SecretCipher::seal`] with the same `aad`
    pub fn open(&self, aad: &str, sealed: &str) -> Result<String, CryptoError> {
        let data = BASE64.decode(sealed).map_err(|_| CryptoError::InvalidFormat)?;
        if data.len() < NONCE_SIZE + aead::CHACHA20_POLY1305.tag_len() {
            return Err(CryptoError::InvalidFormat);
        }

        let (nonce_bytes, ciphertext_and_tag) = data.split_at(NONCE_SIZE);
        let nonce = Nonce::try_assume_unique_for_key(nonce_bytes)
            .map_err(|_| CryptoError::InvalidFormat)?;

        let mut in_out = ciphertext_and_tag.to_vec();
        let plaintext = self
            .sealing_key
            .open_in_place(nonce, Aad::from(aad.as_bytes()), &mut in_out)
            .map_err(|_| CryptoError::Decryption("authentication failed".to_string()))?;

        String::from_utf8(plaintext.to_vec())
            .map_err(|_| CryptoError::Decryption("invalid UTF-8 in decrypted data".to_string()))
    }
}

fn expand(prk: &hkdf::Prk, info: &[u8]) -> Result<[u8; 32], CryptoError> {
    let info = [info];
    let okm = prk
        .expand(&info, hkdf::HKDF_SHA256)
        .map_err(|_| CryptoError::KeyDerivation("HKDF expansion failed".to_string()))?;
    let mut out = [0u8; 32];
    okm.fill(&mut out)
        .map_err(|_| CryptoError::KeyDerivation("HKDF fill failed".to_string()))?;
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cipher() -> SecretCipher {
        SecretCipher::from_key_material(&[7u8; 32]).unwrap()
    }

    #[test]
    fn test_seal_open() {
        let cipher = cipher();
        let sealed = cipher.seal("id", "sk-test-1234567890").unwrap();
        assert_ne!(sealed, "sk-test-1234567890");
        assert_eq!(cipher.open("id", &sealed).unwrap(), "sk-test-1234567890");
    }

    #[test]
    fn test_nonces_differ() {
        let cipher = cipher();
        let a = cipher.seal("id", "same").unwrap();
        let b = cipher.seal("id", "same").unwrap();
        assert_ne!(a, b);
    }

    #[test]
    fn test_ciphertext_is_bound_to_aad() {
        let cipher = cipher();
        let sealed = cipher.seal("apiToken", "abc123").unwrap();
        assert!(matches!(
            cipher.open("otherKey", &sealed),
            Err(CryptoError::Decryption(_))
        ));
    }

    #[test]
    fn test_wrong_key_fails() {
        let sealed = cipher().seal("id", "abc123").unwrap();
        let other = SecretCipher::from_key_material(&[8u8; 32]).unwrap();
        assert!(other.open("id", &sealed).is_err());
    }

    #[test]
    fn test_open_rejects_garbage() {
        let cipher = cipher();
        assert!(matches!(
            cipher.open("id", "not-valid-base64!@#"),
            Err(CryptoError::InvalidFormat)
        ));
        assert!(matches!(
            cipher.open("id", &BASE64.encode(b"short")),
            Err(CryptoError::InvalidFormat)
        ));
    }

    #[test]
    fn test_storage_ids_are_stable_and_opaque() {
        let cipher = cipher();
        let id = cipher.storage_id("voice.secure", "apiToken");
        assert_eq!(id, cipher.storage_id("voice.secure", "apiToken"));
        assert_ne!(id, cipher.storage_id("other.secure", "apiToken"));
        assert!(!id.contains("apiToken"));
        assert_eq!(id.len(), 64);
    }

    #[test]
    fn test_key_source_from_config() {
        let inline = EncryptionConfig {
            master_key: Some(BASE64.encode([1u8; 32])),
            master_key_env: Some("IGNORED".to_string()),
        };
        assert!(matches!(KeySource::from_config(&inline), KeySource::Inline(_)));
        assert_eq!(
            KeySource::from_config(&EncryptionConfig::default()),
            KeySource::Machine
        );
    }

    #[test]
    fn test_short_or_missing_master_key_is_unavailable() {
        let short = KeySource::Inline(BASE64.encode([1u8; 8]));
        assert!(matches!(
            SecretCipher::from_source(&short),
            Err(CryptoError::KeyUnavailable(_))
        ));

        let missing = KeySource::Env("MODULE_SETTINGS_TEST_KEY_THAT_IS_NOT_SET".to_string());
        assert!(matches!(
            SecretCipher::from_source(&missing),
            Err(CryptoError::KeyUnavailable(_))
        ));
    }
}
