//! Signing key and global secret
//!
//! Both are loaded from the params table at startup, generated and persisted
//! on first run, and never rotated in process.

use crate::constants::*;
use crate::context::OpContext;
use crate::storage::Storage;
use crate::{AuthGrantError, Result};
use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use jsonwebtoken::{Algorithm, DecodingKey, EncodingKey};
use rsa::RsaPrivateKey;
use rsa::pkcs8::{DecodePrivateKey, EncodePrivateKey, LineEnding};
use rsa::traits::PublicKeyParts;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use tracing::info;

/// Persisted form of the signing key
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoredKey {
    pub kid: String,
    pub alg: String,
    #[serde(rename = "use")]
    pub key_use: String,
    /// PKCS#8 PEM private key
    pub pem: String,
}

impl StoredKey {
    /// Generate a fresh RSA key. CPU bound; call off the async runtime.
    pub fn generate() -> Result<Self> {
        let mut rng = rsa::rand_core::OsRng;
        let key = RsaPrivateKey::new(&mut rng, RSA_KEY_BITS)
            .map_err(|e| AuthGrantError::crypto(format!("failed to generate RSA key: {}", e)))?;
        let pem = key
            .to_pkcs8_pem(LineEnding::LF)
            .map_err(|e| AuthGrantError::crypto(format!("failed to encode RSA key: {}", e)))?;
        Ok(Self {
            kid: uuid::Uuid::new_v4().to_string(),
            alg: "RS256".to_string(),
            key_use: "sig".to_string(),
            pem: pem.as_str().to_string(),
        })
    }
}

/// Process-wide key material
#[derive(Clone)]
pub struct KeyMaterial {
    kid: String,
    encoding_key: EncodingKey,
    decoding_key: DecodingKey,
    modulus: String,
    exponent: String,
    global_secret: Vec<u8>,
}

impl std::fmt::Debug for KeyMaterial {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KeyMaterial")
            .field("kid", &self.kid)
            .finish_non_exhaustive()
    }
}

impl KeyMaterial {
    /// Load the signing key and global secret, generating whichever is absent
    pub async fn load_or_generate(ctx: &OpContext, storage: &dyn Storage) -> Result<Self> {
        let stored = match ctx.run(storage.get_param(PARAM_RSA_KEY)).await? {
            Some(raw) => serde_json::from_str::<StoredKey>(&raw).map_err(|e| {
                AuthGrantError::crypto(format!("stored signing key is unreadable: {}", e))
            })?,
            None => {
                info!("No signing key found, generating a {}-bit RSA key", RSA_KEY_BITS);
                let stored = tokio::task::spawn_blocking(StoredKey::generate)
                    .await
                    .map_err(|e| AuthGrantError::crypto(format!("key generation task failed: {}", e)))??;
                let raw = serde_json::to_string(&stored)?;
                ctx.run(storage.set_param(PARAM_RSA_KEY, &raw)).await?;
                stored
            }
        };

        let global_secret = match ctx.run(storage.get_param(PARAM_GLOBAL_SECRET)).await? {
            Some(raw) => hex::decode(raw.trim()).map_err(|e| {
                AuthGrantError::crypto(format!("stored global secret is not hex: {}", e))
            })?,
            None => {
                info!("No global secret found, generating one");
                let secret = generate_global_secret();
                ctx.run(storage.set_param(PARAM_GLOBAL_SECRET, &hex::encode(&secret)))
                    .await?;
                secret
            }
        };

        Self::from_parts(&stored, global_secret)
    }

    pub fn from_parts(stored: &StoredKey, global_secret: Vec<u8>) -> Result<Self> {
        if stored.alg != "RS256" {
            return Err(AuthGrantError::crypto(format!(
                "unsupported signing algorithm '{}'",
                stored.alg
            )));
        }
        if global_secret.len() < GLOBAL_SECRET_LEN {
            return Err(AuthGrantError::crypto(format!(
                "global secret must be at least {} bytes",
                GLOBAL_SECRET_LEN
            )));
        }

        let private_key = RsaPrivateKey::from_pkcs8_pem(&stored.pem)
            .map_err(|e| AuthGrantError::crypto(format!("invalid signing key: {}", e)))?;
        let encoding_key = EncodingKey::from_rsa_pem(stored.pem.as_bytes())
            .map_err(|e| AuthGrantError::crypto(format!("invalid signing key: {}", e)))?;

        let public_key = private_key.to_public_key();
        let modulus = URL_SAFE_NO_PAD.encode(public_key.n().to_bytes_be());
        let exponent = URL_SAFE_NO_PAD.encode(public_key.e().to_bytes_be());
        let decoding_key = DecodingKey::from_rsa_components(&modulus, &exponent)
            .map_err(|e| AuthGrantError::crypto(format!("invalid public key: {}", e)))?;

        Ok(Self {
            kid: stored.kid.clone(),
            encoding_key,
            decoding_key,
            modulus,
            exponent,
            global_secret,
        })
    }

    pub fn kid(&self) -> &str {
        &self.kid
    }

    pub fn algorithm(&self) -> Algorithm {
        Algorithm::RS256
    }

    pub fn encoding_key(&self) -> &EncodingKey {
        &self.encoding_key
    }

    pub fn decoding_key(&self) -> &DecodingKey {
        &self.decoding_key
    }

    /// HMAC key for opaque tokens
    pub fn global_secret(&self) -> &[u8] {
        &self.global_secret
    }

    /// Public JSON Web Key Set
    pub fn jwks(&self) -> Value {
        json!({
            "keys": [{
                "kty": "RSA",
                "use": "sig",
                "alg": "RS256",
                "kid": self.kid,
                "n": self.modulus,
                "e": self.exponent,
            }]
        })
    }
}

fn generate_global_secret() -> Vec<u8> {
    use rand::RngCore;
    let mut secret = vec![0u8; GLOBAL_SECRET_LEN];
    rand::rng().fill_bytes(&mut secret);
    secret
}

/// Shared key for tests; RSA generation is too slow to repeat per test
#[cfg(test)]
pub(crate) fn test_key_material() -> KeyMaterial {
    use once_cell::sync::Lazy;
    static STORED: Lazy<StoredKey> =
        Lazy::new(|| StoredKey::generate().expect("test key generation should succeed"));
    KeyMaterial::from_parts(&STORED, vec![7u8; GLOBAL_SECRET_LEN]).expect("test key should load")
}

#[cfg(test)]
#[path = "keys_test.rs"]
mod keys_test;
