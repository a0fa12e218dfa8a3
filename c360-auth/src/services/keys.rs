//! Signing key material for access tokens.
//!
//! Keys are provisioned out of band; this module only reads them and derives
//! what the token service and the JWKS endpoint need.

use async_trait::async_trait;
use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine as _};
use ed25519_dalek::{
    pkcs8::{DecodePrivateKey, EncodePrivateKey},
    SigningKey,
};
use jsonwebtoken::{DecodingKey, EncodingKey};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::path::PathBuf;

use super::ServiceError;

#[async_trait]
pub trait KeySource: Send + Sync {
    async fn load(&self) -> Result<SigningKey, ServiceError>;
}

/// Reads a PKCS#8 PEM encoded Ed25519 private key from disk.
pub struct FileKeySource {
    path: PathBuf,
}

impl FileKeySource {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

#[async_trait]
impl KeySource for FileKeySource {
    async fn load(&self) -> Result<SigningKey, ServiceError> {
        let pem = tokio::fs::read_to_string(&self.path).await.map_err(|e| {
            anyhow::anyhow!(
                "Failed to read signing key from {}: {}",
                self.path.display(),
                e
            )
        })?;

        SigningKey::from_pkcs8_pem(&pem)
            .map_err(|e| ServiceError::Internal(anyhow::anyhow!("Failed to parse signing key: {}", e)))
    }
}

/// Key held in memory.
pub struct StaticKeySource {
    key: SigningKey,
}

impl StaticKeySource {
    pub fn new(key: SigningKey) -> Self {
        Self { key }
    }
}

#[async_trait]
impl KeySource for StaticKeySource {
    async fn load(&self) -> Result<SigningKey, ServiceError> {
        Ok(self.key.clone())
    }
}

/// Public key in JWK form (RFC 8037 OKP).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Jwk {
    pub kty: String,
    pub crv: String,
    pub x: String,
    pub kid: String,
    pub alg: String,
    #[serde(rename = "use")]
    pub key_use: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Jwks {
    pub keys: Vec<Jwk>,
}

/// Everything derived from the active signing key.
pub struct KeyMaterial {
    pub kid: String,
    pub encoding_key: EncodingKey,
    pub decoding_key: DecodingKey,
    pub jwk: Jwk,
}

impl KeyMaterial {
    pub fn from_signing_key(key: &SigningKey) -> Result<Self, ServiceError> {
        let der = key
            .to_pkcs8_der()
            .map_err(|e| anyhow::anyhow!("Failed to encode signing key: {}", e))?;
        let encoding_key = EncodingKey::from_ed_der(der.as_bytes());

        let x = URL_SAFE_NO_PAD.encode(key.verifying_key().as_bytes());
        let decoding_key = DecodingKey::from_ed_components(&x)
            .map_err(|e| anyhow::anyhow!("Failed to build verification key: {}", e))?;

        let kid = thumbprint(&x);

        Ok(Self {
            jwk: Jwk {
                kty: "OKP".to_string(),
                crv: "Ed25519".to_string(),
                x,
                kid: kid.clone(),
                alg: "EdDSA".to_string(),
                key_use: "sig".to_string(),
            },
            kid,
            encoding_key,
            decoding_key,
        })
    }

    pub fn jwks(&self) -> Jwks {
        Jwks {
            keys: vec![self.jwk.clone()],
        }
    }
}

/// RFC 7638 thumbprint over the required OKP members in lexical order.
fn thumbprint(x: &str) -> String {
    let canonical = format!(r#"{{"crv":"Ed25519","kty":"OKP","x":"{}"}}"#, x);
    URL_SAFE_NO_PAD.encode(Sha256::digest(canonical.as_bytes()))
}
