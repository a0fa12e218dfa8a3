//! Access token issuing/verification and the refresh token lifecycle.

use chrono::{DateTime, Duration, Utc};
use jsonwebtoken::{decode, encode, Algorithm, Header, Validation};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::OnceCell;
use uuid::Uuid;

use super::clock::Clock;
use super::keys::{Jwks, KeyMaterial, KeySource};
use super::store::AuthStore;
use super::ServiceError;
use crate::config::RefreshRotation;
use crate::models::{RefreshToken, Role, TenantId};
use crate::utils::generate_random_token;

pub const ACCESS_TOKEN_TTL_MINUTES: i64 = 15;
pub const TOKEN_VERSION: u32 = 1;

/// Claims carried by every access token.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccessClaims {
    /// User id
    pub sub: String,
    pub tenant: TenantId,
    pub role: Role,
    pub iat: i64,
    pub exp: i64,
    pub ver: u32,
}

impl AccessClaims {
    pub fn user_id(&self) -> Result<Uuid, ServiceError> {
        Uuid::parse_str(&self.sub).map_err(|_| ServiceError::InvalidToken)
    }
}

/// Result of a successful refresh token check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RefreshGrant {
    pub user_id: Uuid,
    pub record_id: Uuid,
}

/// Issues and verifies credentials. Built once and shared through app state.
pub struct TokenService {
    key_source: Arc<dyn KeySource>,
    keys: OnceCell<KeyMaterial>,
    store: Arc<dyn AuthStore>,
    clock: Arc<dyn Clock>,
    rotation: RefreshRotation,
}

impl TokenService {
    pub fn new(
        key_source: Arc<dyn KeySource>,
        store: Arc<dyn AuthStore>,
        clock: Arc<dyn Clock>,
        rotation: RefreshRotation,
    ) -> Self {
        Self {
            key_source,
            keys: OnceCell::new(),
            store,
            clock,
            rotation,
        }
    }

    pub fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }

    pub fn access_token_expiry_seconds(&self) -> i64 {
        ACCESS_TOKEN_TTL_MINUTES * 60
    }

    /// Loads the signing key on first use. A failed load is retried on the
    /// next call.
    async fn keys(&self) -> Result<&KeyMaterial, ServiceError> {
        self.keys
            .get_or_try_init(|| async {
                let key = self.key_source.load().await?;
                let material = KeyMaterial::from_signing_key(&key)?;
                tracing::info!(kid = %material.kid, "Signing key loaded");
                Ok(material)
            })
            .await
    }

    pub async fn jwks(&self) -> Result<Jwks, ServiceError> {
        Ok(self.keys().await?.jwks())
    }

    // ==================== Access Tokens ====================

    pub async fn issue_access_token(
        &self,
        subject: Uuid,
        tenant: &TenantId,
        role: Role,
    ) -> Result<String, ServiceError> {
        let keys = self.keys().await?;
        let now = self.clock.now();

        let claims = AccessClaims {
            sub: subject.to_string(),
            tenant: tenant.clone(),
            role,
            iat: now.timestamp(),
            exp: (now + Duration::minutes(ACCESS_TOKEN_TTL_MINUTES)).timestamp(),
            ver: TOKEN_VERSION,
        };

        let mut header = Header::new(Algorithm::EdDSA);
        header.kid = Some(keys.kid.clone());

        encode(&header, &claims, &keys.encoding_key)
            .map_err(|e| ServiceError::Internal(anyhow::anyhow!("Failed to encode access token: {}", e)))
    }

    /// Every rejection is reported as [`ServiceError::InvalidToken`]; the
    /// cause only reaches the debug log.
    pub async fn verify_access_token(&self, token: &str) -> Result<AccessClaims, ServiceError> {
        let keys = self.keys().await?;

        let mut validation = Validation::new(Algorithm::EdDSA);
        // Expiry is checked below against the injected clock.
        validation.validate_exp = false;
        validation.leeway = 0;

        let claims = decode::<AccessClaims>(token, &keys.decoding_key, &validation)
            .map_err(|e| {
                tracing::debug!(error = %e, "Access token rejected: decode");
                ServiceError::InvalidToken
            })?
            .claims;

        if claims.ver != TOKEN_VERSION {
            tracing::debug!(ver = claims.ver, "Access token rejected: version");
            return Err(ServiceError::InvalidToken);
        }

        if claims.exp <= self.clock.now().timestamp() {
            tracing::debug!(exp = claims.exp, "Access token rejected: expired");
            return Err(ServiceError::InvalidToken);
        }

        claims.user_id()?;

        Ok(claims)
    }

    // ==================== Refresh Tokens ====================

    /// Persists a new refresh token and returns its raw value. The raw value
    /// is not stored anywhere.
    pub async fn issue_refresh_token(&self, user_id: Uuid) -> Result<String, ServiceError> {
        let raw = generate_random_token();
        let record = RefreshToken::new(user_id, &raw, self.clock.now());
        self.store.insert_refresh_token(&record).await?;
        Ok(raw)
    }

    pub async fn verify_refresh_token(&self, raw: &str) -> Result<RefreshGrant, ServiceError> {
        let hash = RefreshToken::hash_token(raw);

        match self.store.find_refresh_token_by_hash(&hash).await? {
            Some(record) if record.is_active(self.clock.now()) => Ok(RefreshGrant {
                user_id: record.user_id,
                record_id: record.id,
            }),
            Some(record) => {
                tracing::debug!(
                    record_id = %record.id,
                    revoked = record.revoked,
                    "Refresh token rejected: inactive"
                );
                Err(ServiceError::InvalidToken)
            }
            None => {
                tracing::debug!("Refresh token rejected: unknown");
                Err(ServiceError::InvalidToken)
            }
        }
    }

    /// Applies the rotation policy to a grant from [`Self::verify_refresh_token`].
    ///
    /// Call it only once the refresh is otherwise accepted: under
    /// [`RefreshRotation::RotateOnUse`] the presented token is revoked here and
    /// the returned replacement is the caller's only remaining session.
    pub async fn exchange_refresh_token(
        &self,
        grant: &RefreshGrant,
    ) -> Result<Option<String>, ServiceError> {
        match self.rotation {
            RefreshRotation::Reuse => Ok(None),
            RefreshRotation::RotateOnUse => {
                // Only one concurrent exchange can flip the record.
                if !self.store.revoke_refresh_token(grant.record_id).await? {
                    tracing::debug!(record_id = %grant.record_id, "Refresh token lost rotation race");
                    return Err(ServiceError::InvalidToken);
                }
                Ok(Some(self.issue_refresh_token(grant.user_id).await?))
            }
        }
    }

    /// Idempotent. Unknown tokens are ignored.
    pub async fn revoke_refresh_token(&self, raw: &str) -> Result<(), ServiceError> {
        self.store
            .revoke_refresh_token_by_hash(&RefreshToken::hash_token(raw))
            .await
    }

    pub async fn revoke_all_refresh_tokens(&self, user_id: Uuid) -> Result<u64, ServiceError> {
        let revoked = self.store.revoke_all_refresh_tokens_for_user(user_id).await?;
        tracing::info!(%user_id, revoked, "Revoked all refresh tokens");
        Ok(revoked)
    }
}
