use chrono::{DateTime, Duration, Utc};
use sha2::{Digest, Sha256};
use sqlx::FromRow;
use uuid::Uuid;

/// Lifetime of a refresh token. There is no sliding expiry.
pub const REFRESH_TOKEN_TTL_DAYS: i64 = 7;

/// Persisted refresh token. Only the SHA-256 of the raw value is stored.
#[derive(Debug, Clone, FromRow)]
pub struct RefreshToken {
    pub id: Uuid,
    pub user_id: Uuid,
    pub token_hash: String,
    pub expires_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
    /// Revoked rows are kept, never purged.
    pub revoked: bool,
}

impl RefreshToken {
    pub fn new(user_id: Uuid, raw_token: &str, now: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::new_v4(),
            user_id,
            token_hash: Self::hash_token(raw_token),
            expires_at: now + Duration::days(REFRESH_TOKEN_TTL_DAYS),
            created_at: now,
            revoked: false,
        }
    }

    /// Hash a token using SHA-256
    pub fn hash_token(token: &str) -> String {
        let mut hasher = Sha256::new();
        hasher.update(token.as_bytes());
        hex::encode(hasher.finalize())
    }

    pub fn is_active(&self, now: DateTime<Utc>) -> bool {
        !self.revoked && self.expires_at > now
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_refresh_token_creation() {
        let now = Utc::now();
        let token = RefreshToken::new(Uuid::new_v4(), "token_abc", now);

        assert_ne!(token.token_hash, "token_abc");
        assert_eq!(token.token_hash, RefreshToken::hash_token("token_abc"));
        assert_eq!(token.expires_at - now, Duration::days(7));
        assert!(!token.revoked);
        assert!(token.is_active(now));
    }

    #[test]
    fn test_refresh_token_expiry_is_exclusive() {
        let now = Utc::now();
        let token = RefreshToken::new(Uuid::new_v4(), "token_abc", now);

        assert!(token.is_active(token.expires_at - Duration::seconds(1)));
        assert!(!token.is_active(token.expires_at));
    }

    #[test]
    fn test_refresh_token_revocation() {
        let now = Utc::now();
        let mut token = RefreshToken::new(Uuid::new_v4(), "token_abc", now);

        token.revoked = true;
        assert!(!token.is_active(now));
    }
}
