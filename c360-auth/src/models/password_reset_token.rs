use chrono::{DateTime, Duration, Utc};
use sqlx::FromRow;
use uuid::Uuid;

use super::RefreshToken;

pub const PASSWORD_RESET_TTL_HOURS: i64 = 1;

/// Single-use password reset grant. Stored hashed like refresh tokens.
#[derive(Debug, Clone, FromRow)]
pub struct PasswordResetToken {
    pub id: Uuid,
    pub user_id: Uuid,
    pub token_hash: String,
    pub expires_at: DateTime<Utc>,
    pub used: bool,
    pub created_at: DateTime<Utc>,
}

impl PasswordResetToken {
    pub fn new(user_id: Uuid, raw_token: &str, now: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::new_v4(),
            user_id,
            token_hash: RefreshToken::hash_token(raw_token),
            expires_at: now + Duration::hours(PASSWORD_RESET_TTL_HOURS),
            used: false,
            created_at: now,
        }
    }

    pub fn hash_token(raw_token: &str) -> String {
        RefreshToken::hash_token(raw_token)
    }

    pub fn is_usable(&self, now: DateTime<Utc>) -> bool {
        !self.used && self.expires_at > now
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reset_token_window() {
        let now = Utc::now();
        let mut token = PasswordResetToken::new(Uuid::new_v4(), "raw", now);

        assert!(token.is_usable(now));
        assert!(!token.is_usable(now + Duration::minutes(61)));

        token.used = true;
        assert!(!token.is_usable(now));
    }
}
