use c360_core::error::AppError;
use thiserror::Error;

/// Message returned for every failed credential check.
pub const INVALID_CREDENTIALS: &str = "Invalid credentials";
/// Message returned for every rejected token, whatever the cause.
pub const INVALID_TOKEN: &str = "Invalid or expired token";
pub const LAST_OWNER: &str = "A company must keep at least one owner";

#[derive(Error, Debug)]
pub enum ServiceError {
    #[error("Database error: {0}")]
    Database(anyhow::Error),

    #[error("Cache error: {0}")]
    Cache(anyhow::Error),

    #[error("Internal server error: {0}")]
    Internal(#[from] anyhow::Error),

    #[error("Invalid credentials")]
    InvalidCredentials,

    #[error("Invalid token")]
    InvalidToken,

    #[error("Email already registered")]
    EmailAlreadyRegistered,

    #[error("User is already a member of this company")]
    MembershipExists,

    #[error("User not found")]
    UserNotFound,

    #[error("Member not found")]
    MemberNotFound,

    #[error("Tenant id is reserved")]
    ReservedTenant,

    #[error("{}", LAST_OWNER)]
    LastOwner,

    #[error("Forbidden: {0}")]
    Forbidden(String),

    #[error("Email error: {0}")]
    EmailError(String),

    #[error("Validation error: {0}")]
    Validation(String),
}

impl From<redis::RedisError> for ServiceError {
    fn from(err: redis::RedisError) -> Self {
        ServiceError::Cache(anyhow::Error::new(err))
    }
}

impl From<sqlx::Error> for ServiceError {
    fn from(err: sqlx::Error) -> Self {
        ServiceError::Database(anyhow::Error::new(err))
    }
}

impl From<ServiceError> for AppError {
    fn from(err: ServiceError) -> Self {
        match err {
            ServiceError::Database(e) => AppError::Database(e),
            ServiceError::Cache(e) => AppError::Cache(e),
            ServiceError::Internal(e) => AppError::Internal(e),
            ServiceError::InvalidCredentials => {
                AppError::Authentication(INVALID_CREDENTIALS.to_string())
            }
            ServiceError::InvalidToken => AppError::Authentication(INVALID_TOKEN.to_string()),
            ServiceError::EmailAlreadyRegistered => {
                AppError::Conflict("Email already registered".to_string())
            }
            ServiceError::MembershipExists => {
                AppError::Conflict("User is already a member of this company".to_string())
            }
            ServiceError::UserNotFound => AppError::NotFound("User not found".to_string()),
            ServiceError::MemberNotFound => AppError::NotFound("Member not found".to_string()),
            ServiceError::ReservedTenant => {
                AppError::BadRequest("Tenant id is reserved".to_string())
            }
            ServiceError::LastOwner => AppError::Forbidden(LAST_OWNER.to_string()),
            ServiceError::Forbidden(msg) => AppError::Forbidden(msg),
            ServiceError::EmailError(e) => AppError::Email(e),
            ServiceError::Validation(e) => AppError::BadRequest(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_credential_and_token_failures_look_alike() {
        for err in [ServiceError::InvalidCredentials, ServiceError::InvalidToken] {
            assert!(matches!(AppError::from(err), AppError::Authentication(_)));
        }
        assert!(matches!(
            AppError::from(ServiceError::InvalidToken),
            AppError::Authentication(msg) if msg == INVALID_TOKEN
        ));
    }

    #[test]
    fn test_forbidden_keeps_message() {
        let err = AppError::from(ServiceError::Forbidden("Access to this company is not allowed".into()));
        assert!(matches!(err, AppError::Forbidden(msg) if msg.contains("company")));
    }

    #[test]
    fn test_last_owner_is_forbidden() {
        assert!(matches!(
            AppError::from(ServiceError::LastOwner),
            AppError::Forbidden(msg) if msg == LAST_OWNER
        ));
    }
}
