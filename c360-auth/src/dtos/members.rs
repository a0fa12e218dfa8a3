use serde::Deserialize;
use validator::Validate;

use crate::models::Role;

#[derive(Debug, Deserialize, Validate)]
pub struct AddMemberRequest {
    #[validate(email(message = "Invalid email format"))]
    pub email: String,

    pub role: Role,
}

#[derive(Debug, Deserialize, Validate)]
pub struct UpdateMemberRoleRequest {
    pub role: Role,
}

pub const DEFAULT_AUDIT_LIMIT: i64 = 50;

#[derive(Debug, Deserialize, Validate)]
pub struct AuditQuery {
    #[validate(range(min = 1, max = 200, message = "Limit must be between 1 and 200"))]
    pub limit: Option<i64>,
}

impl AuditQuery {
    pub fn limit(&self) -> i64 {
        self.limit.unwrap_or(DEFAULT_AUDIT_LIMIT)
    }
}
