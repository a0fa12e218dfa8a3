use chrono::{DateTime, Utc};
use serde::Serialize;
use uuid::Uuid;

use super::{Role, TenantId};

/// Binding of a user to a tenant. `(tenant_id, user_id)` is unique.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Membership {
    pub tenant_id: TenantId,
    pub user_id: Uuid,
    pub role: Role,
    pub created_at: DateTime<Utc>,
}

impl Membership {
    pub fn new(tenant_id: TenantId, user_id: Uuid, role: Role, now: DateTime<Utc>) -> Self {
        Self {
            tenant_id,
            user_id,
            role,
            created_at: now,
        }
    }
}

/// Membership joined with the member's profile, as listed to admins.
#[derive(Debug, Clone, Serialize)]
pub struct Member {
    pub user_id: Uuid,
    pub email: String,
    pub name: Option<String>,
    pub role: Role,
    pub joined_at: DateTime<Utc>,
}
