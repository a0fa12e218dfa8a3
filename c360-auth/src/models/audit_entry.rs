use chrono::{DateTime, Utc};
use serde::Serialize;
use sqlx::FromRow;
use uuid::Uuid;

use super::TenantId;

/// Append-only record of a security-relevant action.
///
/// Platform-level actions that belong to no tenant use [`TenantId::global`].
#[derive(Debug, Clone, Serialize, FromRow)]
pub struct AuditEntry {
    pub id: Uuid,
    pub tenant_id: TenantId,
    pub actor: Uuid,
    pub action: String,
    pub target: Option<String>,
    pub at: DateTime<Utc>,
    pub meta: serde_json::Value,
}

impl AuditEntry {
    pub fn new(tenant_id: TenantId, actor: Uuid, action: &str, now: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::new_v4(),
            tenant_id,
            actor,
            action: action.to_string(),
            target: None,
            at: now,
            meta: serde_json::Value::Object(Default::default()),
        }
    }

    pub fn with_target(mut self, target: impl Into<String>) -> Self {
        self.target = Some(target.into());
        self
    }

    pub fn with_meta(mut self, meta: serde_json::Value) -> Self {
        self.meta = meta;
        self
    }
}
