//! Tenant (company) model and the tenant id space.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

use crate::services::ServiceError;

/// Reserved tenant id used for platform-level audit entries.
pub const GLOBAL_TENANT: &str = "global";

/// Identifier of the isolation boundary every protected row belongs to.
///
/// Ids minted by [`TenantId::generate`] are UUID strings and can never equal
/// [`GLOBAL_TENANT`]; [`TenantId::for_provisioning`] refuses it outright.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[serde(transparent)]
#[sqlx(transparent)]
pub struct TenantId(String);

impl TenantId {
    pub fn generate() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    pub fn global() -> Self {
        Self(GLOBAL_TENANT.to_string())
    }

    /// Validates a caller-chosen id for a tenant about to be created.
    pub fn for_provisioning(raw: impl Into<String>) -> Result<Self, ServiceError> {
        let raw = raw.into();
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            return Err(ServiceError::Validation("Tenant id must not be empty".into()));
        }
        if trimmed.eq_ignore_ascii_case(GLOBAL_TENANT) {
            return Err(ServiceError::ReservedTenant);
        }
        Ok(Self(trimmed.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<String> for TenantId {
    fn from(raw: String) -> Self {
        Self(raw)
    }
}

impl std::fmt::Display for TenantId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum Region {
    #[serde(rename = "EU")]
    Eu,
    #[serde(rename = "UK")]
    Uk,
    #[default]
    #[serde(rename = "US")]
    Us,
}

impl Region {
    pub fn as_str(&self) -> &'static str {
        match self {
            Region::Eu => "EU",
            Region::Uk => "UK",
            Region::Us => "US",
        }
    }
}

#[derive(Debug, Clone, Serialize, FromRow)]
pub struct Tenant {
    pub id: TenantId,
    pub name: String,
    pub region: String,
    pub created_at: DateTime<Utc>,
}

impl Tenant {
    pub fn new(name: String, region: Region, now: DateTime<Utc>) -> Self {
        Self {
            id: TenantId::generate(),
            name,
            region: region.as_str().to_string(),
            created_at: now,
        }
    }

    /// Name of the workspace provisioned on a user's first login.
    pub fn workspace_name(display_name: Option<&str>, email: &str) -> String {
        let owner = display_name
            .map(str::trim)
            .filter(|n| !n.is_empty())
            .unwrap_or_else(|| email.split('@').next().unwrap_or(email));
        format!("{}'s Workspace", owner)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generated_ids_never_global() {
        for _ in 0..100 {
            assert_ne!(TenantId::generate(), TenantId::global());
        }
    }

    #[test]
    fn test_provisioning_rejects_reserved() {
        assert!(matches!(
            TenantId::for_provisioning("global"),
            Err(ServiceError::ReservedTenant)
        ));
        assert!(matches!(
            TenantId::for_provisioning(" GLOBAL "),
            Err(ServiceError::ReservedTenant)
        ));
        assert!(matches!(
            TenantId::for_provisioning("  "),
            Err(ServiceError::Validation(_))
        ));
        assert_eq!(TenantId::for_provisioning("acme").unwrap().as_str(), "acme");
    }

    #[test]
    fn test_workspace_name() {
        assert_eq!(Tenant::workspace_name(Some("Ada"), "a@x.com"), "Ada's Workspace");
        assert_eq!(Tenant::workspace_name(None, "a@x.com"), "a's Workspace");
        assert_eq!(Tenant::workspace_name(Some("  "), "bob@x.com"), "bob's Workspace");
    }
}
