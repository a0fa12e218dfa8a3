//! In-process [`AuthStore`] for tests and local runs.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};
use uuid::Uuid;

use super::store::{ensure_provisionable, strands_tenant, AuthStore};
use super::ServiceError;
use crate::models::{
    AuditEntry, Member, Membership, PasswordResetToken, RefreshToken, Role, Tenant, TenantId, User,
};

#[derive(Default)]
struct Tables {
    users: HashMap<Uuid, User>,
    tenants: HashMap<TenantId, Tenant>,
    memberships: Vec<Membership>,
    refresh_tokens: HashMap<Uuid, RefreshToken>,
    reset_tokens: HashMap<Uuid, PasswordResetToken>,
    audit: Vec<AuditEntry>,
}

impl Tables {
    fn email_taken(&self, email: &str) -> bool {
        self.users.values().any(|u| u.email == email)
    }

    fn has_membership(&self, tenant_id: &TenantId, user_id: Uuid) -> bool {
        self.memberships
            .iter()
            .any(|m| &m.tenant_id == tenant_id && m.user_id == user_id)
    }

    fn owners(&self, tenant_id: &TenantId) -> Vec<Uuid> {
        self.memberships
            .iter()
            .filter(|m| &m.tenant_id == tenant_id && m.role == Role::Owner)
            .map(|m| m.user_id)
            .collect()
    }

    fn revoke_all(&mut self, user_id: Uuid) -> u64 {
        let mut revoked = 0;
        for record in self
            .refresh_tokens
            .values_mut()
            .filter(|r| r.user_id == user_id && !r.revoked)
        {
            record.revoked = true;
            revoked += 1;
        }
        revoked
    }
}

#[derive(Default)]
pub struct InMemoryStore {
    tables: Mutex<Tables>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> Result<MutexGuard<'_, Tables>, ServiceError> {
        self.tables
            .lock()
            .map_err(|_| ServiceError::Database(anyhow::anyhow!("in-memory store poisoned")))
    }

    /// Test helper: every refresh token record held for a user.
    pub fn refresh_tokens_for(&self, user_id: Uuid) -> Vec<RefreshToken> {
        self.lock()
            .map(|t| {
                t.refresh_tokens
                    .values()
                    .filter(|r| r.user_id == user_id)
                    .cloned()
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Test helper: the tenant record, if any.
    pub fn tenant(&self, tenant_id: &TenantId) -> Option<Tenant> {
        self.lock().ok()?.tenants.get(tenant_id).cloned()
    }

    /// Test helper: every audit entry, in insertion order.
    pub fn audit_trail(&self) -> Vec<AuditEntry> {
        self.lock().map(|t| t.audit.clone()).unwrap_or_default()
    }
}

#[async_trait]
impl AuthStore for InMemoryStore {
    async fn health_check(&self) -> Result<(), ServiceError> {
        self.lock().map(|_| ())
    }

    async fn find_user_by_id(&self, user_id: Uuid) -> Result<Option<User>, ServiceError> {
        Ok(self.lock()?.users.get(&user_id).cloned())
    }

    async fn find_user_by_email(&self, email: &str) -> Result<Option<User>, ServiceError> {
        Ok(self
            .lock()?
            .users
            .values()
            .find(|u| u.email == email)
            .cloned())
    }

    async fn update_display_name(
        &self,
        user_id: Uuid,
        display_name: Option<&str>,
    ) -> Result<(), ServiceError> {
        let mut tables = self.lock()?;
        let user = tables
            .users
            .get_mut(&user_id)
            .ok_or(ServiceError::UserNotFound)?;
        user.display_name = display_name.map(str::to_string);
        Ok(())
    }

    async fn replace_password(
        &self,
        user_id: Uuid,
        hash: &str,
        audit: &AuditEntry,
    ) -> Result<u64, ServiceError> {
        let mut tables = self.lock()?;
        let user = tables
            .users
            .get_mut(&user_id)
            .ok_or(ServiceError::UserNotFound)?;
        user.password_hash = Some(hash.to_string());
        let revoked = tables.revoke_all(user_id);
        tables.audit.push(audit.clone());
        Ok(revoked)
    }

    async fn create_account(
        &self,
        user: &User,
        tenant: &Tenant,
        owner: &Membership,
        audit: &AuditEntry,
    ) -> Result<(), ServiceError> {
        ensure_provisionable(tenant)?;
        let mut tables = self.lock()?;
        if tables.email_taken(&user.email) {
            return Err(ServiceError::EmailAlreadyRegistered);
        }
        tables.users.insert(user.id, user.clone());
        tables.tenants.insert(tenant.id.clone(), tenant.clone());
        tables.memberships.push(owner.clone());
        tables.audit.push(audit.clone());
        Ok(())
    }

    async fn create_tenant(
        &self,
        tenant: &Tenant,
        owner: &Membership,
        audit: &AuditEntry,
    ) -> Result<(), ServiceError> {
        ensure_provisionable(tenant)?;
        let mut tables = self.lock()?;
        tables.tenants.insert(tenant.id.clone(), tenant.clone());
        tables.memberships.push(owner.clone());
        tables.audit.push(audit.clone());
        Ok(())
    }

    async fn find_membership(
        &self,
        tenant_id: &TenantId,
        user_id: Uuid,
    ) -> Result<Option<Membership>, ServiceError> {
        Ok(self
            .lock()?
            .memberships
            .iter()
            .find(|m| &m.tenant_id == tenant_id && m.user_id == user_id)
            .cloned())
    }

    async fn list_memberships_for_user(
        &self,
        user_id: Uuid,
    ) -> Result<Vec<Membership>, ServiceError> {
        let mut found: Vec<Membership> = self
            .lock()?
            .memberships
            .iter()
            .filter(|m| m.user_id == user_id)
            .cloned()
            .collect();
        found.sort_by_key(|m| m.created_at);
        Ok(found)
    }

    async fn list_members(&self, tenant_id: &TenantId) -> Result<Vec<Member>, ServiceError> {
        let tables = self.lock()?;
        let mut members: Vec<Member> = tables
            .memberships
            .iter()
            .filter(|m| &m.tenant_id == tenant_id)
            .filter_map(|m| {
                tables.users.get(&m.user_id).map(|u| Member {
                    user_id: u.id,
                    email: u.email.clone(),
                    name: u.display_name.clone(),
                    role: m.role,
                    joined_at: m.created_at,
                })
            })
            .collect();
        members.sort_by_key(|m| m.joined_at);
        Ok(members)
    }

    async fn insert_membership(
        &self,
        membership: &Membership,
        audit: &AuditEntry,
    ) -> Result<(), ServiceError> {
        let mut tables = self.lock()?;
        if tables.has_membership(&membership.tenant_id, membership.user_id) {
            return Err(ServiceError::MembershipExists);
        }
        tables.memberships.push(membership.clone());
        tables.audit.push(audit.clone());
        Ok(())
    }

    async fn update_membership_role(
        &self,
        tenant_id: &TenantId,
        user_id: Uuid,
        role: Role,
        audit: &AuditEntry,
    ) -> Result<bool, ServiceError> {
        let mut tables = self.lock()?;
        if !tables.has_membership(tenant_id, user_id) {
            return Ok(false);
        }
        if strands_tenant(&tables.owners(tenant_id), user_id, Some(role)) {
            return Err(ServiceError::LastOwner);
        }
        for m in tables
            .memberships
            .iter_mut()
            .filter(|m| &m.tenant_id == tenant_id && m.user_id == user_id)
        {
            m.role = role;
        }
        tables.audit.push(audit.clone());
        Ok(true)
    }

    async fn delete_membership(
        &self,
        tenant_id: &TenantId,
        user_id: Uuid,
        audit: &AuditEntry,
    ) -> Result<bool, ServiceError> {
        let mut tables = self.lock()?;
        if !tables.has_membership(tenant_id, user_id) {
            return Ok(false);
        }
        if strands_tenant(&tables.owners(tenant_id), user_id, None) {
            return Err(ServiceError::LastOwner);
        }
        tables
            .memberships
            .retain(|m| !(&m.tenant_id == tenant_id && m.user_id == user_id));
        tables.audit.push(audit.clone());
        Ok(true)
    }

    async fn count_owners(&self, tenant_id: &TenantId) -> Result<i64, ServiceError> {
        Ok(self
            .lock()?
            .memberships
            .iter()
            .filter(|m| &m.tenant_id == tenant_id && m.role == Role::Owner)
            .count() as i64)
    }

    async fn insert_refresh_token(&self, token: &RefreshToken) -> Result<(), ServiceError> {
        self.lock()?.refresh_tokens.insert(token.id, token.clone());
        Ok(())
    }

    async fn find_refresh_token_by_hash(
        &self,
        token_hash: &str,
    ) -> Result<Option<RefreshToken>, ServiceError> {
        Ok(self
            .lock()?
            .refresh_tokens
            .values()
            .find(|r| r.token_hash == token_hash)
            .cloned())
    }

    async fn revoke_refresh_token(&self, id: Uuid) -> Result<bool, ServiceError> {
        let mut tables = self.lock()?;
        match tables.refresh_tokens.get_mut(&id) {
            Some(r) if !r.revoked => {
                r.revoked = true;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn revoke_refresh_token_by_hash(&self, token_hash: &str) -> Result<(), ServiceError> {
        let mut tables = self.lock()?;
        for record in tables
            .refresh_tokens
            .values_mut()
            .filter(|r| r.token_hash == token_hash)
        {
            record.revoked = true;
        }
        Ok(())
    }

    async fn revoke_all_refresh_tokens_for_user(&self, user_id: Uuid) -> Result<u64, ServiceError> {
        Ok(self.lock()?.revoke_all(user_id))
    }

    async fn insert_password_reset_token(
        &self,
        token: &PasswordResetToken,
    ) -> Result<(), ServiceError> {
        self.lock()?.reset_tokens.insert(token.id, token.clone());
        Ok(())
    }

    async fn find_password_reset_token_by_hash(
        &self,
        token_hash: &str,
    ) -> Result<Option<PasswordResetToken>, ServiceError> {
        Ok(self
            .lock()?
            .reset_tokens
            .values()
            .find(|t| t.token_hash == token_hash)
            .cloned())
    }

    async fn complete_password_reset(
        &self,
        token_id: Uuid,
        user_id: Uuid,
        hash: &str,
        audit: &AuditEntry,
    ) -> Result<bool, ServiceError> {
        let mut tables = self.lock()?;
        if !tables.reset_tokens.get(&token_id).is_some_and(|t| !t.used) {
            return Ok(false);
        }
        let user = tables
            .users
            .get_mut(&user_id)
            .ok_or(ServiceError::UserNotFound)?;
        user.password_hash = Some(hash.to_string());
        if let Some(token) = tables.reset_tokens.get_mut(&token_id) {
            token.used = true;
        }
        tables.revoke_all(user_id);
        tables.audit.push(audit.clone());
        Ok(true)
    }

    async fn list_audit_entries(
        &self,
        tenant_id: &TenantId,
        limit: i64,
    ) -> Result<Vec<AuditEntry>, ServiceError> {
        let tables = self.lock()?;
        let mut entries: Vec<AuditEntry> = tables
            .audit
            .iter()
            .rev()
            .filter(|e| &e.tenant_id == tenant_id)
            .cloned()
            .collect();
        entries.sort_by(|a, b| b.at.cmp(&a.at));
        entries.truncate(limit.max(0) as usize);
        Ok(entries)
    }
}
