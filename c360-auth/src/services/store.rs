//! Persistence seam for users, tenants, memberships and credentials.
//!
//! Tenant ids are always passed as bound values. No implementation may build
//! query text from a tenant id.
//!
//! Mutations that take an [`AuditEntry`] record it in the same unit of work:
//! either the change and its audit row are both stored or neither is.

use async_trait::async_trait;
use uuid::Uuid;

use super::ServiceError;
use crate::models::{
    AuditEntry, Member, Membership, PasswordResetToken, RefreshToken, Role, Tenant, TenantId, User,
};

#[async_trait]
pub trait AuthStore: Send + Sync {
    async fn health_check(&self) -> Result<(), ServiceError>;

    // ==================== Users ====================

    async fn find_user_by_id(&self, user_id: Uuid) -> Result<Option<User>, ServiceError>;
    async fn find_user_by_email(&self, email: &str) -> Result<Option<User>, ServiceError>;
    async fn update_display_name(
        &self,
        user_id: Uuid,
        display_name: Option<&str>,
    ) -> Result<(), ServiceError>;

    /// Sets a new password hash and revokes every refresh token the user
    /// holds. Returns the number of tokens revoked.
    async fn replace_password(
        &self,
        user_id: Uuid,
        hash: &str,
        audit: &AuditEntry,
    ) -> Result<u64, ServiceError>;

    /// Creates the user, their first tenant and the owner membership as one
    /// unit. Fails with `EmailAlreadyRegistered` when the email is taken.
    async fn create_account(
        &self,
        user: &User,
        tenant: &Tenant,
        owner: &Membership,
        audit: &AuditEntry,
    ) -> Result<(), ServiceError>;

    /// Creates a tenant owned by an existing user.
    async fn create_tenant(
        &self,
        tenant: &Tenant,
        owner: &Membership,
        audit: &AuditEntry,
    ) -> Result<(), ServiceError>;

    // ==================== Memberships ====================

    async fn find_membership(
        &self,
        tenant_id: &TenantId,
        user_id: Uuid,
    ) -> Result<Option<Membership>, ServiceError>;

    /// Oldest first.
    async fn list_memberships_for_user(
        &self,
        user_id: Uuid,
    ) -> Result<Vec<Membership>, ServiceError>;

    async fn list_members(&self, tenant_id: &TenantId) -> Result<Vec<Member>, ServiceError>;

    /// Fails with `MembershipExists` on a duplicate `(tenant_id, user_id)`.
    async fn insert_membership(
        &self,
        membership: &Membership,
        audit: &AuditEntry,
    ) -> Result<(), ServiceError>;

    /// Returns false when no such membership exists. Fails with `LastOwner`
    /// when the change would leave the tenant without an owner; the owner
    /// count is checked and the row changed under one lock.
    async fn update_membership_role(
        &self,
        tenant_id: &TenantId,
        user_id: Uuid,
        role: Role,
        audit: &AuditEntry,
    ) -> Result<bool, ServiceError>;

    /// Returns false when no such membership exists. Fails with `LastOwner`
    /// when removing the tenant's only owner.
    async fn delete_membership(
        &self,
        tenant_id: &TenantId,
        user_id: Uuid,
        audit: &AuditEntry,
    ) -> Result<bool, ServiceError>;

    async fn count_owners(&self, tenant_id: &TenantId) -> Result<i64, ServiceError>;

    // ==================== Refresh Tokens ====================

    async fn insert_refresh_token(&self, token: &RefreshToken) -> Result<(), ServiceError>;
    async fn find_refresh_token_by_hash(
        &self,
        token_hash: &str,
    ) -> Result<Option<RefreshToken>, ServiceError>;

    /// Revokes one record. Returns true only if this call flipped it.
    async fn revoke_refresh_token(&self, id: Uuid) -> Result<bool, ServiceError>;
    async fn revoke_refresh_token_by_hash(&self, token_hash: &str) -> Result<(), ServiceError>;
    async fn revoke_all_refresh_tokens_for_user(&self, user_id: Uuid) -> Result<u64, ServiceError>;

    // ==================== Password Reset Tokens ====================

    async fn insert_password_reset_token(
        &self,
        token: &PasswordResetToken,
    ) -> Result<(), ServiceError>;
    async fn find_password_reset_token_by_hash(
        &self,
        token_hash: &str,
    ) -> Result<Option<PasswordResetToken>, ServiceError>;

    /// Marks the token used, sets the new password hash and revokes every
    /// refresh token of `user_id`. Returns false, changing nothing, if the
    /// token was already used.
    async fn complete_password_reset(
        &self,
        token_id: Uuid,
        user_id: Uuid,
        hash: &str,
        audit: &AuditEntry,
    ) -> Result<bool, ServiceError>;

    // ==================== Audit Log ====================

    /// Newest first.
    async fn list_audit_entries(
        &self,
        tenant_id: &TenantId,
        limit: i64,
    ) -> Result<Vec<AuditEntry>, ServiceError>;
}

/// True when moving `user_id` out of the owner set, by a demotion to
/// `new_role` or by removal when `new_role` is `None`, would leave `owners`
/// empty. `owners` is the tenant's current owner ids, read under the same
/// lock as the write that follows.
pub(crate) fn strands_tenant(owners: &[Uuid], user_id: Uuid, new_role: Option<Role>) -> bool {
    new_role != Some(Role::Owner) && owners.len() == 1 && owners.contains(&user_id)
}

/// Refuses to persist a tenant under the reserved global id.
pub(crate) fn ensure_provisionable(tenant: &Tenant) -> Result<(), ServiceError> {
    TenantId::for_provisioning(tenant.id.as_str()).map(|_| ())
}
