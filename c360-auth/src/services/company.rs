//! Company-scoped administration: membership management and the audit log.
//!
//! Every entry point authorizes the path company id against the caller's
//! token before touching the store.

use serde_json::json;
use std::sync::Arc;
use uuid::Uuid;

use crate::{
    authz::{authorize, check_member_removal, check_role_change, ensure_tenant, AuthContext, Operation},
    models::{AuditEntry, Member, Membership, Role, TenantId},
    services::{clock::Clock, store::AuthStore, ServiceError},
};

#[derive(Clone)]
pub struct CompanyService {
    store: Arc<dyn AuthStore>,
    clock: Arc<dyn Clock>,
}

impl CompanyService {
    pub fn new(store: Arc<dyn AuthStore>, clock: Arc<dyn Clock>) -> Self {
        Self { store, clock }
    }

    pub async fn list_members(
        &self,
        ctx: &AuthContext,
        company_id: &TenantId,
    ) -> Result<Vec<Member>, ServiceError> {
        authorize(ctx, Operation::ListMembers, company_id)?;
        self.store.list_members(company_id).await
    }

    pub async fn add_member(
        &self,
        ctx: &AuthContext,
        company_id: &TenantId,
        email: &str,
        role: Role,
    ) -> Result<Member, ServiceError> {
        authorize(ctx, Operation::AddMember, company_id)?;
        if role == Role::Owner && ctx.role != Role::Owner {
            return Err(ServiceError::Forbidden(
                "Only an owner can grant or revoke the owner role".to_string(),
            ));
        }

        let user = self
            .store
            .find_user_by_email(email.trim())
            .await?
            .ok_or(ServiceError::UserNotFound)?;

        let now = self.clock.now();
        let membership = Membership::new(company_id.clone(), user.id, role, now);
        let audit = AuditEntry::new(company_id.clone(), ctx.user_id, "member.add", now)
            .with_target(user.id.to_string())
            .with_meta(json!({ "role": role }));
        self.store.insert_membership(&membership, &audit).await?;

        tracing::info!(tenant_id = %company_id, user_id = %user.id, %role, "Member added");

        Ok(Member {
            user_id: user.id,
            email: user.email,
            name: user.display_name,
            role,
            joined_at: now,
        })
    }

    pub async fn change_role(
        &self,
        ctx: &AuthContext,
        company_id: &TenantId,
        user_id: Uuid,
        role: Role,
    ) -> Result<Member, ServiceError> {
        authorize(ctx, Operation::ChangeMemberRole, company_id)?;

        // Early answer only. The store re-checks the owner count under lock.
        let target = self.find_member(company_id, user_id).await?;
        let owners = self.store.count_owners(company_id).await?;
        check_role_change(ctx, &target, role, owners)?;

        let audit =
            AuditEntry::new(company_id.clone(), ctx.user_id, "member.role_change", self.clock.now())
                .with_target(user_id.to_string())
                .with_meta(json!({ "from": target.role, "to": role }));
        if !self
            .store
            .update_membership_role(company_id, user_id, role, &audit)
            .await?
        {
            return Err(ServiceError::MemberNotFound);
        }

        tracing::info!(tenant_id = %company_id, %user_id, from = %target.role, to = %role, "Member role changed");

        Ok(Member { role, ..target })
    }

    pub async fn remove_member(
        &self,
        ctx: &AuthContext,
        company_id: &TenantId,
        user_id: Uuid,
    ) -> Result<(), ServiceError> {
        authorize(ctx, Operation::RemoveMember, company_id)?;

        let target = self.find_member(company_id, user_id).await?;
        let owners = self.store.count_owners(company_id).await?;
        check_member_removal(ctx, &target, owners)?;

        let audit =
            AuditEntry::new(company_id.clone(), ctx.user_id, "member.remove", self.clock.now())
                .with_target(user_id.to_string())
                .with_meta(json!({ "role": target.role }));
        if !self
            .store
            .delete_membership(company_id, user_id, &audit)
            .await?
        {
            return Err(ServiceError::MemberNotFound);
        }

        tracing::info!(tenant_id = %company_id, %user_id, "Member removed");
        Ok(())
    }

    /// Newest first.
    pub async fn audit_log(
        &self,
        ctx: &AuthContext,
        company_id: &TenantId,
        limit: i64,
    ) -> Result<Vec<AuditEntry>, ServiceError> {
        authorize(ctx, Operation::ViewAuditLog, company_id)?;

        self.store
            .list_audit_entries(company_id, limit)
            .await?
            .into_iter()
            .map(|entry| ensure_tenant(&ctx.tenant_id, entry))
            .collect()
    }

    async fn find_member(&self, company_id: &TenantId, user_id: Uuid) -> Result<Member, ServiceError> {
        self.store
            .list_members(company_id)
            .await?
            .into_iter()
            .find(|m| m.user_id == user_id)
            .ok_or(ServiceError::MemberNotFound)
    }
}
