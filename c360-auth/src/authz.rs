//! Tenant isolation and role checks.
//!
//! Every read or write of a tenant-scoped row passes through
//! [`check_tenant_access`]. Role checks are set membership: each
//! [`Operation`] lists exactly the roles it allows.

use uuid::Uuid;

use crate::models::{AuditEntry, Member, Membership, Role, TenantId};
use crate::services::ServiceError;

/// Authenticated caller, as established from a verified access token.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthContext {
    pub user_id: Uuid,
    pub tenant_id: TenantId,
    pub role: Role,
}

/// Kinds of tenant-owned data. Used to name the resource in denials.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResourceKind {
    Company,
    Control,
    ControlStatus,
    Evidence,
    Task,
    Risk,
    Membership,
    AuditEntry,
}

impl ResourceKind {
    pub const ALL: [ResourceKind; 8] = [
        ResourceKind::Company,
        ResourceKind::Control,
        ResourceKind::ControlStatus,
        ResourceKind::Evidence,
        ResourceKind::Task,
        ResourceKind::Risk,
        ResourceKind::Membership,
        ResourceKind::AuditEntry,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ResourceKind::Company => "company",
            ResourceKind::Control => "control",
            ResourceKind::ControlStatus => "control status",
            ResourceKind::Evidence => "evidence",
            ResourceKind::Task => "task",
            ResourceKind::Risk => "risk",
            ResourceKind::Membership => "membership",
            ResourceKind::AuditEntry => "audit entry",
        }
    }
}

/// A row that belongs to exactly one tenant.
pub trait TenantScoped {
    const KIND: ResourceKind;

    fn tenant_id(&self) -> &TenantId;
}

impl TenantScoped for Membership {
    const KIND: ResourceKind = ResourceKind::Membership;

    fn tenant_id(&self) -> &TenantId {
        &self.tenant_id
    }
}

impl TenantScoped for AuditEntry {
    const KIND: ResourceKind = ResourceKind::AuditEntry;

    fn tenant_id(&self) -> &TenantId {
        &self.tenant_id
    }
}

/// Grants access iff the caller's tenant equals the resource's tenant.
pub fn check_tenant_access(
    caller: &TenantId,
    resource: &TenantId,
    kind: ResourceKind,
) -> Result<(), ServiceError> {
    if caller == resource {
        Ok(())
    } else {
        tracing::warn!(
            caller_tenant = %caller,
            resource = kind.as_str(),
            "Cross-tenant access denied"
        );
        Err(ServiceError::Forbidden(format!(
            "Access to this {} is not allowed",
            kind.as_str()
        )))
    }
}

/// Passes a fetched row through only if it belongs to the caller's tenant.
pub fn ensure_tenant<T: TenantScoped>(caller: &TenantId, row: T) -> Result<T, ServiceError> {
    check_tenant_access(caller, row.tenant_id(), T::KIND)?;
    Ok(row)
}

/// Grants access iff `role` is listed in `allowed`.
pub fn check_role(role: Role, allowed: &[Role]) -> Result<(), ServiceError> {
    if allowed.contains(&role) {
        Ok(())
    } else {
        Err(ServiceError::Forbidden(format!(
            "Role '{}' is not allowed to perform this operation",
            role
        )))
    }
}

/// Operations on tenant data and the roles allowed to perform them.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operation {
    ViewControls,
    UpdateControlStatus,
    ViewEvidence,
    UploadEvidence,
    ViewTasks,
    ManageTasks,
    ViewRisks,
    ManageRisks,
    ViewAuditLog,
    ListMembers,
    AddMember,
    ChangeMemberRole,
    RemoveMember,
    ManageCompany,
}

const ALL_ROLES: &[Role] = &[Role::Owner, Role::Admin, Role::Contributor, Role::Auditor];
const EDITORS: &[Role] = &[Role::Owner, Role::Admin, Role::Contributor];
const ADMINS: &[Role] = &[Role::Owner, Role::Admin];

impl Operation {
    pub const ALL: [Operation; 14] = [
        Operation::ViewControls,
        Operation::UpdateControlStatus,
        Operation::ViewEvidence,
        Operation::UploadEvidence,
        Operation::ViewTasks,
        Operation::ManageTasks,
        Operation::ViewRisks,
        Operation::ManageRisks,
        Operation::ViewAuditLog,
        Operation::ListMembers,
        Operation::AddMember,
        Operation::ChangeMemberRole,
        Operation::RemoveMember,
        Operation::ManageCompany,
    ];

    pub fn allowed_roles(&self) -> &'static [Role] {
        match self {
            Operation::ViewControls
            | Operation::ViewEvidence
            | Operation::ViewTasks
            | Operation::ViewRisks => ALL_ROLES,
            Operation::UpdateControlStatus
            | Operation::UploadEvidence
            | Operation::ManageTasks
            | Operation::ManageRisks => EDITORS,
            Operation::ViewAuditLog => &[Role::Owner, Role::Admin, Role::Auditor],
            Operation::ListMembers
            | Operation::AddMember
            | Operation::ChangeMemberRole
            | Operation::RemoveMember => ADMINS,
            Operation::ManageCompany => &[Role::Owner],
        }
    }

    pub fn resource(&self) -> ResourceKind {
        match self {
            Operation::ViewControls => ResourceKind::Control,
            Operation::UpdateControlStatus => ResourceKind::ControlStatus,
            Operation::ViewEvidence | Operation::UploadEvidence => ResourceKind::Evidence,
            Operation::ViewTasks | Operation::ManageTasks => ResourceKind::Task,
            Operation::ViewRisks | Operation::ManageRisks => ResourceKind::Risk,
            Operation::ViewAuditLog => ResourceKind::AuditEntry,
            Operation::ListMembers
            | Operation::AddMember
            | Operation::ChangeMemberRole
            | Operation::RemoveMember => ResourceKind::Membership,
            Operation::ManageCompany => ResourceKind::Company,
        }
    }
}

/// Role guard, then tenant guard, for an operation on `resource_tenant`.
pub fn authorize(
    ctx: &AuthContext,
    operation: Operation,
    resource_tenant: &TenantId,
) -> Result<(), ServiceError> {
    check_role(ctx.role, operation.allowed_roles())?;
    check_tenant_access(&ctx.tenant_id, resource_tenant, operation.resource())
}

/// Rules for removing a member, beyond the role set of `RemoveMember`.
pub fn check_member_removal(
    ctx: &AuthContext,
    target: &Member,
    owner_count: i64,
) -> Result<(), ServiceError> {
    if target.user_id == ctx.user_id {
        return Err(ServiceError::Forbidden(
            "You cannot remove yourself from a company".to_string(),
        ));
    }
    if target.role == Role::Owner {
        if ctx.role != Role::Owner {
            return Err(ServiceError::Forbidden(
                "Only an owner can remove another owner".to_string(),
            ));
        }
        if owner_count <= 1 {
            return Err(ServiceError::LastOwner);
        }
    }
    Ok(())
}

/// Rules for changing a member's role, beyond the role set of `ChangeMemberRole`.
pub fn check_role_change(
    ctx: &AuthContext,
    target: &Member,
    new_role: Role,
    owner_count: i64,
) -> Result<(), ServiceError> {
    let touches_owner = target.role == Role::Owner || new_role == Role::Owner;
    if touches_owner && ctx.role != Role::Owner {
        return Err(ServiceError::Forbidden(
            "Only an owner can grant or revoke the owner role".to_string(),
        ));
    }
    if target.role == Role::Owner && new_role != Role::Owner && owner_count <= 1 {
        return Err(ServiceError::LastOwner);
    }
    Ok(())
}
