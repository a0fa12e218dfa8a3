pub mod audit_entry;
pub mod membership;
pub mod password_reset_token;
pub mod refresh_token;
pub mod role;
pub mod tenant;
pub mod user;

pub use audit_entry::AuditEntry;
pub use membership::{Member, Membership};
pub use password_reset_token::PasswordResetToken;
pub use refresh_token::RefreshToken;
pub use role::Role;
pub use tenant::{Region, Tenant, TenantId, GLOBAL_TENANT};
pub use user::{SanitizedUser, User};
