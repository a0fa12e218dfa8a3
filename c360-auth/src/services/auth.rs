use serde_json::json;
use std::sync::Arc;
use uuid::Uuid;

use crate::{
    authz::AuthContext,
    dtos::auth::{
        LoginRequest, MagicLinkResponse, PasswordResetConfirm, RefreshRequest, RegisterRequest,
        TokenResponse,
    },
    models::{
        AuditEntry, Membership, PasswordResetToken, Region, Role, SanitizedUser, Tenant, TenantId,
        User,
    },
    services::{
        cache::KeyValueCache, store::AuthStore, tokens::TokenService, EmailProvider, ServiceError,
    },
    utils::{generate_random_token, hash_password, verify_password, Password, PasswordHashString},
};

pub const MAGIC_LINK_TTL_SECONDS: u64 = 15 * 60;
pub const PASSWORD_RESET_REQUESTED: &str = "If the email is registered, a reset link has been sent";
pub const MAGIC_LINK_REQUESTED: &str = "If the email is valid, a sign-in link has been sent";

/// Well-formed hash of no real password. Unknown users are checked against it
/// so a miss costs the same key derivation as a wrong password.
const DUMMY_PASSWORD_HASH: &str =
    "AAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAA";

fn magic_link_key(token: &str) -> String {
    format!("magic:{}", token)
}

/// Surrounding whitespace is dropped. Case is kept: addresses are stored and
/// matched exactly as given.
fn clean_email(email: &str) -> String {
    email.trim().to_string()
}

/// Runs the key derivation on the blocking pool.
async fn hash_blocking(password: String) -> Result<String, ServiceError> {
    let hash = tokio::task::spawn_blocking(move || hash_password(&Password::new(password)))
        .await
        .map_err(|e| ServiceError::Internal(anyhow::anyhow!("Hashing task failed: {}", e)))?
        .map_err(|e| ServiceError::Internal(anyhow::anyhow!("Password hashing error: {}", e)))?;
    Ok(hash.into_string())
}

async fn verify_blocking(password: String, hash: String) -> Result<bool, ServiceError> {
    tokio::task::spawn_blocking(move || {
        verify_password(&Password::new(password), &PasswordHashString::new(hash))
    })
    .await
    .map_err(|e| ServiceError::Internal(anyhow::anyhow!("Verification task failed: {}", e)))
}

#[derive(Clone)]
pub struct AuthService {
    store: Arc<dyn AuthStore>,
    tokens: Arc<TokenService>,
    cache: Arc<dyn KeyValueCache>,
    email: Arc<dyn EmailProvider>,
    public_base_url: String,
    expose_magic_links: bool,
}

impl AuthService {
    pub fn new(
        store: Arc<dyn AuthStore>,
        tokens: Arc<TokenService>,
        cache: Arc<dyn KeyValueCache>,
        email: Arc<dyn EmailProvider>,
        public_base_url: String,
        expose_magic_links: bool,
    ) -> Self {
        Self {
            store,
            tokens,
            cache,
            email,
            public_base_url: public_base_url.trim_end_matches('/').to_string(),
            expose_magic_links,
        }
    }

    // ==================== Registration & Login ====================

    pub async fn register(&self, req: RegisterRequest) -> Result<TokenResponse, ServiceError> {
        let email = clean_email(&req.email);
        let name = req
            .name
            .map(|n| n.trim().to_string())
            .filter(|n| !n.is_empty());

        let password_hash = hash_blocking(req.password).await?;
        let now = self.tokens.now();

        let user = User::new(email, name, Some(password_hash), now);
        let membership = self.create_account(&user, "password").await?;

        tracing::info!(user_id = %user.id, tenant_id = %membership.tenant_id, "User registered");
        metrics::counter!("auth_registrations_total").increment(1);

        self.issue_session(user.id, &membership).await
    }

    pub async fn login(&self, req: LoginRequest) -> Result<TokenResponse, ServiceError> {
        let email = clean_email(&req.email);
        let user = self.store.find_user_by_email(&email).await?;

        let stored_hash = user
            .as_ref()
            .and_then(|u| u.password_hash.clone())
            .unwrap_or_else(|| DUMMY_PASSWORD_HASH.to_string());
        let verified = verify_blocking(req.password, stored_hash).await?;

        let user = match user {
            Some(user) if verified && user.password_hash.is_some() => user,
            _ => {
                tracing::warn!("Login rejected");
                metrics::counter!("auth_logins_total", "outcome" => "rejected").increment(1);
                return Err(ServiceError::InvalidCredentials);
            }
        };

        let membership = self
            .resolve_membership(&user, req.tenant_id.as_deref(), true)
            .await?;

        tracing::info!(user_id = %user.id, tenant_id = %membership.tenant_id, "User logged in");
        metrics::counter!("auth_logins_total", "outcome" => "success").increment(1);

        self.issue_session(user.id, &membership).await
    }

    // ==================== Session ====================

    /// Issues a new access token. The membership is read again so a role
    /// change or removal takes effect on the next refresh. The rotation
    /// policy runs last, so a rejected refresh leaves the token untouched.
    pub async fn refresh(&self, req: RefreshRequest) -> Result<TokenResponse, ServiceError> {
        let grant = self.tokens.verify_refresh_token(&req.refresh_token).await?;

        let user = self
            .store
            .find_user_by_id(grant.user_id)
            .await?
            .ok_or(ServiceError::InvalidToken)?;

        let membership = self
            .resolve_membership(&user, req.tenant_id.as_deref(), false)
            .await?;

        let access_token = self
            .tokens
            .issue_access_token(user.id, &membership.tenant_id, membership.role)
            .await?;
        let replacement = self.tokens.exchange_refresh_token(&grant).await?;

        Ok(self.token_response(access_token, replacement, &membership))
    }

    pub async fn logout(&self, refresh_token: &str) -> Result<(), ServiceError> {
        self.tokens.revoke_refresh_token(refresh_token).await
    }

    pub async fn logout_all(&self, ctx: &AuthContext) -> Result<u64, ServiceError> {
        self.tokens.revoke_all_refresh_tokens(ctx.user_id).await
    }

    // ==================== Password Reset ====================

    /// Never fails and never reveals whether the email is registered.
    pub async fn request_password_reset(&self, email: &str) {
        let email = clean_email(email);
        match self.send_password_reset(&email).await {
            Ok(true) => tracing::info!("Password reset link issued"),
            Ok(false) => tracing::debug!("Password reset requested for unknown email"),
            Err(e) => tracing::error!(error = %e, "Password reset request failed"),
        }
    }

    async fn send_password_reset(&self, email: &str) -> Result<bool, ServiceError> {
        let Some(user) = self.store.find_user_by_email(email).await? else {
            return Ok(false);
        };

        let raw = generate_random_token();
        let record = PasswordResetToken::new(user.id, &raw, self.tokens.now());
        self.store.insert_password_reset_token(&record).await?;

        let link = format!("{}/reset-password?token={}", self.public_base_url, raw);
        self.email.send_password_reset_email(&user.email, &link).await?;
        Ok(true)
    }

    pub async fn confirm_password_reset(
        &self,
        req: PasswordResetConfirm,
    ) -> Result<(), ServiceError> {
        let now = self.tokens.now();
        let record = self
            .store
            .find_password_reset_token_by_hash(&PasswordResetToken::hash_token(&req.token))
            .await?
            .filter(|r| r.is_usable(now))
            .ok_or(ServiceError::InvalidToken)?;

        // Derive before consuming so a hashing failure leaves the token usable.
        let password_hash = hash_blocking(req.new_password).await?;

        let audit =
            AuditEntry::new(TenantId::global(), record.user_id, "user.password_reset", now)
                .with_target(record.user_id.to_string());
        if !self
            .store
            .complete_password_reset(record.id, record.user_id, &password_hash, &audit)
            .await?
        {
            tracing::warn!(user_id = %record.user_id, "Password reset token already used");
            return Err(ServiceError::InvalidToken);
        }

        tracing::info!(user_id = %record.user_id, "Password reset completed");
        Ok(())
    }

    // ==================== Magic Link ====================

    pub async fn request_magic_link(&self, email: &str) -> Result<MagicLinkResponse, ServiceError> {
        let email = clean_email(email);
        let token = generate_random_token();

        self.cache
            .put(&magic_link_key(&token), &email, MAGIC_LINK_TTL_SECONDS)
            .await?;

        let link = format!(
            "{}/v1/auth/magic-link/verify?token={}",
            self.public_base_url, token
        );
        if let Err(e) = self.email.send_magic_link_email(&email, &link).await {
            tracing::error!(error = %e, "Failed to send magic link");
        }

        Ok(MagicLinkResponse {
            message: MAGIC_LINK_REQUESTED.to_string(),
            link: self.expose_magic_links.then_some(link),
        })
    }

    /// Redeems a magic link. The cache entry is taken atomically, so each
    /// link signs in at most once.
    pub async fn verify_magic_link(&self, token: &str) -> Result<TokenResponse, ServiceError> {
        let email = self
            .cache
            .take(&magic_link_key(token))
            .await?
            .ok_or(ServiceError::InvalidToken)?;

        let user = match self.store.find_user_by_email(&email).await? {
            Some(user) => user,
            None => self.register_passwordless(&email).await?,
        };

        let membership = self.resolve_membership(&user, None, true).await?;

        tracing::info!(user_id = %user.id, "Magic link redeemed");
        metrics::counter!("auth_logins_total", "outcome" => "magic_link").increment(1);

        self.issue_session(user.id, &membership).await
    }

    async fn register_passwordless(&self, email: &str) -> Result<User, ServiceError> {
        let now = self.tokens.now();
        let user = User::new(email.to_string(), None, None, now);

        match self.create_account(&user, "magic_link").await {
            Ok(_) => Ok(user),
            // Lost a race with a concurrent sign-up for the same email.
            Err(ServiceError::EmailAlreadyRegistered) => self
                .store
                .find_user_by_email(email)
                .await?
                .ok_or(ServiceError::UserNotFound),
            Err(e) => Err(e),
        }
    }

    // ==================== Current User ====================

    pub async fn profile(&self, ctx: &AuthContext) -> Result<SanitizedUser, ServiceError> {
        Ok(self.load_user(ctx.user_id).await?.sanitized())
    }

    pub async fn update_profile(
        &self,
        ctx: &AuthContext,
        name: Option<String>,
    ) -> Result<SanitizedUser, ServiceError> {
        let name = name.map(|n| n.trim().to_string()).filter(|n| !n.is_empty());
        self.store
            .update_display_name(ctx.user_id, name.as_deref())
            .await?;
        self.profile(ctx).await
    }

    /// Changes the password and signs the user out everywhere.
    pub async fn change_password(
        &self,
        ctx: &AuthContext,
        current_password: String,
        new_password: String,
    ) -> Result<(), ServiceError> {
        let user = self.load_user(ctx.user_id).await?;

        let stored_hash = user
            .password_hash
            .clone()
            .unwrap_or_else(|| DUMMY_PASSWORD_HASH.to_string());
        if !verify_blocking(current_password, stored_hash).await? || user.password_hash.is_none()
        {
            return Err(ServiceError::InvalidCredentials);
        }

        let password_hash = hash_blocking(new_password).await?;
        let audit = AuditEntry::new(
            ctx.tenant_id.clone(),
            user.id,
            "user.password_change",
            self.tokens.now(),
        )
        .with_target(user.id.to_string());
        let revoked = self
            .store
            .replace_password(user.id, &password_hash, &audit)
            .await?;

        tracing::info!(user_id = %user.id, revoked, "Password changed");
        Ok(())
    }

    // ==================== Helpers ====================

    async fn load_user(&self, user_id: Uuid) -> Result<User, ServiceError> {
        self.store
            .find_user_by_id(user_id)
            .await?
            .ok_or(ServiceError::UserNotFound)
    }

    /// Creates `user` with a fresh workspace they own, audited as a
    /// registration through `method`.
    async fn create_account(&self, user: &User, method: &str) -> Result<Membership, ServiceError> {
        let (tenant, owner) = self.new_workspace(user);
        let audit = AuditEntry::new(tenant.id.clone(), user.id, "user.register", user.created_at)
            .with_target(user.id.to_string())
            .with_meta(json!({ "method": method }));
        self.store
            .create_account(user, &tenant, &owner, &audit)
            .await?;
        Ok(owner)
    }

    fn new_workspace(&self, user: &User) -> (Tenant, Membership) {
        let now = self.tokens.now();
        let tenant = Tenant::new(
            Tenant::workspace_name(user.display_name.as_deref(), &user.email),
            Region::default(),
            now,
        );
        let owner = Membership::new(tenant.id.clone(), user.id, Role::Owner, now);
        (tenant, owner)
    }

    /// Picks the membership a session is bound to.
    ///
    /// A requested tenant must be one of the user's memberships. Without one,
    /// the earliest membership wins. A user with none is given a new
    /// workspace when `provision` is set.
    async fn resolve_membership(
        &self,
        user: &User,
        requested: Option<&str>,
        provision: bool,
    ) -> Result<Membership, ServiceError> {
        if let Some(requested) = requested {
            let tenant_id = TenantId::from(requested.to_string());
            return self
                .store
                .find_membership(&tenant_id, user.id)
                .await?
                .ok_or_else(|| {
                    tracing::warn!(user_id = %user.id, "Sign-in to foreign company denied");
                    ServiceError::Forbidden("You are not a member of this company".to_string())
                });
        }

        if let Some(first) = self
            .store
            .list_memberships_for_user(user.id)
            .await?
            .into_iter()
            .next()
        {
            return Ok(first);
        }

        if !provision {
            return Err(ServiceError::Forbidden(
                "You are not a member of any company".to_string(),
            ));
        }

        let (tenant, owner) = self.new_workspace(user);
        let audit =
            AuditEntry::new(tenant.id.clone(), user.id, "tenant.provision", tenant.created_at)
                .with_meta(json!({ "name": tenant.name }));
        self.store.create_tenant(&tenant, &owner, &audit).await?;
        tracing::info!(user_id = %user.id, tenant_id = %tenant.id, "Workspace provisioned");
        Ok(owner)
    }

    async fn issue_session(
        &self,
        user_id: Uuid,
        membership: &Membership,
    ) -> Result<TokenResponse, ServiceError> {
        let access_token = self
            .tokens
            .issue_access_token(user_id, &membership.tenant_id, membership.role)
            .await?;
        let refresh_token = self.tokens.issue_refresh_token(user_id).await?;
        Ok(self.token_response(access_token, Some(refresh_token), membership))
    }

    fn token_response(
        &self,
        access_token: String,
        refresh_token: Option<String>,
        membership: &Membership,
    ) -> TokenResponse {
        TokenResponse {
            access_token,
            refresh_token,
            token_type: "Bearer".to_string(),
            expires_in: self.tokens.access_token_expiry_seconds(),
            tenant_id: membership.tenant_id.clone(),
            role: membership.role,
        }
    }
}
