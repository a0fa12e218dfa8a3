//! PostgreSQL implementation of [`AuthStore`].
//!
//! Every value, tenant ids included, is a bound parameter.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::{PgConnection, PgPool, PgPoolOptions};
use sqlx::FromRow;
use std::time::Duration;
use uuid::Uuid;

use super::store::{ensure_provisionable, strands_tenant, AuthStore};
use super::ServiceError;
use crate::config::DatabaseConfig;
use crate::models::{
    AuditEntry, Member, Membership, PasswordResetToken, RefreshToken, Role, Tenant, TenantId, User,
};

/// PostgreSQL database wrapper.
#[derive(Clone)]
pub struct Database {
    pool: PgPool,
}

#[derive(FromRow)]
struct MembershipRow {
    tenant_id: TenantId,
    user_id: Uuid,
    role: String,
    created_at: DateTime<Utc>,
}

impl TryFrom<MembershipRow> for Membership {
    type Error = ServiceError;

    fn try_from(row: MembershipRow) -> Result<Self, Self::Error> {
        Ok(Membership {
            tenant_id: row.tenant_id,
            user_id: row.user_id,
            role: parse_role(&row.role)?,
            created_at: row.created_at,
        })
    }
}

#[derive(FromRow)]
struct MemberRow {
    user_id: Uuid,
    email: String,
    display_name: Option<String>,
    role: String,
    created_at: DateTime<Utc>,
}

impl TryFrom<MemberRow> for Member {
    type Error = ServiceError;

    fn try_from(row: MemberRow) -> Result<Self, Self::Error> {
        Ok(Member {
            user_id: row.user_id,
            email: row.email,
            name: row.display_name,
            role: parse_role(&row.role)?,
            joined_at: row.created_at,
        })
    }
}

fn parse_role(raw: &str) -> Result<Role, ServiceError> {
    raw.parse()
        .map_err(|e: String| ServiceError::Database(anyhow::anyhow!(e)))
}

fn is_unique_violation(err: &sqlx::Error) -> bool {
    matches!(err, sqlx::Error::Database(db) if db.is_unique_violation())
}

impl Database {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Opens the connection pool. The connection is verified before returning.
    pub async fn connect(config: &DatabaseConfig) -> Result<Self, ServiceError> {
        tracing::info!(
            max_connections = config.max_connections,
            min_connections = config.min_connections,
            "Connecting to PostgreSQL"
        );

        let pool = PgPoolOptions::new()
            .max_connections(config.max_connections)
            .min_connections(config.min_connections)
            .acquire_timeout(Duration::from_secs(10))
            .idle_timeout(Duration::from_secs(600))
            .connect(&config.url)
            .await?;

        Ok(Self::new(pool))
    }

    /// Applies the embedded schema migrations.
    pub async fn migrate(&self) -> Result<(), ServiceError> {
        sqlx::migrate!("./migrations")
            .run(&self.pool)
            .await
            .map_err(|e| ServiceError::Database(anyhow::anyhow!("Migration failed: {}", e)))?;
        tracing::info!("Database schema up to date");
        Ok(())
    }
}

const INSERT_TENANT: &str = r#"
    INSERT INTO tenants (id, name, region, created_at)
    VALUES ($1, $2, $3, $4)
"#;

const INSERT_MEMBERSHIP: &str = r#"
    INSERT INTO memberships (tenant_id, user_id, role, created_at)
    VALUES ($1, $2, $3, $4)
"#;

async fn insert_audit(conn: &mut PgConnection, entry: &AuditEntry) -> Result<(), sqlx::Error> {
    sqlx::query(
        r#"
        INSERT INTO audit_log (id, tenant_id, actor, action, target, at, meta)
        VALUES ($1, $2, $3, $4, $5, $6, $7)
        "#,
    )
    .bind(entry.id)
    .bind(&entry.tenant_id)
    .bind(entry.actor)
    .bind(&entry.action)
    .bind(&entry.target)
    .bind(entry.at)
    .bind(&entry.meta)
    .execute(conn)
    .await?;
    Ok(())
}

async fn insert_membership_row(
    conn: &mut PgConnection,
    membership: &Membership,
) -> Result<(), sqlx::Error> {
    sqlx::query(INSERT_MEMBERSHIP)
        .bind(&membership.tenant_id)
        .bind(membership.user_id)
        .bind(membership.role.as_str())
        .bind(membership.created_at)
        .execute(conn)
        .await?;
    Ok(())
}

async fn insert_tenant_row(conn: &mut PgConnection, tenant: &Tenant) -> Result<(), sqlx::Error> {
    sqlx::query(INSERT_TENANT)
        .bind(&tenant.id)
        .bind(&tenant.name)
        .bind(&tenant.region)
        .bind(tenant.created_at)
        .execute(conn)
        .await?;
    Ok(())
}

async fn set_password_hash(
    conn: &mut PgConnection,
    user_id: Uuid,
    hash: &str,
) -> Result<(), ServiceError> {
    let result = sqlx::query("UPDATE users SET password_hash = $1 WHERE id = $2")
        .bind(hash)
        .bind(user_id)
        .execute(conn)
        .await?;
    if result.rows_affected() == 0 {
        return Err(ServiceError::UserNotFound);
    }
    Ok(())
}

async fn revoke_all_for_user(conn: &mut PgConnection, user_id: Uuid) -> Result<u64, sqlx::Error> {
    let result = sqlx::query(
        "UPDATE refresh_tokens SET revoked = TRUE WHERE user_id = $1 AND revoked = FALSE",
    )
    .bind(user_id)
    .execute(conn)
    .await?;
    Ok(result.rows_affected())
}

/// Reads the tenant's owner ids and locks those rows until the transaction
/// ends, so concurrent demotions and removals are checked one at a time.
async fn lock_owners(
    conn: &mut PgConnection,
    tenant_id: &TenantId,
) -> Result<Vec<Uuid>, sqlx::Error> {
    sqlx::query_scalar(
        "SELECT user_id FROM memberships WHERE tenant_id = $1 AND role = 'owner' FOR UPDATE",
    )
    .bind(tenant_id)
    .fetch_all(conn)
    .await
}

#[async_trait]
impl AuthStore for Database {
    async fn health_check(&self) -> Result<(), ServiceError> {
        sqlx::query("SELECT 1")
            .execute(&self.pool)
            .await
            .map_err(|e| {
                tracing::error!("Database health check failed: {}", e);
                ServiceError::from(e)
            })?;
        Ok(())
    }

    // ==================== User Operations ====================

    async fn find_user_by_id(&self, user_id: Uuid) -> Result<Option<User>, ServiceError> {
        Ok(sqlx::query_as::<_, User>(
            "SELECT id, email, display_name, password_hash, created_at FROM users WHERE id = $1",
        )
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await?)
    }

    async fn find_user_by_email(&self, email: &str) -> Result<Option<User>, ServiceError> {
        Ok(sqlx::query_as::<_, User>(
            "SELECT id, email, display_name, password_hash, created_at FROM users WHERE email = $1",
        )
        .bind(email)
        .fetch_optional(&self.pool)
        .await?)
    }

    async fn update_display_name(
        &self,
        user_id: Uuid,
        display_name: Option<&str>,
    ) -> Result<(), ServiceError> {
        let result = sqlx::query("UPDATE users SET display_name = $1 WHERE id = $2")
            .bind(display_name)
            .bind(user_id)
            .execute(&self.pool)
            .await?;
        if result.rows_affected() == 0 {
            return Err(ServiceError::UserNotFound);
        }
        Ok(())
    }

    async fn replace_password(
        &self,
        user_id: Uuid,
        hash: &str,
        audit: &AuditEntry,
    ) -> Result<u64, ServiceError> {
        let mut tx = self.pool.begin().await?;
        set_password_hash(&mut tx, user_id, hash).await?;
        let revoked = revoke_all_for_user(&mut tx, user_id).await?;
        insert_audit(&mut tx, audit).await?;
        tx.commit().await?;
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
        let mut tx = self.pool.begin().await?;

        sqlx::query(
            r#"
            INSERT INTO users (id, email, display_name, password_hash, created_at)
            VALUES ($1, $2, $3, $4, $5)
            "#,
        )
        .bind(user.id)
        .bind(&user.email)
        .bind(&user.display_name)
        .bind(&user.password_hash)
        .bind(user.created_at)
        .execute(&mut *tx)
        .await
        .map_err(|e| {
            if is_unique_violation(&e) {
                ServiceError::EmailAlreadyRegistered
            } else {
                e.into()
            }
        })?;

        insert_tenant_row(&mut tx, tenant).await?;
        insert_membership_row(&mut tx, owner).await?;
        insert_audit(&mut tx, audit).await?;

        tx.commit().await?;
        Ok(())
    }

    async fn create_tenant(
        &self,
        tenant: &Tenant,
        owner: &Membership,
        audit: &AuditEntry,
    ) -> Result<(), ServiceError> {
        ensure_provisionable(tenant)?;
        let mut tx = self.pool.begin().await?;

        insert_tenant_row(&mut tx, tenant).await?;
        insert_membership_row(&mut tx, owner).await?;
        insert_audit(&mut tx, audit).await?;

        tx.commit().await?;
        Ok(())
    }

    // ==================== Membership Operations ====================

    async fn find_membership(
        &self,
        tenant_id: &TenantId,
        user_id: Uuid,
    ) -> Result<Option<Membership>, ServiceError> {
        sqlx::query_as::<_, MembershipRow>(
            r#"
            SELECT tenant_id, user_id, role, created_at FROM memberships
            WHERE tenant_id = $1 AND user_id = $2
            "#,
        )
        .bind(tenant_id)
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await?
        .map(Membership::try_from)
        .transpose()
    }

    async fn list_memberships_for_user(
        &self,
        user_id: Uuid,
    ) -> Result<Vec<Membership>, ServiceError> {
        sqlx::query_as::<_, MembershipRow>(
            r#"
            SELECT tenant_id, user_id, role, created_at FROM memberships
            WHERE user_id = $1
            ORDER BY created_at ASC
            "#,
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?
        .into_iter()
        .map(Membership::try_from)
        .collect()
    }

    async fn list_members(&self, tenant_id: &TenantId) -> Result<Vec<Member>, ServiceError> {
        sqlx::query_as::<_, MemberRow>(
            r#"
            SELECT u.id AS user_id, u.email, u.display_name, m.role, m.created_at
            FROM memberships m
            JOIN users u ON u.id = m.user_id
            WHERE m.tenant_id = $1
            ORDER BY m.created_at ASC
            "#,
        )
        .bind(tenant_id)
        .fetch_all(&self.pool)
        .await?
        .into_iter()
        .map(Member::try_from)
        .collect()
    }

    async fn insert_membership(
        &self,
        membership: &Membership,
        audit: &AuditEntry,
    ) -> Result<(), ServiceError> {
        let mut tx = self.pool.begin().await?;
        insert_membership_row(&mut tx, membership)
            .await
            .map_err(|e| {
                if is_unique_violation(&e) {
                    ServiceError::MembershipExists
                } else {
                    e.into()
                }
            })?;
        insert_audit(&mut tx, audit).await?;
        tx.commit().await?;
        Ok(())
    }

    async fn update_membership_role(
        &self,
        tenant_id: &TenantId,
        user_id: Uuid,
        role: Role,
        audit: &AuditEntry,
    ) -> Result<bool, ServiceError> {
        let mut tx = self.pool.begin().await?;
        let owners = lock_owners(&mut tx, tenant_id).await?;
        if strands_tenant(&owners, user_id, Some(role)) {
            return Err(ServiceError::LastOwner);
        }

        let result =
            sqlx::query("UPDATE memberships SET role = $1 WHERE tenant_id = $2 AND user_id = $3")
                .bind(role.as_str())
                .bind(tenant_id)
                .bind(user_id)
                .execute(&mut *tx)
                .await?;
        if result.rows_affected() == 0 {
            return Ok(false);
        }

        insert_audit(&mut tx, audit).await?;
        tx.commit().await?;
        Ok(true)
    }

    async fn delete_membership(
        &self,
        tenant_id: &TenantId,
        user_id: Uuid,
        audit: &AuditEntry,
    ) -> Result<bool, ServiceError> {
        let mut tx = self.pool.begin().await?;
        let owners = lock_owners(&mut tx, tenant_id).await?;
        if strands_tenant(&owners, user_id, None) {
            return Err(ServiceError::LastOwner);
        }

        let result = sqlx::query("DELETE FROM memberships WHERE tenant_id = $1 AND user_id = $2")
            .bind(tenant_id)
            .bind(user_id)
            .execute(&mut *tx)
            .await?;
        if result.rows_affected() == 0 {
            return Ok(false);
        }

        insert_audit(&mut tx, audit).await?;
        tx.commit().await?;
        Ok(true)
    }

    async fn count_owners(&self, tenant_id: &TenantId) -> Result<i64, ServiceError> {
        let count: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM memberships WHERE tenant_id = $1 AND role = 'owner'",
        )
        .bind(tenant_id)
        .fetch_one(&self.pool)
        .await?;
        Ok(count)
    }

    // ==================== Refresh Token Operations ====================

    async fn insert_refresh_token(&self, token: &RefreshToken) -> Result<(), ServiceError> {
        sqlx::query(
            r#"
            INSERT INTO refresh_tokens (id, user_id, token_hash, expires_at, created_at, revoked)
            VALUES ($1, $2, $3, $4, $5, $6)
            "#,
        )
        .bind(token.id)
        .bind(token.user_id)
        .bind(&token.token_hash)
        .bind(token.expires_at)
        .bind(token.created_at)
        .bind(token.revoked)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn find_refresh_token_by_hash(
        &self,
        token_hash: &str,
    ) -> Result<Option<RefreshToken>, ServiceError> {
        Ok(sqlx::query_as::<_, RefreshToken>(
            r#"
            SELECT id, user_id, token_hash, expires_at, created_at, revoked
            FROM refresh_tokens WHERE token_hash = $1
            "#,
        )
        .bind(token_hash)
        .fetch_optional(&self.pool)
        .await?)
    }

    async fn revoke_refresh_token(&self, id: Uuid) -> Result<bool, ServiceError> {
        let result =
            sqlx::query("UPDATE refresh_tokens SET revoked = TRUE WHERE id = $1 AND revoked = FALSE")
                .bind(id)
                .execute(&self.pool)
                .await?;
        Ok(result.rows_affected() == 1)
    }

    async fn revoke_refresh_token_by_hash(&self, token_hash: &str) -> Result<(), ServiceError> {
        sqlx::query("UPDATE refresh_tokens SET revoked = TRUE WHERE token_hash = $1")
            .bind(token_hash)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn revoke_all_refresh_tokens_for_user(&self, user_id: Uuid) -> Result<u64, ServiceError> {
        let mut conn = self.pool.acquire().await?;
        Ok(revoke_all_for_user(&mut conn, user_id).await?)
    }

    // ==================== Password Reset Operations ====================

    async fn insert_password_reset_token(
        &self,
        token: &PasswordResetToken,
    ) -> Result<(), ServiceError> {
        sqlx::query(
            r#"
            INSERT INTO password_reset_tokens (id, user_id, token_hash, expires_at, used, created_at)
            VALUES ($1, $2, $3, $4, $5, $6)
            "#,
        )
        .bind(token.id)
        .bind(token.user_id)
        .bind(&token.token_hash)
        .bind(token.expires_at)
        .bind(token.used)
        .bind(token.created_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn find_password_reset_token_by_hash(
        &self,
        token_hash: &str,
    ) -> Result<Option<PasswordResetToken>, ServiceError> {
        Ok(sqlx::query_as::<_, PasswordResetToken>(
            r#"
            SELECT id, user_id, token_hash, expires_at, used, created_at
            FROM password_reset_tokens WHERE token_hash = $1
            "#,
        )
        .bind(token_hash)
        .fetch_optional(&self.pool)
        .await?)
    }

    async fn complete_password_reset(
        &self,
        token_id: Uuid,
        user_id: Uuid,
        hash: &str,
        audit: &AuditEntry,
    ) -> Result<bool, ServiceError> {
        let mut tx = self.pool.begin().await?;

        let consumed = sqlx::query(
            "UPDATE password_reset_tokens SET used = TRUE WHERE id = $1 AND used = FALSE",
        )
        .bind(token_id)
        .execute(&mut *tx)
        .await?;
        if consumed.rows_affected() != 1 {
            return Ok(false);
        }

        set_password_hash(&mut tx, user_id, hash).await?;
        revoke_all_for_user(&mut tx, user_id).await?;
        insert_audit(&mut tx, audit).await?;

        tx.commit().await?;
        Ok(true)
    }

    // ==================== Audit Operations ====================

    async fn list_audit_entries(
        &self,
        tenant_id: &TenantId,
        limit: i64,
    ) -> Result<Vec<AuditEntry>, ServiceError> {
        Ok(sqlx::query_as::<_, AuditEntry>(
            r#"
            SELECT id, tenant_id, actor, action, target, at, meta
            FROM audit_log
            WHERE tenant_id = $1
            ORDER BY at DESC
            LIMIT $2
            "#,
        )
        .bind(tenant_id)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?)
    }
}
