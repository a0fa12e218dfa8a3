//! Company-scoped endpoints. The path company id is authorized against the
//! caller's token by the service before any lookup.

use c360_core::{
    axum::{
        extract::{Path, Query, State},
        http::StatusCode,
        response::IntoResponse,
        Json,
    },
    error::AppError,
};
use uuid::Uuid;
use validator::Validate;

use crate::{
    dtos::members::{AddMemberRequest, AuditQuery, UpdateMemberRoleRequest},
    middleware::AuthUser,
    models::TenantId,
    utils::ValidatedJson,
    AppState,
};

fn parse_user_id(raw: &str) -> Result<Uuid, AppError> {
    Uuid::parse_str(raw).map_err(|_| AppError::BadRequest("Invalid user id".to_string()))
}

pub async fn list_members(
    State(state): State<AppState>,
    AuthUser(ctx): AuthUser,
    Path(company_id): Path<String>,
) -> Result<impl IntoResponse, AppError> {
    let members = state
        .company_service
        .list_members(&ctx, &TenantId::from(company_id))
        .await?;
    Ok(Json(members))
}

pub async fn add_member(
    State(state): State<AppState>,
    AuthUser(ctx): AuthUser,
    Path(company_id): Path<String>,
    ValidatedJson(req): ValidatedJson<AddMemberRequest>,
) -> Result<impl IntoResponse, AppError> {
    let member = state
        .company_service
        .add_member(&ctx, &TenantId::from(company_id), &req.email, req.role)
        .await?;
    Ok((StatusCode::CREATED, Json(member)))
}

pub async fn update_member(
    State(state): State<AppState>,
    AuthUser(ctx): AuthUser,
    Path((company_id, user_id)): Path<(String, String)>,
    ValidatedJson(req): ValidatedJson<UpdateMemberRoleRequest>,
) -> Result<impl IntoResponse, AppError> {
    let member = state
        .company_service
        .change_role(
            &ctx,
            &TenantId::from(company_id),
            parse_user_id(&user_id)?,
            req.role,
        )
        .await?;
    Ok(Json(member))
}

pub async fn remove_member(
    State(state): State<AppState>,
    AuthUser(ctx): AuthUser,
    Path((company_id, user_id)): Path<(String, String)>,
) -> Result<impl IntoResponse, AppError> {
    state
        .company_service
        .remove_member(&ctx, &TenantId::from(company_id), parse_user_id(&user_id)?)
        .await?;
    Ok(StatusCode::NO_CONTENT)
}

/// Audit entries of the company, newest first
pub async fn audit_log(
    State(state): State<AppState>,
    AuthUser(ctx): AuthUser,
    Path(company_id): Path<String>,
    Query(query): Query<AuditQuery>,
) -> Result<impl IntoResponse, AppError> {
    query.validate()?;
    let entries = state
        .company_service
        .audit_log(&ctx, &TenantId::from(company_id), query.limit())
        .await?;
    Ok(Json(entries))
}
