use c360_core::{
    axum::{extract::State, http::StatusCode, response::IntoResponse, Json},
    error::AppError,
};

use crate::{
    dtos::{
        users::{ChangePasswordRequest, UpdateProfileRequest},
        MessageResponse,
    },
    middleware::AuthUser,
    utils::ValidatedJson,
    AppState,
};

/// Get current user profile
pub async fn get_me(
    State(state): State<AppState>,
    AuthUser(ctx): AuthUser,
) -> Result<impl IntoResponse, AppError> {
    let user = state.auth_service.profile(&ctx).await?;
    Ok(Json(user))
}

/// Update current user profile
pub async fn update_me(
    State(state): State<AppState>,
    AuthUser(ctx): AuthUser,
    ValidatedJson(req): ValidatedJson<UpdateProfileRequest>,
) -> Result<impl IntoResponse, AppError> {
    let user = state.auth_service.update_profile(&ctx, req.name).await?;
    Ok(Json(user))
}

/// Change password. Every refresh token of the user is revoked.
pub async fn change_password(
    State(state): State<AppState>,
    AuthUser(ctx): AuthUser,
    ValidatedJson(req): ValidatedJson<ChangePasswordRequest>,
) -> Result<impl IntoResponse, AppError> {
    state
        .auth_service
        .change_password(&ctx, req.current_password, req.new_password)
        .await?;
    Ok((
        StatusCode::OK,
        Json(MessageResponse::new("Password changed successfully")),
    ))
}
