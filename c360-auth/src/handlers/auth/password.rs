use c360_core::{
    axum::{extract::State, http::StatusCode, response::IntoResponse, Json},
    error::AppError,
};

use crate::{
    dtos::{
        auth::{PasswordResetConfirm, PasswordResetRequest},
        MessageResponse,
    },
    services::auth::PASSWORD_RESET_REQUESTED,
    utils::ValidatedJson,
    AppState,
};

/// Request a password reset link.
///
/// The response is identical whether or not the email is registered.
pub async fn request_password_reset(
    State(state): State<AppState>,
    ValidatedJson(req): ValidatedJson<PasswordResetRequest>,
) -> Result<impl IntoResponse, AppError> {
    state.auth_service.request_password_reset(&req.email).await;
    Ok((
        StatusCode::OK,
        Json(MessageResponse::new(PASSWORD_RESET_REQUESTED)),
    ))
}

/// Confirm password reset with token
pub async fn confirm_password_reset(
    State(state): State<AppState>,
    ValidatedJson(req): ValidatedJson<PasswordResetConfirm>,
) -> Result<impl IntoResponse, AppError> {
    state.auth_service.confirm_password_reset(req).await?;
    Ok((
        StatusCode::OK,
        Json(MessageResponse::new(
            "Password reset successful. You can now login with your new password.",
        )),
    ))
}
