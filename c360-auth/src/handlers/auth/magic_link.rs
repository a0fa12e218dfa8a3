use c360_core::{
    axum::{
        extract::{Query, State},
        http::StatusCode,
        response::IntoResponse,
        Json,
    },
    error::AppError,
};
use validator::Validate;

use crate::{
    dtos::auth::{MagicLinkRequest, MagicLinkVerifyQuery},
    utils::ValidatedJson,
    AppState,
};

/// Email a single-use sign-in link
pub async fn request_magic_link(
    State(state): State<AppState>,
    ValidatedJson(req): ValidatedJson<MagicLinkRequest>,
) -> Result<impl IntoResponse, AppError> {
    let res = state.auth_service.request_magic_link(&req.email).await?;
    Ok((StatusCode::OK, Json(res)))
}

/// Redeem a sign-in link
pub async fn verify_magic_link(
    State(state): State<AppState>,
    Query(query): Query<MagicLinkVerifyQuery>,
) -> Result<impl IntoResponse, AppError> {
    query.validate()?;
    let res = state.auth_service.verify_magic_link(&query.token).await?;
    Ok((StatusCode::OK, Json(res)))
}
