use c360_core::{
    axum::{extract::State, http::header, response::IntoResponse, Json},
    error::AppError,
};

use crate::AppState;

/// Get JSON Web Key Set (JWKS)
pub async fn jwks(State(state): State<AppState>) -> Result<impl IntoResponse, AppError> {
    let jwks = state.tokens.jwks().await?;
    Ok((
        [
            (header::CONTENT_TYPE, "application/json"),
            (header::CACHE_CONTROL, "public, max-age=3600"),
        ],
        Json(jwks),
    ))
}
