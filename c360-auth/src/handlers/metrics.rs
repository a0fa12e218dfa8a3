use c360_core::{
    axum::{extract::State, http::header, response::IntoResponse},
    error::AppError,
};

use crate::AppState;

/// Prometheus exposition of the installed recorder
pub async fn metrics(State(state): State<AppState>) -> Result<impl IntoResponse, AppError> {
    let handle = state
        .metrics
        .as_ref()
        .ok_or_else(|| AppError::NotFound("Metrics are not enabled".to_string()))?;
    Ok((
        [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
        handle.render(),
    ))
}
