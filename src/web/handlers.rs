use axum::http::StatusCode;
use axum::response::IntoResponse;

pub mod devices;
pub mod hooks;

/// The root carries no content
pub async fn index() -> impl IntoResponse {
    StatusCode::BAD_REQUEST
}
