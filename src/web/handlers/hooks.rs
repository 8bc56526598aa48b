use axum::{
    extract::{Path, State},
    response::IntoResponse,
};
use tracing::{info, warn};

use crate::web::AppState;

/// `POST /hooks/{secret}/` starts an icon dataset refresh in the background
///
/// The reply is the same whether or not the secret matched.
pub async fn refresh_icons(Path(secret): Path<String>, State(state): State<AppState>) -> impl IntoResponse {
    match state.webhook_secret.as_deref() {
        Some(expected) if secret_matches(expected, &secret) => {
            info!("Icon refresh hook accepted");
            state.refresher.spawn_refresh();
        }
        Some(_) => warn!("Icon refresh hook called with a wrong secret"),
        None => warn!("Icon refresh hook called but no webhook secret is configured"),
    }
    "Success."
}

/// Constant-time comparison; only the length can leak
fn secret_matches(expected: &str, given: &str) -> bool {
    let (expected, given) = (expected.as_bytes(), given.as_bytes());
    if expected.len() != given.len() {
        return false;
    }

    let mut difference: u8 = 0;
    for (a, b) in expected.iter().zip(given) {
        difference |= a ^ b;
    }
    difference == 0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_secret_matches() {
        assert!(secret_matches("s3cret", "s3cret"));
        assert!(!secret_matches("s3cret", "s3creT"));
        assert!(!secret_matches("s3cret", "s3cre"));
        assert!(!secret_matches("s3cret", ""));
    }
}
