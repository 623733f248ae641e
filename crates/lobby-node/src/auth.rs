use axum::body::Body;
use axum::extract::Request;
use axum::http::{HeaderMap, StatusCode};
use axum::middleware::Next;
use axum::response::Response;

/// REST authentication, taken from `[auth]` / `LOBBY_API_TOKEN`.
#[derive(Clone, Default)]
pub struct AuthConfig {
    /// Bearer token for REST API access. None = auth disabled.
    pub bearer_token: Option<String>,
}

impl AuthConfig {
    /// Whether `headers` satisfy this configuration.
    pub fn permits(&self, headers: &HeaderMap) -> bool {
        let Some(expected) = &self.bearer_token else {
            return true;
        };
        headers
            .get("authorization")
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.strip_prefix("Bearer "))
            .is_some_and(|token| token == expected)
    }
}

/// Axum middleware that validates Bearer token authentication. Expects the
/// `AuthConfig` in request extensions; without one every request passes.
pub async fn bearer_auth_middleware(
    headers: HeaderMap,
    request: Request<Body>,
    next: Next,
) -> Result<Response, StatusCode> {
    let auth_config = request
        .extensions()
        .get::<AuthConfig>()
        .cloned()
        .unwrap_or_default();

    if !auth_config.permits(&headers) {
        return Err(StatusCode::UNAUTHORIZED);
    }
    Ok(next.run(request).await)
}
