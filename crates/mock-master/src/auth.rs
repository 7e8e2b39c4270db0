//! Optional session token guard.
//!
//! When `--auth-token` is configured, every request except `/health` must
//! carry the token as a `JSESSIONID` cookie or as `Authorization: Bearer`.
//! Anything else is answered with 401, which the console reports as an
//! expired session.

use axum::{
    body::Body,
    extract::State,
    http::{header, HeaderMap, Request, StatusCode},
    middleware::Next,
    response::Response,
};
use tracing::warn;

pub const SESSION_COOKIE: &str = "JSESSIONID";

fn cookie_token(headers: &HeaderMap) -> Option<&str> {
    headers
        .get_all(header::COOKIE)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|v| v.split(';'))
        .filter_map(|pair| pair.trim().split_once('='))
        .find(|(name, _)| *name == SESSION_COOKIE)
        .map(|(_, value)| value)
}

fn bearer_token(headers: &HeaderMap) -> Option<&str> {
    headers
        .get(header::AUTHORIZATION)?
        .to_str()
        .ok()?
        .strip_prefix("Bearer ")
}

pub async fn auth_middleware(
    State(expected_token): State<String>,
    req: Request<Body>,
    next: Next,
) -> Result<Response, StatusCode> {
    if req.uri().path() == "/health" {
        return Ok(next.run(req).await);
    }

    let headers = req.headers();
    let authorized = [cookie_token(headers), bearer_token(headers)]
        .into_iter()
        .flatten()
        .any(|token| token == expected_token);
    if authorized {
        return Ok(next.run(req).await);
    }

    warn!(
        component = "auth",
        event = "auth.rejected",
        path = %req.uri().path(),
        "Request without a valid session token"
    );
    Err(StatusCode::UNAUTHORIZED)
}

#[cfg(test)]
mod tests {
    use axum::http::HeaderValue;

    use super::*;

    #[test]
    fn finds_session_cookie_among_others() {
        let mut headers = HeaderMap::new();
        headers.insert(
            header::COOKIE,
            HeaderValue::from_static("pxt-session=1; JSESSIONID=abc123; theme=dark"),
        );
        assert_eq!(cookie_token(&headers), Some("abc123"));
        assert_eq!(bearer_token(&headers), None);
    }

    #[test]
    fn reads_bearer_header() {
        let mut headers = HeaderMap::new();
        headers.insert(header::AUTHORIZATION, HeaderValue::from_static("Bearer s3cret"));
        assert_eq!(bearer_token(&headers), Some("s3cret"));
        assert_eq!(cookie_token(&headers), None);
    }
}
