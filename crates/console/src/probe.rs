//! Out-of-band request used only to classify server status codes.

use reqwest::header::COOKIE;
use tracing::info;

use crate::error::{classify_status, ConsoleError};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProbeOutcome {
    pub status: u16,
    pub error: Option<ConsoleError>,
}

/// GET `url` and classify the response status. Transport failures are
/// returned as-is; the channel is never involved.
pub async fn probe(
    client: &reqwest::Client,
    url: &str,
    cookie: Option<&str>,
) -> Result<ProbeOutcome, reqwest::Error> {
    let mut request = client.get(url);
    if let Some(cookie) = cookie {
        request = request.header(COOKIE, cookie);
    }
    let status = request.send().await?.status().as_u16();
    let error = classify_status(status);

    info!(
        component = "probe",
        event = "probe.completed",
        url = %url,
        status,
        error = ?error,
        "Out-of-band probe finished"
    );
    Ok(ProbeOutcome { status, error })
}

#[cfg(test)]
mod tests {
    use axum::http::{HeaderMap, StatusCode};
    use axum::routing::get;
    use axum::Router;

    use super::*;

    async fn serve(app: Router) -> String {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        format!("http://{addr}")
    }

    #[tokio::test]
    async fn forbidden_maps_to_authorization_error() {
        let base = serve(Router::new().route("/ping", get(|| async { StatusCode::FORBIDDEN }))).await;
        let outcome = probe(&reqwest::Client::new(), &format!("{base}/ping"), None)
            .await
            .unwrap();
        assert_eq!(
            outcome,
            ProbeOutcome {
                status: 403,
                error: Some(ConsoleError::Authorization),
            }
        );
    }

    #[tokio::test]
    async fn ok_and_not_found_are_silent() {
        let base = serve(Router::new().route("/ping", get(|| async { "pong" }))).await;
        let client = reqwest::Client::new();

        let ok = probe(&client, &format!("{base}/ping"), None).await.unwrap();
        assert_eq!(ok.error, None);

        let missing = probe(&client, &format!("{base}/nope"), None).await.unwrap();
        assert_eq!(missing.status, 404);
        assert_eq!(missing.error, None);
    }

    #[tokio::test]
    async fn cookie_is_forwarded() {
        let app = Router::new().route(
            "/ping",
            get(|headers: HeaderMap| async move {
                match headers.get("cookie").and_then(|v| v.to_str().ok()) {
                    Some("JSESSIONID=abc") => StatusCode::OK,
                    _ => StatusCode::UNAUTHORIZED,
                }
            }),
        );
        let base = serve(app).await;
        let client = reqwest::Client::new();
        let url = format!("{base}/ping");

        let anonymous = probe(&client, &url, None).await.unwrap();
        assert_eq!(anonymous.error, Some(ConsoleError::SessionExpired));

        let authed = probe(&client, &url, Some("JSESSIONID=abc")).await.unwrap();
        assert_eq!(authed.status, 200);
    }
}
