//! HTTP to HTTPS redirect router.
//!
//! Used for the plain HTTP listener when TLS is active, so that clients hitting
//! the HTTP port are sent to HTTPS instead of failing outright.

use axum::http::header::LOCATION;
use axum::http::{StatusCode, Uri};
use axum::response::{IntoResponse, Response};
use axum::routing::any;
use axum::Router;
use axum_extra::extract::Host;

/// Router that answers every request with a 302 to the same host and path on HTTPS.
pub fn redirect_router(https_port: u16) -> Router {
    Router::new().fallback(any(move |Host(host): Host, uri: Uri| async move {
        redirect_to_https(&host, &uri, https_port)
    }))
}

fn redirect_to_https(host: &str, uri: &Uri, https_port: u16) -> Response {
    let https_url = https_url(host, uri, https_port);

    tracing::debug!(from = %uri, to = %https_url, "Redirecting HTTP to HTTPS");

    (StatusCode::FOUND, [(LOCATION, https_url)]).into_response()
}

/// Build the HTTPS URL for a request, keeping path and query verbatim.
pub fn https_url(host: &str, uri: &Uri, https_port: u16) -> String {
    let host = strip_port(host);
    let path_and_query = uri.path_and_query().map(|pq| pq.as_str()).unwrap_or("/");

    if https_port == 443 {
        format!("https://{}{}", host, path_and_query)
    } else {
        format!("https://{}:{}{}", host, https_port, path_and_query)
    }
}

/// Remove a trailing `:port` from a Host header value (IPv6 literals keep their brackets).
fn strip_port(host: &str) -> &str {
    match host.rsplit_once(':') {
        Some((name, port))
            if !port.is_empty()
                && port.bytes().all(|b| b.is_ascii_digit())
                && (!name.contains(':') || name.ends_with(']')) =>
        {
            name
        }
        _ => host,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::Request;
    use tower::ServiceExt;

    async fn redirect(app: Router, host: &str, path: &str) -> Response {
        let request = Request::builder()
            .uri(path)
            .header("host", host)
            .body(Body::empty())
            .unwrap();
        app.oneshot(request).await.unwrap()
    }

    fn location(response: &Response) -> &str {
        response.headers()[LOCATION].to_str().unwrap()
    }

    #[tokio::test]
    async fn test_redirect_preserves_path_and_query() {
        let response = redirect(redirect_router(443), "host", "/p?q=1").await;
        assert_eq!(response.status(), StatusCode::FOUND);
        assert_eq!(location(&response), "https://host/p?q=1");
    }

    #[tokio::test]
    async fn test_redirect_catches_every_path() {
        let response = redirect(redirect_router(443), "worker.example.com", "/").await;
        assert_eq!(response.status(), StatusCode::FOUND);
        assert_eq!(location(&response), "https://worker.example.com/");

        let response = redirect(redirect_router(443), "worker.example.com", "/a/b/c").await;
        assert_eq!(location(&response), "https://worker.example.com/a/b/c");
    }

    #[tokio::test]
    async fn test_redirect_replaces_http_port() {
        let response = redirect(redirect_router(8443), "host:9000", "/init?room=7").await;
        assert_eq!(location(&response), "https://host:8443/init?room=7");
    }

    #[test]
    fn test_strip_port() {
        assert_eq!(strip_port("host"), "host");
        assert_eq!(strip_port("host:80"), "host");
        assert_eq!(strip_port("[::1]:80"), "[::1]");
        assert_eq!(strip_port("[::1]"), "[::1]");
    }
}
