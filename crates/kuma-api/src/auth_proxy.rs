use axum::body::{Body, Bytes};
use axum::http::header::{self, HeaderName};
use axum::http::{HeaderMap, Method, Uri};
use axum::response::Response;

use crate::error::{sanitize, AppError};

/// Forwards `/api/auth/**` traffic to the external auth service untouched.
#[derive(Debug, Clone)]
pub struct AuthServiceProxy {
    client: reqwest::Client,
    base_url: String,
}

impl AuthServiceProxy {
    pub fn new(base_url: impl Into<String>) -> Result<Self, AppError> {
        // Redirects (OAuth callbacks, sign-out) belong to the browser, not to us.
        let client = reqwest::Client::builder()
            .redirect(reqwest::redirect::Policy::none())
            .build()
            .map_err(|error| {
                AppError::Config(format!("Auth proxy client setup failed: {}", sanitize(&error)))
            })?;
        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        })
    }

    pub fn upstream_url(&self, uri: &Uri) -> String {
        let path_and_query = uri
            .path_and_query()
            .map_or_else(|| uri.path(), |value| value.as_str());
        format!("{}{}", self.base_url, path_and_query)
    }

    pub async fn forward(
        &self,
        method: Method,
        uri: &Uri,
        headers: &HeaderMap,
        body: Bytes,
    ) -> Result<Response, AppError> {
        let url = self.upstream_url(uri);
        let upstream = self
            .client
            .request(method, &url)
            .headers(end_to_end(headers))
            .body(body)
            .send()
            .await
            .map_err(|error| {
                AppError::external(format!("Auth service request failed: {}", sanitize(&error)))
            })?;

        let status = upstream.status();
        let response_headers = end_to_end(upstream.headers());
        let body = upstream.bytes().await.map_err(|error| {
            AppError::external(format!("Auth service response failed: {}", sanitize(&error)))
        })?;

        tracing::debug!(status = status.as_u16(), "Proxied auth service request");

        let mut response = Response::new(Body::from(body));
        *response.status_mut() = status;
        *response.headers_mut() = response_headers;
        Ok(response)
    }
}

/// Copy of `headers` without hop-by-hop and framing headers.
fn end_to_end(headers: &HeaderMap) -> HeaderMap {
    let mut out = HeaderMap::with_capacity(headers.len());
    for (name, value) in headers {
        if !is_hop_by_hop(name) {
            out.append(name.clone(), value.clone());
        }
    }
    out
}

fn is_hop_by_hop(name: &HeaderName) -> bool {
    const HOP_BY_HOP: [HeaderName; 9] = [
        header::CONNECTION,
        header::HOST,
        header::CONTENT_LENGTH,
        header::PROXY_AUTHENTICATE,
        header::PROXY_AUTHORIZATION,
        header::TE,
        header::TRAILER,
        header::TRANSFER_ENCODING,
        header::UPGRADE,
    ];
    HOP_BY_HOP.contains(name) || name.as_str() == "keep-alive"
}

#[cfg(test)]
mod tests {
    use axum::http::HeaderValue;

    use super::*;

    #[test]
    fn upstream_url_keeps_path_and_query() {
        let proxy = AuthServiceProxy::new("http://localhost:3001/").unwrap();
        let uri: Uri = "/api/auth/callback/github?code=abc&state=xyz".parse().unwrap();
        assert_eq!(
            proxy.upstream_url(&uri),
            "http://localhost:3001/api/auth/callback/github?code=abc&state=xyz"
        );
    }

    #[test]
    fn hop_by_hop_headers_are_dropped() {
        let mut headers = HeaderMap::new();
        headers.insert(header::HOST, HeaderValue::from_static("kuma.local"));
        headers.insert(header::CONNECTION, HeaderValue::from_static("keep-alive"));
        headers.insert("keep-alive", HeaderValue::from_static("timeout=5"));
        headers.insert(header::COOKIE, HeaderValue::from_static("session=1"));
        headers.append(header::SET_COOKIE, HeaderValue::from_static("a=1"));
        headers.append(header::SET_COOKIE, HeaderValue::from_static("b=2"));

        let filtered = end_to_end(&headers);
        assert!(filtered.get(header::HOST).is_none());
        assert!(filtered.get(header::CONNECTION).is_none());
        assert!(filtered.get("keep-alive").is_none());
        assert_eq!(filtered.get(header::COOKIE).unwrap(), "session=1");
        assert_eq!(filtered.get_all(header::SET_COOKIE).iter().count(), 2);
    }

    #[tokio::test]
    async fn unreachable_auth_service_is_an_upstream_error() {
        // Port 9 (discard) on loopback is closed on CI machines.
        let proxy = AuthServiceProxy::new("http://127.0.0.1:9").unwrap();
        let uri: Uri = "/api/auth/session".parse().unwrap();

        let err = proxy
            .forward(Method::GET, &uri, &HeaderMap::new(), Bytes::new())
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::External(_)));
    }
}
