//! Site origin client

use async_trait::async_trait;
use reqwest::redirect::Policy;
use reqwest::{Client, Method};
use sitecache_storage::{CapturedResponse, RequestDescriptor};
use tracing::{debug, info};
use url::Url;

use crate::error::ProxyError;
use crate::transport::Transport;

/// Headers that describe a single connection and must not be forwarded
const HOP_BY_HOP: &[&str] = &[
    "connection",
    "content-length",
    "host",
    "keep-alive",
    "proxy-authenticate",
    "proxy-authorization",
    "proxy-connection",
    "te",
    "trailer",
    "transfer-encoding",
    "upgrade",
];

/// Redirect hops followed before a fetch fails
const MAX_REDIRECTS: usize = 10;

/// Origin client configuration
#[derive(Clone, Debug)]
pub struct OriginClientConfig {
    /// Base URL of the site origin
    pub url: Url,
    /// Skip TLS certificate verification
    pub skip_tls_verify: bool,
    /// Follow redirects (as a browser fetch does) instead of handing them
    /// back to the caller
    pub follow_redirects: bool,
}

/// HTTP client for the site origin
pub struct OriginClient {
    config: OriginClientConfig,
    client: Client,
}

impl OriginClient {
    /// Create a new origin client
    pub fn new(config: OriginClientConfig) -> Result<Self, ProxyError> {
        let mut builder = Client::builder();

        if config.skip_tls_verify {
            builder = builder.danger_accept_invalid_certs(true);
        }

        builder = builder.redirect(if config.follow_redirects {
            Policy::limited(MAX_REDIRECTS)
        } else {
            Policy::none()
        });

        let client = builder.build()?;

        info!("Created origin client for {}", config.url);

        Ok(Self { config, client })
    }

}

/// Whether a header may be forwarded between client, proxy and origin
pub fn is_end_to_end(name: &str) -> bool {
    !HOP_BY_HOP.iter().any(|h| h.eq_ignore_ascii_case(name))
}

#[async_trait]
impl Transport for OriginClient {
    async fn fetch(&self, request: &RequestDescriptor) -> Result<CapturedResponse, ProxyError> {
        let method = Method::from_bytes(request.method.as_bytes())
            .map_err(|_| ProxyError::InvalidRequest(format!("Bad method: {}", request.method)))?;

        debug!("Fetching from origin: {} {}", request.method, request.url);

        let mut builder = self.client.request(method, request.url.clone());
        for (name, value) in &request.headers {
            if is_end_to_end(name) {
                builder = builder.header(name.as_str(), value.as_str());
            }
        }
        if !request.body.is_empty() {
            builder = builder.body(request.body.clone());
        }

        let response = builder.send().await?;
        let status = response.status().as_u16();

        let headers = response
            .headers()
            .iter()
            .filter(|(name, _)| is_end_to_end(name.as_str()))
            .filter_map(|(name, value)| {
                value
                    .to_str()
                    .ok()
                    .map(|v| (name.as_str().to_string(), v.to_string()))
            })
            .collect();

        let body = response.bytes().await?;

        debug!(
            "Origin answered {} for {} ({} bytes)",
            status,
            request.url,
            body.len()
        );

        Ok(CapturedResponse {
            status,
            headers,
            body,
            stored_at: None,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{Router, http::StatusCode, http::header, routing::get};

    #[test]
    fn test_hop_by_hop_headers_are_dropped() {
        assert!(!is_end_to_end("Connection"));
        assert!(!is_end_to_end("transfer-encoding"));
        assert!(!is_end_to_end("Host"));
        assert!(is_end_to_end("content-type"));
        assert!(is_end_to_end("cache-control"));
        assert!(is_end_to_end("etag"));
    }

    /// Serve `/` directly and redirect `/index.html` to it
    async fn serve_site() -> Url {
        let app = Router::new()
            .route("/", get(|| async { "home" }))
            .route(
                "/index.html",
                get(|| async { (StatusCode::MOVED_PERMANENTLY, [(header::LOCATION, "/")]) }),
            );
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move { axum::serve(listener, app).await.unwrap() });
        Url::parse(&format!("http://{}", addr)).unwrap()
    }

    fn client(url: &Url, follow_redirects: bool) -> OriginClient {
        OriginClient::new(OriginClientConfig {
            url: url.clone(),
            skip_tls_verify: false,
            follow_redirects,
        })
        .unwrap()
    }

    #[tokio::test]
    async fn test_redirects_are_followed() {
        let site = serve_site().await;
        let request = RequestDescriptor::get(site.join("/index.html").unwrap());

        let response = client(&site, true).fetch(&request).await.unwrap();
        assert_eq!(response.status, 200);
        assert_eq!(response.body, "home");
        assert!(response.is_cacheable());
    }

    #[tokio::test]
    async fn test_redirects_can_be_returned_as_is() {
        let site = serve_site().await;
        let request = RequestDescriptor::get(site.join("/index.html").unwrap());

        let response = client(&site, false).fetch(&request).await.unwrap();
        assert_eq!(response.status, 301);
        assert_eq!(response.header("location"), Some("/"));
    }
}
