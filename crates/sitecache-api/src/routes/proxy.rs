//! Fallback route: every request not answered by the API goes through the
//! active worker

use axum::{
    body::Body,
    extract::State,
    http::{HeaderMap, HeaderName, HeaderValue, Method, StatusCode, Uri},
    response::Response,
};
use bytes::Bytes;
use sitecache_core::Routed;
use sitecache_proxy::origin::is_end_to_end;
use sitecache_storage::RequestDescriptor;
use tracing::{debug, warn};
use url::Url;

use crate::error::ApiError;
use crate::state::AppState;

/// Header naming where a proxied response came from
pub const SOURCE_HEADER: &str = "x-sitecache-source";

/// Fallback handler
pub async fn handle(
    State(state): State<AppState>,
    method: Method,
    uri: Uri,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Response, ApiError> {
    let request = describe(&state.worker_config.origin, method, &uri, &headers, body)?;
    debug!("{} {}", request.method, request.url);

    let routed = state.lifecycle.handle_fetch(request).await?;
    into_response(routed)
}

/// Convert an incoming request into a descriptor against the site origin
///
/// Only targets on the site origin are accepted, whatever form the request
/// line uses.
fn describe(
    origin: &Url,
    method: Method,
    uri: &Uri,
    headers: &HeaderMap,
    body: Bytes,
) -> Result<RequestDescriptor, ApiError> {
    let off_origin =
        || ApiError::BadRequest(format!("request target {} is not on the site origin", uri));

    if uri.authority().is_some() {
        let absolute = Url::parse(&uri.to_string())
            .map_err(|e| ApiError::BadRequest(format!("invalid request target {}: {}", uri, e)))?;
        if absolute.origin() != origin.origin() {
            return Err(off_origin());
        }
    }

    let target = uri.path_and_query().map(|p| p.as_str()).unwrap_or("/");
    if !target.starts_with('/') || target.starts_with("//") {
        return Err(off_origin());
    }

    let url = origin
        .join(target)
        .map_err(|e| ApiError::BadRequest(format!("invalid request target {}: {}", uri, e)))?;
    if url.origin() != origin.origin() {
        return Err(off_origin());
    }

    let mut request = RequestDescriptor::new(method.as_str(), url).with_body(body);
    for (name, value) in headers {
        match value.to_str() {
            // Repeated headers keep every value
            Ok(value) => request
                .headers
                .push((name.as_str().to_string(), value.to_string())),
            Err(_) => debug!("Dropping non-text header {}", name),
        }
    }

    let navigate = headers
        .get("sec-fetch-mode")
        .is_some_and(|mode| mode.as_bytes() == b"navigate");
    Ok(request.with_navigate(navigate))
}

fn into_response(routed: Routed) -> Result<Response, ApiError> {
    let Routed { response, source } = routed;
    let status = StatusCode::from_u16(response.status)
        .map_err(|e| ApiError::Internal(format!("invalid upstream status: {}", e)))?;

    let mut out = Response::new(Body::from(response.body));
    *out.status_mut() = status;

    let out_headers = out.headers_mut();
    for (name, value) in &response.headers {
        if !is_end_to_end(name) {
            continue;
        }
        match (
            HeaderName::from_bytes(name.as_bytes()),
            HeaderValue::from_str(value),
        ) {
            (Ok(name), Ok(value)) => {
                out_headers.append(name, value);
            }
            _ => warn!("Skipping invalid response header {}", name),
        }
    }
    out_headers.insert(SOURCE_HEADER, HeaderValue::from_static(source.as_str()));

    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn origin() -> Url {
        Url::parse("https://powerscraperpro.com").unwrap()
    }

    #[test]
    fn test_describe_relative_target() {
        let mut headers = HeaderMap::new();
        headers.insert("sec-fetch-mode", HeaderValue::from_static("navigate"));
        headers.insert("accept", HeaderValue::from_static("text/html"));

        let uri: Uri = "/features.html?tab=tv".parse().unwrap();
        let request = describe(&origin(), Method::GET, &uri, &headers, Bytes::new()).unwrap();

        assert_eq!(
            request.url.as_str(),
            "https://powerscraperpro.com/features.html?tab=tv"
        );
        assert!(request.navigate);
        assert_eq!(request.accept(), Some("text/html"));
    }

    #[test]
    fn test_describe_absolute_target_on_origin() {
        let uri: Uri = "https://powerscraperpro.com/fonts/inter.woff2".parse().unwrap();
        let request =
            describe(&origin(), Method::GET, &uri, &HeaderMap::new(), Bytes::new()).unwrap();

        assert_eq!(
            request.url.as_str(),
            "https://powerscraperpro.com/fonts/inter.woff2"
        );
        assert!(!request.navigate);
    }

    #[test]
    fn test_describe_refuses_other_origins() {
        for target in [
            "http://127.0.0.1:6379/x",
            "https://fonts.example.com/inter.woff2",
            "http://powerscraperpro.com/index.html",
            "//169.254.169.254/latest/meta-data/",
            "//powerscraperpro.com/index.html",
        ] {
            let uri: Uri = target.parse().unwrap();
            let result = describe(&origin(), Method::GET, &uri, &HeaderMap::new(), Bytes::new());
            assert!(
                matches!(result, Err(ApiError::BadRequest(_))),
                "{} was accepted",
                target
            );
        }
    }
}
