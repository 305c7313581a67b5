//! Outbound HTTP plumbing shared by every lab provider.
//!
//! This crate wraps a preconfigured `reqwest::Client` so providers get the
//! same defaults everywhere:
//!
//! - a 30 second request timeout
//! - a `User-Agent` identifying the integration layer and `Accept:
//!   application/json`
//! - optional acceptance of invalid TLS certificates, for backends that
//!   commonly run self-signed (a per-client switch, never a global one)
//! - uniform error classification: network failures become
//!   [`ProviderError::Transport`], 401/403 become [`ProviderError::Auth`],
//!   404 becomes [`ProviderError::NotFound`], and other error statuses become
//!   [`ProviderError::Protocol`] carrying status and body
//!
//! Providers build requests with [`LabHttpClient::request`], decorate them
//! with their own auth scheme (basic, cookie, or bearer), and hand them back
//! to [`LabHttpClient::execute`].

use std::time::Duration;

use reqwest::header::{self, HeaderMap, HeaderValue};
use reqwest::{Client, Method, RequestBuilder, StatusCode, Url};
use serde_json::Value;
use tracing::{debug, warn};

use sixlab_types::{ProviderError, ProviderResult};

/// Timeout applied to every provider request.
pub const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Preconfigured HTTP client bound to one backend base URL.
#[derive(Debug, Clone)]
pub struct LabHttpClient {
    base_url: String,
    http: Client,
    user_agent: String,
}

impl LabHttpClient {
    /// Build a client for `base_url`.
    ///
    /// `accept_invalid_certs` disables TLS certificate verification for this
    /// client only; it exists for backends that ship self-signed
    /// certificates and must stay a per-provider decision.
    pub fn new(base_url: &str, accept_invalid_certs: bool) -> ProviderResult<Self> {
        validate_base_url(base_url)?;

        let mut default_headers = HeaderMap::new();
        default_headers.insert(header::ACCEPT, HeaderValue::from_static("application/json"));

        let http = Client::builder()
            .default_headers(default_headers)
            .timeout(REQUEST_TIMEOUT)
            .danger_accept_invalid_certs(accept_invalid_certs)
            .build()
            .map_err(|error| ProviderError::transport_with_source("could not build the HTTP client", error))?;

        Ok(Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            http,
            user_agent: format!("sixlab-integration/0.1 ({})", std::env::consts::OS),
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Build a request for a backend-relative path with the shared defaults
    /// attached. JSON content type is added by `.json(...)` when callers
    /// attach a body.
    pub fn request(&self, method: Method, path: &str) -> RequestBuilder {
        let url = format!("{}{}", self.base_url, path);
        debug!(%url, "building provider request");
        self.http.request(method, url).header(header::USER_AGENT, &self.user_agent)
    }

    /// Send a decorated request and parse the response as JSON.
    ///
    /// Empty 2xx bodies yield `Value::Null`; a 2xx body that is not valid
    /// JSON is an [`ProviderError::UnexpectedResponse`]. Error statuses and
    /// network failures are classified per the crate docs, and every failure
    /// is logged with structured fields.
    pub async fn execute(&self, builder: RequestBuilder) -> ProviderResult<Value> {
        let (_, _, body) = self.execute_with_headers(builder).await?;
        Ok(body)
    }

    /// Like [`execute`](Self::execute) but also returns the status code and
    /// response headers, for flows that need `Set-Cookie` or similar.
    pub async fn execute_with_headers(&self, builder: RequestBuilder) -> ProviderResult<(u16, HeaderMap, Value)> {
        let request = builder
            .build()
            .map_err(|error| ProviderError::transport_with_source("could not build the request", error))?;
        let method = request.method().clone();
        let url = request.url().clone();

        let response = match self.http.execute(request).await {
            Ok(response) => response,
            Err(error) => {
                let classified = classify_network_error(error);
                warn!(method = %method, url = %url, error = %classified, "http_request_failed");
                return Err(classified);
            }
        };

        let status = response.status();
        let headers = response.headers().clone();
        let text = response.text().await.unwrap_or_default();

        if !status.is_success() {
            let classified = classify_error_status(status, url.path(), text);
            warn!(method = %method, url = %url, status = status.as_u16(), "http_request_failed");
            return Err(classified);
        }

        let body = parse_json_body(&text)?;
        Ok((status.as_u16(), headers, body))
    }
}

/// Check that a configured base URL is usable before any request is built.
pub fn validate_base_url(base: &str) -> ProviderResult<()> {
    let parsed = Url::parse(base).map_err(|error| ProviderError::config("server_url", format!("invalid base URL '{}': {}", base, error)))?;
    if parsed.host_str().is_none() {
        return Err(ProviderError::config("server_url", "base URL must include a host"));
    }
    match parsed.scheme() {
        "http" | "https" => Ok(()),
        other => Err(ProviderError::config(
            "server_url",
            format!("base URL scheme must be http or https, got '{}'", other),
        )),
    }
}

fn classify_network_error(error: reqwest::Error) -> ProviderError {
    let message = if error.is_timeout() {
        format!("request timed out after {}s", REQUEST_TIMEOUT.as_secs())
    } else if error.is_connect() {
        "connection failed (host unreachable or refused)".to_string()
    } else {
        "network error while talking to the backend".to_string()
    };
    ProviderError::transport_with_source(message, error)
}

/// Map an HTTP error status to the taxonomy. `resource` is the request path,
/// used as the display name for not-found answers.
fn classify_error_status(status: StatusCode, resource: &str, body: String) -> ProviderError {
    match status.as_u16() {
        401 | 403 => ProviderError::auth(format!("the backend rejected the request with HTTP {}", status.as_u16())),
        404 => ProviderError::not_found(resource),
        code => ProviderError::Protocol { status: code, body },
    }
}

fn parse_json_body(text: &str) -> ProviderResult<Value> {
    if text.trim().is_empty() {
        return Ok(Value::Null);
    }
    serde_json::from_str(text).map_err(|error| ProviderError::unexpected(format!("response body is not valid JSON: {}", error)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn base_url_requires_http_scheme_and_host() {
        assert!(validate_base_url("http://gns3.lab:3080").is_ok());
        assert!(validate_base_url("https://eve.lab").is_ok());
        assert!(validate_base_url("ftp://eve.lab").is_err());
        assert!(validate_base_url("not a url").is_err());
    }

    #[test]
    fn trailing_slash_is_trimmed_from_base_url() {
        let client = LabHttpClient::new("http://gns3.lab:3080/", false).expect("client");
        assert_eq!(client.base_url(), "http://gns3.lab:3080");
    }

    #[test]
    fn unauthorized_statuses_classify_as_auth() {
        let error = classify_error_status(StatusCode::UNAUTHORIZED, "/api/labs", String::new());
        assert!(error.is_auth_rejection());
        let error = classify_error_status(StatusCode::FORBIDDEN, "/api/labs", String::new());
        assert!(error.is_auth_rejection());
    }

    #[test]
    fn missing_resource_classifies_as_not_found() {
        let error = classify_error_status(StatusCode::NOT_FOUND, "/v2/projects/42", String::new());
        assert!(error.is_not_found());
    }

    #[test]
    fn other_error_statuses_keep_status_and_body() {
        match classify_error_status(StatusCode::INTERNAL_SERVER_ERROR, "/v2/projects", "boom".to_string()) {
            ProviderError::Protocol { status, body } => {
                assert_eq!(status, 500);
                assert_eq!(body, "boom");
            }
            other => panic!("expected protocol error, got {:?}", other),
        }
    }

    #[test]
    fn empty_body_parses_as_null() {
        assert_eq!(parse_json_body("").expect("parse"), Value::Null);
        assert_eq!(parse_json_body("  \n").expect("parse"), Value::Null);
    }

    #[test]
    fn invalid_json_body_is_an_unexpected_response() {
        assert!(matches!(
            parse_json_body("<html>oops</html>"),
            Err(ProviderError::UnexpectedResponse { .. })
        ));
    }
}
