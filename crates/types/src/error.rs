//! Error taxonomy shared by every provider integration.
//!
//! The kinds here mirror the failure classes a caller can meaningfully branch
//! on: configuration problems are surfaced before any network call, transport
//! failures are distinct from HTTP error responses, and "the resource is
//! already gone" is typed so destroy/get paths can treat it as recoverable.

use thiserror::Error;

/// Convenience alias used throughout the provider crates.
pub type ProviderResult<T> = Result<T, ProviderError>;

/// Failure classes for provider operations.
///
/// Display strings are safe to show to end users directly; diagnostic detail
/// such as raw response bodies is carried in fields and logged, not rendered.
#[derive(Debug, Error)]
pub enum ProviderError {
    /// A required field is missing or a field failed its validation rule.
    #[error("configuration error in '{field}': {message}")]
    Config { field: String, message: String },

    /// The backend rejected our credentials or none could be obtained.
    #[error("authentication failed: {message}")]
    Auth { message: String },

    /// Network-level failure (DNS, connection refused, timeout) before any
    /// HTTP status was received.
    #[error("could not reach the lab backend: {message}")]
    Transport {
        message: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// The backend answered with an HTTP error status. The response body is
    /// kept for diagnostics but never rendered to end users.
    #[error("the lab backend returned HTTP {status}")]
    Protocol { status: u16, body: String },

    /// The backend reports the session/project/lab/connection no longer
    /// exists.
    #[error("{resource} was not found on the lab backend")]
    NotFound { resource: String },

    /// An unrecognized validation type or unsupported protocol; typed apart
    /// from generic failures so callers can render "not available".
    #[error("not supported: {what}")]
    Unsupported { what: String },

    /// A 2xx response whose body did not have the shape we expected.
    #[error("unexpected response from the lab backend: {message}")]
    UnexpectedResponse { message: String },
}

impl ProviderError {
    pub fn config(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Config {
            field: field.into(),
            message: message.into(),
        }
    }

    pub fn auth(message: impl Into<String>) -> Self {
        Self::Auth { message: message.into() }
    }

    pub fn transport(message: impl Into<String>) -> Self {
        Self::Transport {
            message: message.into(),
            source: None,
        }
    }

    pub fn transport_with_source(message: impl Into<String>, source: impl std::error::Error + Send + Sync + 'static) -> Self {
        Self::Transport {
            message: message.into(),
            source: Some(Box::new(source)),
        }
    }

    pub fn not_found(resource: impl Into<String>) -> Self {
        Self::NotFound {
            resource: resource.into(),
        }
    }

    pub fn unsupported(what: impl Into<String>) -> Self {
        Self::Unsupported { what: what.into() }
    }

    pub fn unexpected(message: impl Into<String>) -> Self {
        Self::UnexpectedResponse {
            message: message.into(),
        }
    }

    /// True when the backend reported the resource as already absent.
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }

    /// True for credential rejections, including an HTTP 401/403 answer.
    pub fn is_auth_rejection(&self) -> bool {
        matches!(self, Self::Auth { .. }) || matches!(self, Self::Protocol { status: 401 | 403, .. })
    }
}
