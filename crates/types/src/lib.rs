//! Shared type definitions for the SixLab provider integration layer.
//!
//! These are the records that cross the boundary between the session
//! orchestration layer and the concrete lab providers: sessions, validation
//! steps and their graded results, capability descriptors, health/connection
//! probes, and the structured lifecycle events providers emit.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

pub mod config;
pub mod error;

pub use config::{ConfigFields, FieldSchema, FieldType, default_config, merge_defaults, validate_config};
pub use error::{ProviderError, ProviderResult};

/// Capability tags providers advertise. Callers branch UI behaviour on these
/// without knowing the concrete provider type.
pub mod features {
    pub const SNAPSHOT_SUPPORT: &str = "snapshot_support";
    pub const RECORDING_SUPPORT: &str = "recording_support";
    pub const COLLABORATION_SUPPORT: &str = "collaboration_support";
    pub const MULTI_NODE: &str = "multi_node";
    pub const CONSOLE_ACCESS: &str = "console_access";
    pub const FILE_TRANSFER: &str = "file_transfer";
}

/// One learner's live backend resource, as returned by `create_session`.
///
/// `session_id` is provider-assigned and opaque: an integer-like project id,
/// a `folder/name.unl` path, or a connection identifier. It is only
/// meaningful to the provider instance that created it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Session {
    pub session_id: String,
    /// Well-formed URL the UI embeds; liveness is the caller's concern.
    pub access_url: String,
    pub created_at: DateTime<Utc>,
    /// Backend-specific extras (resource name, console ports, datasource).
    #[serde(default)]
    pub metadata: Map<String, Value>,
}

/// Read-only snapshot of an existing session.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionDetails {
    pub session_id: String,
    /// Backend-reported state string (`opened`, `closed`, provider-specific).
    pub status: String,
    #[serde(default)]
    pub metadata: Map<String, Value>,
}

/// Terminal outcome of `destroy_session`.
///
/// Destroy is idempotent-safe: a backend that reports the resource as already
/// absent yields `AlreadyGone` rather than an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DestroyOutcome {
    Destroyed,
    AlreadyGone,
}

/// Caller-supplied descriptor of one grading check.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ValidationStep {
    /// Key into the provider's dispatch table (`ping_test`, `file_exists`).
    pub validation_type: String,
    #[serde(default)]
    pub expected_result: Option<Value>,
    pub max_score: f64,
}

/// Uniform result of executing a validation step.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ValidationResult {
    pub passed: bool,
    pub score: f64,
    pub max_score: f64,
    pub feedback: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub actual_result: Option<Value>,
}

impl ValidationResult {
    /// Fraction of `max_score` a check must reach to pass under the default
    /// policy. Individual handlers may substitute their own.
    pub const DEFAULT_PASS_RATIO: f64 = 0.7;

    /// Build a result with the score clamped into `[0, max_score]` and
    /// `passed` decided by the default threshold policy.
    pub fn graded(score: f64, max_score: f64, feedback: impl Into<String>) -> Self {
        let max_score = max_score.max(0.0);
        let score = score.clamp(0.0, max_score);
        Self {
            passed: max_score > 0.0 && score >= Self::DEFAULT_PASS_RATIO * max_score,
            score,
            max_score,
            feedback: feedback.into(),
            actual_result: None,
        }
    }

    /// Build a result where the handler applies its own pass policy.
    pub fn with_policy(passed: bool, score: f64, max_score: f64, feedback: impl Into<String>) -> Self {
        let max_score = max_score.max(0.0);
        Self {
            passed,
            score: score.clamp(0.0, max_score),
            max_score,
            feedback: feedback.into(),
            actual_result: None,
        }
    }

    /// Placeholder outcome for checks the backend integration does not
    /// execute yet. This is a displayable result, not an error: callers
    /// render it as "not available" rather than a failure.
    pub fn unimplemented(check_name: &str, max_score: f64) -> Self {
        Self::with_policy(
            false,
            0.0,
            max_score,
            format!("The '{}' check is not executed automatically yet; ask your instructor to grade it manually.", check_name),
        )
    }

    pub fn with_actual(mut self, actual: Value) -> Self {
        self.actual_result = Some(actual);
        self
    }
}

/// Result of a cheap authenticated round-trip against the backend.
///
/// `test_connection` never errors; failures are reported through this record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConnectionTest {
    pub success: bool,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
}

impl ConnectionTest {
    pub fn ok(message: impl Into<String>) -> Self {
        Self {
            success: true,
            message: message.into(),
            version: None,
        }
    }

    pub fn ok_with_version(message: impl Into<String>, version: impl Into<String>) -> Self {
        Self {
            success: true,
            message: message.into(),
            version: Some(version.into()),
        }
    }

    pub fn failed(message: impl Into<String>) -> Self {
        Self {
            success: false,
            message: message.into(),
            version: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HealthState {
    Healthy,
    Error,
}

/// Thin derivation of `test_connection` with a timestamp.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthStatus {
    pub status: HealthState,
    pub message: String,
    pub timestamp: DateTime<Utc>,
}

impl From<ConnectionTest> for HealthStatus {
    fn from(test: ConnectionTest) -> Self {
        Self {
            status: if test.success { HealthState::Healthy } else { HealthState::Error },
            message: test.message,
            timestamp: Utc::now(),
        }
    }
}

/// Derived capability record used by callers to branch behaviour.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Capabilities {
    pub features: Vec<String>,
    pub max_concurrent_sessions: u32,
    /// Idle timeout in seconds after which the orchestrator reclaims a
    /// session.
    pub session_timeout: u64,
    pub supports_snapshots: bool,
    pub supports_recording: bool,
    pub supports_collaboration: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventLevel {
    Info,
    Warn,
    Error,
}

/// Structured lifecycle event emitted to the external collector.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderEvent {
    pub provider: String,
    /// Event name: `session_created`, `session_destroyed`,
    /// `session_stop_failed`, `http_request_failed`, `template_loaded`.
    pub action: String,
    pub data: Value,
    pub level: EventLevel,
    pub timestamp: DateTime<Utc>,
}

impl ProviderEvent {
    pub fn new(provider: impl Into<String>, action: impl Into<String>, data: Value, level: EventLevel) -> Self {
        Self {
            provider: provider.into(),
            action: action.into(),
            data,
            level,
            timestamp: Utc::now(),
        }
    }
}

/// Destination for lifecycle events. Implementations must be non-blocking
/// and infallible from the provider's point of view.
pub trait EventSink: Send + Sync {
    fn emit(&self, event: ProviderEvent);
}

/// Sink that discards everything; used in tests and as a safe default.
#[derive(Debug, Default)]
pub struct NullEventSink;

impl EventSink for NullEventSink {
    fn emit(&self, _event: ProviderEvent) {}
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn graded_result_clamps_score_into_bounds() {
        let result = ValidationResult::graded(15.0, 10.0, "over");
        assert_eq!(result.score, 10.0);
        assert!(result.passed);

        let result = ValidationResult::graded(-3.0, 10.0, "under");
        assert_eq!(result.score, 0.0);
        assert!(!result.passed);
    }

    #[test]
    fn graded_result_applies_seventy_percent_threshold() {
        assert!(ValidationResult::graded(7.0, 10.0, "edge").passed);
        assert!(!ValidationResult::graded(6.9, 10.0, "just under").passed);
    }

    #[test]
    fn zero_max_score_never_passes() {
        let result = ValidationResult::graded(0.0, 0.0, "empty");
        assert!(!result.passed);
        assert_eq!(result.max_score, 0.0);
    }

    #[test]
    fn unimplemented_result_is_a_displayable_placeholder() {
        let result = ValidationResult::unimplemented("ping_test", 10.0);
        assert!(!result.passed);
        assert_eq!(result.score, 0.0);
        assert!(!result.feedback.is_empty());
    }

    #[test]
    fn health_status_derives_from_connection_test() {
        let healthy: HealthStatus = ConnectionTest::ok("reachable").into();
        assert_eq!(healthy.status, HealthState::Healthy);

        let broken: HealthStatus = ConnectionTest::failed("connection refused").into();
        assert_eq!(broken.status, HealthState::Error);
        assert_eq!(broken.message, "connection refused");
    }

    #[test]
    fn session_serializes_with_metadata() {
        let session = Session {
            session_id: "42".to_string(),
            access_url: "http://lab.example/project/42".to_string(),
            created_at: Utc::now(),
            metadata: [("resource_name".to_string(), json!("sixlab_7_x"))].into_iter().collect(),
        };
        let encoded = serde_json::to_value(&session).expect("serialize");
        assert_eq!(encoded["session_id"], json!("42"));
        assert_eq!(encoded["metadata"]["resource_name"], json!("sixlab_7_x"));
    }
}
