//! The capability contract every lab provider implements, plus the shared
//! composition helper concrete providers embed.
//!
//! Providers do not inherit from a base type; each one owns a
//! [`ProviderCore`] carrying the configured HTTP client, the merged
//! configuration map, and the event sink, and implements [`LabProvider`] on
//! top of it. Shared behaviour (config validation, capability derivation,
//! health checks) lives in default trait methods keyed off
//! [`LabProvider::core`].

use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use rand::Rng;
use reqwest::RequestBuilder;
use reqwest::header::HeaderMap;
use serde_json::{Map, Value, json};

use sixlab_client::LabHttpClient;
use sixlab_types::{
    Capabilities, ConfigFields, ConnectionTest, DestroyOutcome, EventLevel, EventSink, HealthStatus, ProviderError, ProviderEvent,
    ProviderResult, Session, SessionDetails, ValidationResult, ValidationStep, default_config, features, merge_defaults,
    validate_config,
};

/// Operations every concrete lab provider exposes.
///
/// `session_id` values are provider-assigned and opaque; they are only
/// meaningful to the instance that created them. Expected business outcomes
/// (a failed connection test, a failed check) are returned as records, never
/// as errors — only infrastructure failures propagate as [`ProviderError`].
#[async_trait]
pub trait LabProvider: Send + Sync {
    /// Stable provider identifier (`gns3`, `eveng`, `guacamole`).
    fn type_name(&self) -> &'static str;

    fn display_name(&self) -> &str;

    fn description(&self) -> &'static str;

    /// Declarative settings schema, used to render the settings form and to
    /// drive [`validate_config`](Self::validate_config).
    fn config_fields(&self) -> ConfigFields;

    /// Capability tags this provider type advertises. Immutable per type.
    fn supported_features(&self) -> &'static [&'static str];

    /// Shared composition helper. Default trait methods derive their
    /// behaviour from it.
    fn core(&self) -> &ProviderCore;

    /// Cheap authenticated round-trip. Never errors; failure is a record.
    async fn test_connection(&self) -> ConnectionTest;

    /// Provision a live session for `user_id`.
    ///
    /// When `template` carries a payload for this provider, it is loaded
    /// into the freshly created resource; a template-load failure deletes
    /// that resource before the error is surfaced, so a caller observing an
    /// error can assume no orphaned remote resource exists.
    async fn create_session(&self, user_id: &str, template: &Value, options: &Map<String, Value>) -> ProviderResult<Session>;

    /// Read-only snapshot. A garbage-collected backend resource surfaces as
    /// [`ProviderError::NotFound`], which callers may treat as "already
    /// gone".
    async fn get_session(&self, session_id: &str) -> ProviderResult<SessionDetails>;

    async fn update_session(&self, session_id: &str, config_data: &Map<String, Value>) -> ProviderResult<bool>;

    /// Execute one grading check against the live session. Unrecognized
    /// `validation_type` keys yield [`ProviderError::Unsupported`].
    async fn validate_step(&self, session_id: &str, step: &ValidationStep, validation_data: &Value) -> ProviderResult<ValidationResult>;

    /// Stop-then-delete the backend resource. Idempotent-safe: destroying a
    /// session whose resource is already gone reports
    /// [`DestroyOutcome::AlreadyGone`].
    async fn destroy_session(&self, session_id: &str) -> ProviderResult<DestroyOutcome>;

    /// Recompute the access URL for an existing session.
    async fn session_url(&self, session_id: &str, user_id: &str) -> ProviderResult<String>;

    fn supports_feature(&self, tag: &str) -> bool {
        self.supported_features().contains(&tag)
    }

    /// Derived capability record; callers branch UI behaviour on this
    /// without knowing the concrete provider type.
    fn capabilities(&self) -> Capabilities {
        let core = self.core();
        Capabilities {
            features: self.supported_features().iter().map(|tag| tag.to_string()).collect(),
            max_concurrent_sessions: core
                .config_u64("max_concurrent_sessions")
                .map_or(10, |value| u32::try_from(value).unwrap_or(u32::MAX)),
            session_timeout: core.config_u64("session_timeout").unwrap_or(3600),
            supports_snapshots: self.supports_feature(features::SNAPSHOT_SUPPORT),
            supports_recording: self.supports_feature(features::RECORDING_SUPPORT),
            supports_collaboration: self.supports_feature(features::COLLABORATION_SUPPORT),
        }
    }

    /// The configuration a fresh provider row starts from: every field
    /// default from [`config_fields`](Self::config_fields), nothing else.
    fn default_config(&self) -> Map<String, Value> {
        default_config(&self.config_fields())
    }

    /// Run every field's rule string against a candidate configuration.
    fn validate_config(&self, candidate: &Map<String, Value>) -> ProviderResult<()> {
        validate_config(&self.config_fields(), candidate)
    }

    /// Thin derivation of [`test_connection`](Self::test_connection).
    async fn health_status(&self) -> HealthStatus {
        self.test_connection().await.into()
    }
}

/// Shared state and helpers embedded by every concrete provider.
pub struct ProviderCore {
    type_name: &'static str,
    display_name: String,
    config: Map<String, Value>,
    http: LabHttpClient,
    events: Arc<dyn EventSink>,
}

impl ProviderCore {
    /// Construct the core from a stored configuration row.
    ///
    /// Defaults from `fields` are merged under the supplied config, the
    /// merged result is validated, and the HTTP client is built from
    /// `server_url` + `verify_tls` — all before any network call happens.
    pub fn new(
        type_name: &'static str,
        default_display_name: &str,
        display_name: Option<String>,
        fields: &ConfigFields,
        config: Map<String, Value>,
        events: Arc<dyn EventSink>,
    ) -> ProviderResult<Self> {
        let config = merge_defaults(fields, config);
        validate_config(fields, &config)?;

        let base_url = config
            .get("server_url")
            .and_then(Value::as_str)
            .ok_or_else(|| ProviderError::config("server_url", "'Server URL' is required"))?;
        let verify_tls = config.get("verify_tls").and_then(Value::as_bool).unwrap_or(true);
        let http = LabHttpClient::new(base_url, !verify_tls)?;

        Ok(Self {
            type_name,
            display_name: display_name.unwrap_or_else(|| default_display_name.to_string()),
            config,
            http,
            events,
        })
    }

    pub fn display_name(&self) -> &str {
        &self.display_name
    }

    pub fn http(&self) -> &LabHttpClient {
        &self.http
    }

    pub fn config(&self) -> &Map<String, Value> {
        &self.config
    }

    pub fn config_str(&self, key: &str) -> Option<&str> {
        self.config.get(key).and_then(Value::as_str)
    }

    /// String config value that construction-time validation guarantees is
    /// present; a miss still surfaces as a typed config error.
    pub fn require_str(&self, key: &str) -> ProviderResult<&str> {
        self.config_str(key)
            .ok_or_else(|| ProviderError::config(key, format!("'{}' is required", key)))
    }

    pub fn config_u64(&self, key: &str) -> Option<u64> {
        match self.config.get(key) {
            Some(Value::Number(number)) => number.as_u64(),
            Some(Value::String(text)) => text.parse().ok(),
            _ => None,
        }
    }

    /// Send a decorated request through the shared client, mirroring any
    /// failure to the event sink as an `http_request_failed` record before
    /// it propagates.
    pub async fn execute(&self, builder: RequestBuilder) -> ProviderResult<Value> {
        match self.http.execute(builder).await {
            Ok(body) => Ok(body),
            Err(error) => {
                self.emit_warn("http_request_failed", json!({ "error": error.to_string() }));
                Err(error)
            }
        }
    }

    /// Like [`execute`](Self::execute) but keeps status and headers, for
    /// login flows that read `Set-Cookie`.
    pub async fn execute_with_headers(&self, builder: RequestBuilder) -> ProviderResult<(u16, HeaderMap, Value)> {
        match self.http.execute_with_headers(builder).await {
            Ok(parts) => Ok(parts),
            Err(error) => {
                self.emit_warn("http_request_failed", json!({ "error": error.to_string() }));
                Err(error)
            }
        }
    }

    /// Synthesize a globally-unique-enough backend resource name. Callers
    /// may override it through the `session_name` option.
    pub fn session_resource_name(&self, user_id: &str, options: &Map<String, Value>) -> String {
        if let Some(name) = options.get("session_name").and_then(Value::as_str)
            && !name.trim().is_empty()
        {
            return name.trim().to_string();
        }
        let suffix: u32 = rand::thread_rng().gen_range(1000..10000);
        format!("sixlab_{}_{}_{}", user_id, Utc::now().timestamp(), suffix)
    }

    /// Emit a lifecycle event to the injected sink. The sink contract is
    /// non-blocking and infallible, so emission never affects the operation.
    pub fn emit(&self, action: &str, level: EventLevel, data: Value) {
        self.events.emit(ProviderEvent::new(self.type_name, action, data, level));
    }

    pub fn emit_info(&self, action: &str, data: Value) {
        self.emit(action, EventLevel::Info, data);
    }

    pub fn emit_warn(&self, action: &str, data: Value) {
        self.emit(action, EventLevel::Warn, data);
    }

    /// Shared `session_created` emission so every provider reports the same
    /// shape.
    pub fn emit_session_created(&self, session: &Session, user_id: &str) {
        self.emit_info(
            "session_created",
            json!({
                "session_id": session.session_id,
                "user_id": user_id,
                "access_url": session.access_url,
            }),
        );
    }
}

/// Classify the delete leg of a destroy. A backend that reports the resource
/// as already absent makes the destroy idempotent-safe, not a failure.
pub(crate) fn classify_destroy_delete(result: ProviderResult<Value>) -> ProviderResult<DestroyOutcome> {
    match result {
        Ok(_) => Ok(DestroyOutcome::Destroyed),
        Err(error) if error.is_not_found() => Ok(DestroyOutcome::AlreadyGone),
        Err(error) => Err(error),
    }
}

/// Triage a failed stop call ahead of the delete leg: a missing resource
/// short-circuits the whole destroy as already gone, anything else leaves
/// the delete to proceed best-effort.
pub(crate) fn classify_destroy_stop_error(error: &ProviderError) -> Option<DestroyOutcome> {
    if error.is_not_found() {
        Some(DestroyOutcome::AlreadyGone)
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sixlab_types::{FieldSchema, NullEventSink};

    fn fields() -> ConfigFields {
        let mut fields = ConfigFields::new();
        fields.insert(
            "server_url".to_string(),
            FieldSchema::url("Server URL").required().rules("required|url"),
        );
        fields.insert(
            "verify_tls".to_string(),
            FieldSchema::checkbox("Verify TLS certificates").default_value(true),
        );
        fields
    }

    fn core_with(config: Map<String, Value>) -> ProviderResult<ProviderCore> {
        ProviderCore::new("gns3", "GNS3", None, &fields(), config, Arc::new(NullEventSink))
    }

    #[derive(Default)]
    struct CapturingSink(std::sync::Mutex<Vec<ProviderEvent>>);

    impl EventSink for CapturingSink {
        fn emit(&self, event: ProviderEvent) {
            self.0.lock().unwrap().push(event);
        }
    }

    #[test]
    fn construction_fails_before_any_network_call_on_bad_config() {
        let error = core_with(Map::new()).err().expect("empty config must fail");
        assert!(matches!(error, ProviderError::Config { .. }));
    }

    #[test]
    fn construction_merges_defaults_under_supplied_config() {
        let mut config = Map::new();
        config.insert("server_url".to_string(), json!("http://gns3.lab:3080"));
        let core = core_with(config).expect("core");
        assert_eq!(core.config().get("verify_tls"), Some(&json!(true)));
    }

    #[test]
    fn display_name_falls_back_to_type_default() {
        let mut config = Map::new();
        config.insert("server_url".to_string(), json!("http://gns3.lab:3080"));
        let core = ProviderCore::new("gns3", "GNS3", Some("Campus lab".to_string()), &fields(), config.clone(), Arc::new(NullEventSink))
            .expect("core");
        assert_eq!(core.display_name(), "Campus lab");

        let core = core_with(config).expect("core");
        assert_eq!(core.display_name(), "GNS3");
    }

    #[test]
    fn resource_names_carry_user_and_stay_unique_enough() {
        let mut config = Map::new();
        config.insert("server_url".to_string(), json!("http://gns3.lab:3080"));
        let core = core_with(config).expect("core");

        let name = core.session_resource_name("7", &Map::new());
        assert!(name.starts_with("sixlab_7_"));

        let other = core.session_resource_name("7", &Map::new());
        // Same second is possible; random suffix keeps the pair distinct.
        assert_ne!(name, other);
    }

    #[test]
    fn session_name_option_overrides_synthesis() {
        let mut config = Map::new();
        config.insert("server_url".to_string(), json!("http://gns3.lab:3080"));
        let core = core_with(config).expect("core");

        let mut options = Map::new();
        options.insert("session_name".to_string(), json!("workshop_a"));
        assert_eq!(core.session_resource_name("7", &options), "workshop_a");
    }

    #[tokio::test]
    async fn failed_request_is_mirrored_to_the_event_sink() {
        let sink = Arc::new(CapturingSink::default());
        let mut config = Map::new();
        // A closed local port fails the connect without leaving the host.
        config.insert("server_url".to_string(), json!("http://127.0.0.1:1"));
        let core = ProviderCore::new("gns3", "GNS3", None, &fields(), config, sink.clone()).expect("core");

        let builder = core.http().request(reqwest::Method::GET, "/v2/version");
        let error = core.execute(builder).await.err().expect("closed port must fail");
        assert!(matches!(error, ProviderError::Transport { .. }));

        let events = sink.0.lock().unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].provider, "gns3");
        assert_eq!(events[0].action, "http_request_failed");
        assert_eq!(events[0].level, EventLevel::Warn);
    }

    #[test]
    fn delete_of_a_missing_resource_counts_as_already_gone() {
        let outcome = classify_destroy_delete(Err(ProviderError::not_found("project 42"))).expect("outcome");
        assert_eq!(outcome, DestroyOutcome::AlreadyGone);
    }

    #[test]
    fn successful_delete_reports_destroyed() {
        let outcome = classify_destroy_delete(Ok(Value::Null)).expect("outcome");
        assert_eq!(outcome, DestroyOutcome::Destroyed);
    }

    #[test]
    fn delete_failure_other_than_missing_propagates() {
        let error = classify_destroy_delete(Err(ProviderError::Protocol {
            status: 500,
            body: String::new(),
        }))
        .err()
        .expect("server error must propagate");
        assert!(matches!(error, ProviderError::Protocol { status: 500, .. }));
    }

    #[test]
    fn stop_failure_on_a_missing_resource_short_circuits_destroy() {
        let gone = classify_destroy_stop_error(&ProviderError::not_found("lab"));
        assert_eq!(gone, Some(DestroyOutcome::AlreadyGone));

        let best_effort = classify_destroy_stop_error(&ProviderError::auth("rejected"));
        assert_eq!(best_effort, None);
    }
}
