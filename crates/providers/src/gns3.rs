//! GNS3 integration.
//!
//! GNS3 exposes a flat project model over a token-less REST API with optional
//! HTTP basic auth attached per request (nothing to cache). Each session is
//! one project; the topology inside it comes from a local JSON template file
//! with node and link definitions.

use std::sync::Arc;

use chrono::Utc;
use reqwest::{Method, RequestBuilder};
use serde_json::{Map, Value, json};
use tokio::time::{Duration, sleep};
use tracing::warn;

use async_trait::async_trait;
use sixlab_types::{
    ConfigFields, ConnectionTest, DestroyOutcome, EventSink, FieldSchema, ProviderError, ProviderResult, Session, SessionDetails,
    ValidationResult, ValidationStep, features,
};

use crate::contract::{LabProvider, ProviderCore, classify_destroy_delete, classify_destroy_stop_error};
use crate::validation::Gns3Check;

/// How long destroy waits for nodes to report `stopped` before deleting the
/// project anyway. Bounded poll instead of a fixed sleep; same worst case.
const STOP_SETTLE_BOUND: Duration = Duration::from_secs(2);
const STOP_POLL_INTERVAL: Duration = Duration::from_millis(250);

pub struct Gns3Provider {
    core: ProviderCore,
}

impl Gns3Provider {
    pub const TYPE: &'static str = "gns3";

    pub fn new(display_name: Option<String>, config: Map<String, Value>, events: Arc<dyn EventSink>) -> ProviderResult<Self> {
        let core = ProviderCore::new(Self::TYPE, "GNS3", display_name, &Self::fields(), config, events)?;
        Ok(Self { core })
    }

    fn fields() -> ConfigFields {
        let mut fields = ConfigFields::new();
        fields.insert(
            "server_url".to_string(),
            FieldSchema::url("Server URL")
                .required()
                .rules("required|url")
                .default_value("http://localhost:3080"),
        );
        fields.insert("username".to_string(), FieldSchema::text("Username"));
        fields.insert("password".to_string(), FieldSchema::password("Password"));
        fields.insert("web_gui_url".to_string(), FieldSchema::url("Web UI URL").rules("url"));
        fields.insert(
            "verify_tls".to_string(),
            FieldSchema::checkbox("Verify TLS certificates").default_value(true),
        );
        fields.insert(
            "max_concurrent_sessions".to_string(),
            FieldSchema::new(sixlab_types::FieldType::Number, "Max concurrent sessions")
                .default_value(10)
                .rules("min:1"),
        );
        fields.insert(
            "session_timeout".to_string(),
            FieldSchema::new(sixlab_types::FieldType::Number, "Session timeout (seconds)")
                .default_value(3600)
                .rules("min:60"),
        );
        fields
    }

    /// Attach optional basic auth; GNS3 carries credentials per request.
    fn request(&self, method: Method, path: &str) -> RequestBuilder {
        let mut builder = self.core.http().request(method, path);
        if let Some(username) = self.core.config_str("username")
            && !username.is_empty()
        {
            builder = builder.basic_auth(username, self.core.config_str("password"));
        }
        builder
    }

    async fn call(&self, method: Method, path: &str, body: Option<&Value>) -> ProviderResult<Value> {
        let mut builder = self.request(method, path);
        if let Some(body) = body {
            builder = builder.json(body);
        }
        self.core.execute(builder).await
    }

    fn project_path(project_id: &str) -> String {
        format!("/v2/projects/{}", project_id)
    }

    fn access_url(&self, project_id: &str) -> String {
        let base = self
            .core
            .config_str("web_gui_url")
            .filter(|url| !url.is_empty())
            .unwrap_or_else(|| self.core.http().base_url());
        format!("{}/static/web-ui/server/1/project/{}", base.trim_end_matches('/'), project_id)
    }

    /// Load the node/link definitions from a local JSON template file into a
    /// freshly created project.
    async fn load_template(&self, project_id: &str, template: &Value) -> ProviderResult<()> {
        let path = template
            .get("path")
            .and_then(Value::as_str)
            .ok_or_else(|| ProviderError::unsupported("a gns3_template block without a 'path'"))?;

        let raw = tokio::fs::read_to_string(path)
            .await
            .map_err(|_| ProviderError::not_found(format!("template file '{}'", path)))?;
        let topology: Value = serde_json::from_str(&raw)
            .map_err(|error| ProviderError::config("template", format!("template '{}' is not valid JSON: {}", path, error)))?;

        if let Some(nodes) = topology.get("nodes").and_then(Value::as_array) {
            for node in nodes {
                self.call(Method::POST, &format!("{}/nodes", Self::project_path(project_id)), Some(node))
                    .await?;
            }
        }
        if let Some(links) = topology.get("links").and_then(Value::as_array) {
            for link in links {
                self.call(Method::POST, &format!("{}/links", Self::project_path(project_id)), Some(link))
                    .await?;
            }
        }
        Ok(())
    }

    /// Poll node status until everything reports `stopped`, bounded by
    /// [`STOP_SETTLE_BOUND`]. Observation failures fall through to delete.
    async fn wait_for_nodes_stopped(&self, project_id: &str) {
        let deadline = tokio::time::Instant::now() + STOP_SETTLE_BOUND;
        loop {
            match self.call(Method::GET, &format!("{}/nodes", Self::project_path(project_id)), None).await {
                Ok(Value::Array(nodes)) => {
                    let all_stopped = nodes
                        .iter()
                        .all(|node| node.get("status").and_then(Value::as_str) == Some("stopped"));
                    if all_stopped {
                        return;
                    }
                }
                _ => return,
            }
            if tokio::time::Instant::now() >= deadline {
                return;
            }
            sleep(STOP_POLL_INTERVAL).await;
        }
    }

    fn check_interface_configuration(&self, check: Gns3Check, step: &ValidationStep) -> ValidationResult {
        // Telnet console scraping is not wired up yet.
        ValidationResult::unimplemented(check.as_str(), step.max_score)
    }

    fn check_routing_table(&self, check: Gns3Check, step: &ValidationStep) -> ValidationResult {
        ValidationResult::unimplemented(check.as_str(), step.max_score)
    }

    fn check_ping(&self, check: Gns3Check, step: &ValidationStep) -> ValidationResult {
        ValidationResult::unimplemented(check.as_str(), step.max_score)
    }
}

#[async_trait]
impl LabProvider for Gns3Provider {
    fn type_name(&self) -> &'static str {
        Self::TYPE
    }

    fn display_name(&self) -> &str {
        self.core.display_name()
    }

    fn description(&self) -> &'static str {
        "Network simulation with GNS3: every session is a dedicated project with its own emulated topology."
    }

    fn config_fields(&self) -> ConfigFields {
        Self::fields()
    }

    fn supported_features(&self) -> &'static [&'static str] {
        &[features::MULTI_NODE, features::CONSOLE_ACCESS, features::SNAPSHOT_SUPPORT]
    }

    fn core(&self) -> &ProviderCore {
        &self.core
    }

    async fn test_connection(&self) -> ConnectionTest {
        match self.call(Method::GET, "/v2/version", None).await {
            Ok(body) => match body.get("version").and_then(Value::as_str) {
                Some(version) => ConnectionTest::ok_with_version("GNS3 server is reachable", version),
                None => ConnectionTest::ok("GNS3 server is reachable"),
            },
            Err(error) => ConnectionTest::failed(error.to_string()),
        }
    }

    async fn create_session(&self, user_id: &str, template: &Value, options: &Map<String, Value>) -> ProviderResult<Session> {
        let resource_name = self.core.session_resource_name(user_id, options);
        let created = self
            .call(Method::POST, "/v2/projects", Some(&json!({ "name": resource_name })))
            .await?;
        let project_id = created
            .get("project_id")
            .and_then(Value::as_str)
            .ok_or_else(|| ProviderError::unexpected("project create response carried no project_id"))?
            .to_string();

        if let Some(template_block) = template.get("gns3_template") {
            if let Err(error) = self.load_template(&project_id, template_block).await {
                // Compensating rollback: the just-created project must not
                // survive a failed template load.
                if let Err(cleanup_error) = self.call(Method::DELETE, &Self::project_path(&project_id), None).await {
                    warn!(project_id = %project_id, error = %cleanup_error, "rollback delete failed");
                }
                return Err(error);
            }
            self.core.emit_info("template_loaded", json!({ "session_id": project_id }));
        }

        let mut metadata = Map::new();
        metadata.insert("resource_name".to_string(), json!(resource_name));
        let session = Session {
            access_url: self.access_url(&project_id),
            session_id: project_id,
            created_at: Utc::now(),
            metadata,
        };
        self.core.emit_session_created(&session, user_id);
        Ok(session)
    }

    async fn get_session(&self, session_id: &str) -> ProviderResult<SessionDetails> {
        let body = self.call(Method::GET, &Self::project_path(session_id), None).await?;
        let status = body.get("status").and_then(Value::as_str).unwrap_or("unknown").to_string();
        let metadata = body.as_object().cloned().unwrap_or_default();
        Ok(SessionDetails {
            session_id: session_id.to_string(),
            status,
            metadata,
        })
    }

    async fn update_session(&self, session_id: &str, config_data: &Map<String, Value>) -> ProviderResult<bool> {
        self.call(
            Method::PUT,
            &Self::project_path(session_id),
            Some(&Value::Object(config_data.clone())),
        )
        .await?;
        Ok(true)
    }

    async fn validate_step(&self, _session_id: &str, step: &ValidationStep, _validation_data: &Value) -> ProviderResult<ValidationResult> {
        let check: Gns3Check = step.validation_type.parse()?;
        Ok(match check {
            Gns3Check::InterfaceConfiguration => self.check_interface_configuration(check, step),
            Gns3Check::RoutingTable => self.check_routing_table(check, step),
            Gns3Check::PingTest => self.check_ping(check, step),
        })
    }

    async fn destroy_session(&self, session_id: &str) -> ProviderResult<DestroyOutcome> {
        let project_path = Self::project_path(session_id);

        match self.call(Method::POST, &format!("{}/nodes/stop", project_path), None).await {
            Ok(_) => self.wait_for_nodes_stopped(session_id).await,
            Err(error) => {
                if let Some(outcome) = classify_destroy_stop_error(&error) {
                    return Ok(outcome);
                }
                // Best-effort shutdown; a stop failure never blocks deletion.
                warn!(session_id = %session_id, error = %error, "node stop failed before delete");
                self.core
                    .emit_warn("session_stop_failed", json!({ "session_id": session_id, "error": error.to_string() }));
            }
        }

        let outcome = classify_destroy_delete(self.call(Method::DELETE, &project_path, None).await)?;
        if outcome == DestroyOutcome::Destroyed {
            self.core.emit_info("session_destroyed", json!({ "session_id": session_id }));
        }
        Ok(outcome)
    }

    async fn session_url(&self, session_id: &str, _user_id: &str) -> ProviderResult<String> {
        Ok(self.access_url(session_id))
    }
}
