//! EVE-NG integration.
//!
//! EVE-NG authenticates with a login call that returns a session cookie,
//! cached on the instance for its lifetime. Labs live as `.unl` files inside
//! folders, so a session id is the composite `folder/name.unl` path.
//! Deployments commonly run with self-signed certificates; TLS verification
//! is therefore off by default here and configurable per provider.

use std::sync::Arc;

use chrono::Utc;
use reqwest::Method;
use reqwest::header::{self, HeaderMap};
use serde_json::{Map, Value, json};
use tokio::time::{Duration, sleep};
use tracing::warn;

use async_trait::async_trait;
use sixlab_types::{
    ConfigFields, ConnectionTest, DestroyOutcome, EventSink, FieldSchema, FieldType, ProviderError, ProviderResult, Session,
    SessionDetails, ValidationResult, ValidationStep, features,
};

use crate::auth::{AuthCache, Credential};
use crate::contract::{LabProvider, ProviderCore, classify_destroy_delete, classify_destroy_stop_error};
use crate::validation::EvengCheck;

/// Fixed settle delay between stopping nodes and deleting the lab file.
/// EVE-NG has no cheap "all nodes stopped" probe, so the blunt wait stays.
const STOP_SETTLE_DELAY: Duration = Duration::from_secs(2);

pub struct EvengProvider {
    core: ProviderCore,
    auth: AuthCache,
}

impl EvengProvider {
    pub const TYPE: &'static str = "eveng";

    pub fn new(display_name: Option<String>, config: Map<String, Value>, events: Arc<dyn EventSink>) -> ProviderResult<Self> {
        let core = ProviderCore::new(Self::TYPE, "EVE-NG", display_name, &Self::fields(), config, events)?;
        Ok(Self {
            core,
            auth: AuthCache::new(),
        })
    }

    fn fields() -> ConfigFields {
        let mut fields = ConfigFields::new();
        fields.insert(
            "server_url".to_string(),
            FieldSchema::url("Server URL").required().rules("required|url"),
        );
        fields.insert(
            "username".to_string(),
            FieldSchema::text("Username").required().rules("required").default_value("admin"),
        );
        fields.insert(
            "password".to_string(),
            FieldSchema::password("Password").required().rules("required"),
        );
        fields.insert(
            "lab_folder".to_string(),
            FieldSchema::text("Lab folder").default_value("/sixlab"),
        );
        // Self-signed certificates are the norm on EVE-NG boxes.
        fields.insert(
            "verify_tls".to_string(),
            FieldSchema::checkbox("Verify TLS certificates").default_value(false),
        );
        fields.insert(
            "max_concurrent_sessions".to_string(),
            FieldSchema::new(FieldType::Number, "Max concurrent sessions")
                .default_value(10)
                .rules("min:1"),
        );
        fields.insert(
            "session_timeout".to_string(),
            FieldSchema::new(FieldType::Number, "Session timeout (seconds)")
                .default_value(3600)
                .rules("min:60"),
        );
        fields
    }

    async fn login(&self) -> ProviderResult<Credential> {
        let username = self.core.require_str("username")?;
        let password = self.core.require_str("password")?;

        let builder = self
            .core
            .http()
            .request(Method::POST, "/api/auth/login")
            .json(&json!({ "username": username, "password": password, "html5": -1 }));
        let (_, headers, _) = self.core.execute_with_headers(builder).await?;

        extract_session_cookie(&headers)
            .map(Credential::Cookie)
            .ok_or_else(|| ProviderError::auth("login succeeded but returned no session cookie"))
    }

    async fn send_with_cookie(&self, credential: &Credential, method: Method, path: &str, body: Option<&Value>) -> ProviderResult<Value> {
        let mut builder = self
            .core
            .http()
            .request(method, path)
            .header(header::COOKIE, credential.secret());
        if let Some(body) = body {
            builder = builder.json(body);
        }
        self.core.execute(builder).await
    }

    /// Authenticated call with the obtain-once/retry-once credential policy:
    /// a rejection with a cached cookie invalidates it and retries exactly
    /// once after a fresh login.
    async fn authed_call(&self, method: Method, path: &str, body: Option<&Value>) -> ProviderResult<Value> {
        let credential = self.auth.get_or_obtain(|| self.login()).await?;
        match self.send_with_cookie(&credential, method.clone(), path, body).await {
            Err(error) if error.is_auth_rejection() => {
                self.auth.invalidate().await;
                let credential = self.auth.get_or_obtain(|| self.login()).await?;
                self.send_with_cookie(&credential, method, path, body).await
            }
            other => other,
        }
    }

    fn lab_api_path(session_id: &str) -> ProviderResult<String> {
        let (folder, file) = split_session_id(session_id)?;
        if folder == "/" {
            Ok(format!("/api/labs/{}", file))
        } else {
            Ok(format!("/api/labs{}/{}", folder, file))
        }
    }

    fn access_url(&self, session_id: &str) -> String {
        format!("{}/#/lab/view/{}", self.core.http().base_url(), session_id)
    }

    /// Load a local template into the lab: the template JSON is rendered to
    /// a UNL XML body inline and imported into the lab's folder.
    async fn load_template(&self, session_id: &str, template: &Value) -> ProviderResult<()> {
        let path = template
            .get("path")
            .and_then(Value::as_str)
            .ok_or_else(|| ProviderError::unsupported("an eveng_template block without a 'path'"))?;

        let raw = tokio::fs::read_to_string(path)
            .await
            .map_err(|_| ProviderError::not_found(format!("template file '{}'", path)))?;
        let topology: Value = serde_json::from_str(&raw)
            .map_err(|error| ProviderError::config("template", format!("template '{}' is not valid JSON: {}", path, error)))?;

        let (folder, file) = split_session_id(session_id)?;
        let lab_name = file.trim_end_matches(".unl");
        let unl = render_unl(lab_name, &topology);

        self.authed_call(
            Method::POST,
            "/api/import",
            Some(&json!({ "path": folder, "name": file, "data": unl })),
        )
        .await?;
        Ok(())
    }
}

#[async_trait]
impl LabProvider for EvengProvider {
    fn type_name(&self) -> &'static str {
        Self::TYPE
    }

    fn display_name(&self) -> &str {
        self.core.display_name()
    }

    fn description(&self) -> &'static str {
        "Network emulation with EVE-NG: every session is a lab file provisioned inside a folder on the server."
    }

    fn config_fields(&self) -> ConfigFields {
        Self::fields()
    }

    fn supported_features(&self) -> &'static [&'static str] {
        &[features::MULTI_NODE, features::CONSOLE_ACCESS]
    }

    fn core(&self) -> &ProviderCore {
        &self.core
    }

    async fn test_connection(&self) -> ConnectionTest {
        match self.authed_call(Method::GET, "/api/status", None).await {
            Ok(body) => {
                let version = body
                    .get("data")
                    .and_then(|data| data.get("version"))
                    .and_then(Value::as_str);
                match version {
                    Some(version) => ConnectionTest::ok_with_version("EVE-NG server is reachable", version),
                    None => ConnectionTest::ok("EVE-NG server is reachable"),
                }
            }
            Err(error) => ConnectionTest::failed(error.to_string()),
        }
    }

    async fn create_session(&self, user_id: &str, template: &Value, options: &Map<String, Value>) -> ProviderResult<Session> {
        let resource_name = self.core.session_resource_name(user_id, options);
        let folder = self.core.config_str("lab_folder").unwrap_or("/sixlab").trim_end_matches('/').to_string();

        self.authed_call(
            Method::POST,
            "/api/labs",
            Some(&json!({
                "path": if folder.is_empty() { "/" } else { folder.as_str() },
                "name": resource_name,
                "version": "1",
                "description": format!("SixLab session for user {}", user_id),
            })),
        )
        .await?;

        let session_id = if folder.is_empty() {
            format!("{}.unl", resource_name)
        } else {
            format!("{}/{}.unl", folder.trim_start_matches('/'), resource_name)
        };

        if let Some(template_block) = template.get("eveng_template") {
            if let Err(error) = self.load_template(&session_id, template_block).await {
                // The just-created lab must not survive a failed import.
                if let Ok(lab_path) = Self::lab_api_path(&session_id) {
                    if let Err(cleanup_error) = self.authed_call(Method::DELETE, &lab_path, None).await {
                        warn!(session_id = %session_id, error = %cleanup_error, "rollback delete failed");
                    }
                }
                return Err(error);
            }
            self.core.emit_info("template_loaded", json!({ "session_id": session_id }));
        }

        let mut metadata = Map::new();
        metadata.insert("resource_name".to_string(), json!(resource_name));
        metadata.insert("folder".to_string(), json!(folder));
        let session = Session {
            access_url: self.access_url(&session_id),
            session_id,
            created_at: Utc::now(),
            metadata,
        };
        self.core.emit_session_created(&session, user_id);
        Ok(session)
    }

    async fn get_session(&self, session_id: &str) -> ProviderResult<SessionDetails> {
        let body = self.authed_call(Method::GET, &Self::lab_api_path(session_id)?, None).await?;
        let metadata = body
            .get("data")
            .and_then(Value::as_object)
            .cloned()
            .unwrap_or_default();
        Ok(SessionDetails {
            session_id: session_id.to_string(),
            status: "available".to_string(),
            metadata,
        })
    }

    async fn update_session(&self, session_id: &str, config_data: &Map<String, Value>) -> ProviderResult<bool> {
        self.authed_call(
            Method::PUT,
            &Self::lab_api_path(session_id)?,
            Some(&Value::Object(config_data.clone())),
        )
        .await?;
        Ok(true)
    }

    async fn validate_step(&self, _session_id: &str, step: &ValidationStep, _validation_data: &Value) -> ProviderResult<ValidationResult> {
        let check: EvengCheck = step.validation_type.parse()?;
        // All three checks need console scraping that is not wired up yet;
        // the placeholder result is the documented displayable outcome.
        Ok(ValidationResult::unimplemented(check.as_str(), step.max_score))
    }

    async fn destroy_session(&self, session_id: &str) -> ProviderResult<DestroyOutcome> {
        let lab_path = Self::lab_api_path(session_id)?;

        match self.authed_call(Method::GET, &format!("{}/nodes/stop", lab_path), None).await {
            Ok(_) => sleep(STOP_SETTLE_DELAY).await,
            Err(error) => {
                if let Some(outcome) = classify_destroy_stop_error(&error) {
                    return Ok(outcome);
                }
                warn!(session_id = %session_id, error = %error, "node stop failed before delete");
                self.core
                    .emit_warn("session_stop_failed", json!({ "session_id": session_id, "error": error.to_string() }));
            }
        }

        let outcome = classify_destroy_delete(self.authed_call(Method::DELETE, &lab_path, None).await)?;
        if outcome == DestroyOutcome::Destroyed {
            self.core.emit_info("session_destroyed", json!({ "session_id": session_id }));
        }
        Ok(outcome)
    }

    async fn session_url(&self, session_id: &str, _user_id: &str) -> ProviderResult<String> {
        // Validates the id shape even though the URL needs no network call.
        let _ = split_session_id(session_id)?;
        Ok(self.access_url(session_id))
    }
}

/// Split a `folder/name.unl` session id into its folder path and file name.
/// Nested folders keep their full path.
fn split_session_id(session_id: &str) -> ProviderResult<(String, String)> {
    let trimmed = session_id.trim_matches('/');
    if trimmed.is_empty() || !trimmed.ends_with(".unl") {
        return Err(ProviderError::unsupported(format!(
            "session id '{}' (expected 'folder/name.unl')",
            session_id
        )));
    }
    match trimmed.rsplit_once('/') {
        Some((folder, file)) => Ok((format!("/{}", folder), file.to_string())),
        None => Ok(("/".to_string(), trimmed.to_string())),
    }
}

/// Render a lab topology as a UNL XML body.
fn render_unl(lab_name: &str, topology: &Value) -> String {
    let mut xml = String::new();
    xml.push_str("<?xml version=\"1.0\" standalone=\"yes\"?>\n");
    xml.push_str(&format!(
        "<lab name=\"{}\" version=\"1\" scripttimeout=\"300\" lock=\"0\">\n  <topology>\n",
        xml_escape(lab_name)
    ));

    if let Some(nodes) = topology.get("nodes").and_then(Value::as_array) {
        for (index, node) in nodes.iter().enumerate() {
            let name = node.get("name").and_then(Value::as_str).unwrap_or("node");
            let node_type = node.get("type").and_then(Value::as_str).unwrap_or("qemu");
            let template = node.get("template").and_then(Value::as_str).unwrap_or("");
            let image = node.get("image").and_then(Value::as_str).unwrap_or("");
            xml.push_str(&format!(
                "    <node id=\"{}\" name=\"{}\" type=\"{}\" template=\"{}\" image=\"{}\"/>\n",
                index + 1,
                xml_escape(name),
                xml_escape(node_type),
                xml_escape(template),
                xml_escape(image)
            ));
        }
    }
    if let Some(networks) = topology.get("networks").and_then(Value::as_array) {
        for (index, network) in networks.iter().enumerate() {
            let name = network.get("name").and_then(Value::as_str).unwrap_or("net");
            let network_type = network.get("type").and_then(Value::as_str).unwrap_or("bridge");
            xml.push_str(&format!(
                "    <network id=\"{}\" name=\"{}\" type=\"{}\"/>\n",
                index + 1,
                xml_escape(name),
                xml_escape(network_type)
            ));
        }
    }

    xml.push_str("  </topology>\n</lab>\n");
    xml
}

fn xml_escape(value: &str) -> String {
    value
        .replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
}

/// Pull the session cookie pairs out of a login response.
fn extract_session_cookie(headers: &HeaderMap) -> Option<String> {
    let pairs: Vec<String> = headers
        .get_all(header::SET_COOKIE)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .filter_map(|cookie| cookie.split(';').next())
        .map(|pair| pair.trim().to_string())
        .filter(|pair| !pair.is_empty())
        .collect();
    if pairs.is_empty() { None } else { Some(pairs.join("; ")) }
}

#[cfg(test)]
mod tests {
    use super::*;
    use reqwest::header::HeaderValue;
    use sixlab_types::NullEventSink;

    fn provider() -> EvengProvider {
        let mut config = Map::new();
        config.insert("server_url".to_string(), json!("https://eve.lab"));
        config.insert("password".to_string(), json!("eve"));
        EvengProvider::new(None, config, Arc::new(NullEventSink)).expect("provider")
    }

    #[test]
    fn session_id_splits_on_last_slash() {
        assert_eq!(
            split_session_id("sixlab/user7.unl").unwrap(),
            ("/sixlab".to_string(), "user7.unl".to_string())
        );
        assert_eq!(
            split_session_id("a/b/lab.unl").unwrap(),
            ("/a/b".to_string(), "lab.unl".to_string())
        );
        assert_eq!(split_session_id("lab.unl").unwrap(), ("/".to_string(), "lab.unl".to_string()));
    }

    #[test]
    fn session_id_without_unl_suffix_is_rejected() {
        assert!(split_session_id("sixlab/user7").is_err());
        assert!(split_session_id("").is_err());
    }

    #[test]
    fn lab_api_path_embeds_the_folder() {
        assert_eq!(
            EvengProvider::lab_api_path("sixlab/user7.unl").unwrap(),
            "/api/labs/sixlab/user7.unl"
        );
        assert_eq!(EvengProvider::lab_api_path("lab.unl").unwrap(), "/api/labs/lab.unl");
    }

    #[test]
    fn username_default_merges_and_password_stays_required() {
        let provider = provider();
        assert_eq!(provider.core().config_str("username"), Some("admin"));

        let mut config = Map::new();
        config.insert("server_url".to_string(), json!("https://eve.lab"));
        let error = EvengProvider::new(None, config, Arc::new(NullEventSink))
            .err()
            .expect("missing password must fail");
        assert!(matches!(error, ProviderError::Config { ref field, .. } if field == "password"));
    }

    #[test]
    fn tls_verification_defaults_off_for_this_provider() {
        assert_eq!(provider().core().config().get("verify_tls"), Some(&json!(false)));
    }

    #[test]
    fn rendered_unl_lists_nodes_and_networks() {
        let topology = json!({
            "nodes": [
                { "name": "R1", "type": "qemu", "template": "vios", "image": "vios-adventerprisek9" },
                { "name": "R2 <core>", "type": "qemu" }
            ],
            "networks": [ { "name": "LAN", "type": "bridge" } ]
        });
        let unl = render_unl("user7", &topology);
        assert!(unl.contains("<lab name=\"user7\""));
        assert!(unl.contains("name=\"R1\""));
        assert!(unl.contains("name=\"R2 &lt;core&gt;\""));
        assert!(unl.contains("<network id=\"1\" name=\"LAN\""));
        assert!(unl.ends_with("</lab>\n"));
    }

    #[test]
    fn login_cookie_joins_all_set_cookie_pairs() {
        let mut headers = HeaderMap::new();
        headers.append(header::SET_COOKIE, HeaderValue::from_static("unetlab_session=abc123; path=/; HttpOnly"));
        headers.append(header::SET_COOKIE, HeaderValue::from_static("html5=-1; path=/"));
        assert_eq!(
            extract_session_cookie(&headers).as_deref(),
            Some("unetlab_session=abc123; html5=-1")
        );
    }

    #[test]
    fn missing_set_cookie_yields_none() {
        assert!(extract_session_cookie(&HeaderMap::new()).is_none());
    }

    #[tokio::test]
    async fn unknown_validation_type_is_unsupported() {
        let step = ValidationStep {
            validation_type: "ping_test".to_string(),
            expected_result: None,
            max_score: 5.0,
        };
        let error = provider().validate_step("sixlab/a.unl", &step, &Value::Null).await.unwrap_err();
        assert!(matches!(error, ProviderError::Unsupported { .. }));
    }

    #[tokio::test]
    async fn known_check_returns_placeholder_within_bounds() {
        let step = ValidationStep {
            validation_type: "routing_protocol".to_string(),
            expected_result: None,
            max_score: 5.0,
        };
        let result = provider().validate_step("sixlab/a.unl", &step, &Value::Null).await.expect("result");
        assert!(result.score >= 0.0 && result.score <= result.max_score);
        assert!(!result.passed);
    }
}
