//! Apache Guacamole integration.
//!
//! Guacamole authenticates with a login call that returns a bearer token,
//! cached on the instance and attached to every request as the `token` query
//! parameter. A session is one connection record whose protocol-specific
//! parameter map (rdp/ssh/vnc) comes from the template's `guacamole_config`
//! block. Destroy kills the connection's active sessions before deleting the
//! connection itself.

use std::sync::Arc;

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64;
use chrono::Utc;
use reqwest::Method;
use serde_json::{Map, Value, json};
use tracing::warn;

use async_trait::async_trait;
use sixlab_types::{
    ConfigFields, ConnectionTest, DestroyOutcome, EventSink, FieldSchema, FieldType, ProviderError, ProviderResult, Session,
    SessionDetails, ValidationResult, ValidationStep, features,
};

use crate::auth::{AuthCache, Credential};
use crate::contract::{LabProvider, ProviderCore, classify_destroy_delete};
use crate::validation::GuacamoleCheck;

/// RDP keys that must ship disabled for a stable classroom experience.
const RDP_STABILITY_FLAGS: &[&str] = &[
    "enable-wallpaper",
    "enable-theming",
    "enable-font-smoothing",
    "enable-full-window-drag",
    "enable-desktop-composition",
    "enable-menu-animations",
];

pub struct GuacamoleProvider {
    core: ProviderCore,
    auth: AuthCache,
}

impl GuacamoleProvider {
    pub const TYPE: &'static str = "guacamole";

    pub fn new(display_name: Option<String>, config: Map<String, Value>, events: Arc<dyn EventSink>) -> ProviderResult<Self> {
        let core = ProviderCore::new(Self::TYPE, "Guacamole", display_name, &Self::fields(), config, events)?;
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
            FieldSchema::text("Username").required().rules("required").default_value("guacadmin"),
        );
        fields.insert(
            "password".to_string(),
            FieldSchema::password("Password").required().rules("required"),
        );
        fields.insert(
            "data_source".to_string(),
            FieldSchema::text("Data source").default_value("mysql"),
        );
        fields.insert(
            "parent_identifier".to_string(),
            FieldSchema::text("Connection group").default_value("ROOT"),
        );
        fields.insert(
            "verify_tls".to_string(),
            FieldSchema::checkbox("Verify TLS certificates").default_value(true),
        );
        fields.insert(
            "max_concurrent_sessions".to_string(),
            FieldSchema::new(FieldType::Number, "Max concurrent sessions")
                .default_value(20)
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

    fn data_source(&self) -> &str {
        self.core.config_str("data_source").unwrap_or("mysql")
    }

    async fn login(&self) -> ProviderResult<Credential> {
        let username = self.core.require_str("username")?;
        let password = self.core.require_str("password")?;

        let builder = self
            .core
            .http()
            .request(Method::POST, "/api/tokens")
            .form(&[("username", username), ("password", password)]);
        let body = self.core.execute(builder).await?;

        body.get("authToken")
            .and_then(Value::as_str)
            .map(|token| Credential::Bearer(token.to_string()))
            .ok_or_else(|| ProviderError::auth("login response carried no authToken"))
    }

    async fn send_with_token(&self, credential: &Credential, method: Method, path: &str, body: Option<&Value>) -> ProviderResult<Value> {
        let mut builder = self
            .core
            .http()
            .request(method, path)
            .query(&[("token", credential.secret())]);
        if let Some(body) = body {
            builder = builder.json(body);
        }
        self.core.execute(builder).await
    }

    /// Authenticated call with the obtain-once/retry-once token policy.
    async fn authed_call(&self, method: Method, path: &str, body: Option<&Value>) -> ProviderResult<Value> {
        let credential = self.auth.get_or_obtain(|| self.login()).await?;
        match self.send_with_token(&credential, method.clone(), path, body).await {
            Err(error) if error.is_auth_rejection() => {
                self.auth.invalidate().await;
                let credential = self.auth.get_or_obtain(|| self.login()).await?;
                self.send_with_token(&credential, method, path, body).await
            }
            other => other,
        }
    }

    fn connections_path(&self) -> String {
        format!("/api/session/data/{}/connections", self.data_source())
    }

    fn connection_path(&self, connection_id: &str) -> String {
        format!("{}/{}", self.connections_path(), connection_id)
    }

    async fn access_url(&self, connection_id: &str) -> ProviderResult<String> {
        let credential = self.auth.get_or_obtain(|| self.login()).await?;
        let identifier = client_identifier(connection_id, self.data_source());
        Ok(format!(
            "{}/#/client/{}?token={}",
            self.core.http().base_url(),
            identifier,
            credential.secret()
        ))
    }
}

#[async_trait]
impl LabProvider for GuacamoleProvider {
    fn type_name(&self) -> &'static str {
        Self::TYPE
    }

    fn display_name(&self) -> &str {
        self.core.display_name()
    }

    fn description(&self) -> &'static str {
        "Remote desktop sessions through Apache Guacamole: every session is a connection streamed to the browser."
    }

    fn config_fields(&self) -> ConfigFields {
        Self::fields()
    }

    fn supported_features(&self) -> &'static [&'static str] {
        &[
            features::CONSOLE_ACCESS,
            features::RECORDING_SUPPORT,
            features::COLLABORATION_SUPPORT,
            features::FILE_TRANSFER,
        ]
    }

    fn core(&self) -> &ProviderCore {
        &self.core
    }

    async fn test_connection(&self) -> ConnectionTest {
        match self.authed_call(Method::GET, &self.connections_path(), None).await {
            Ok(_) => ConnectionTest::ok("Guacamole server is reachable"),
            Err(error) => ConnectionTest::failed(error.to_string()),
        }
    }

    async fn create_session(&self, user_id: &str, template: &Value, options: &Map<String, Value>) -> ProviderResult<Session> {
        let block = template
            .get("guacamole_config")
            .ok_or_else(|| ProviderError::unsupported("a guacamole session needs a template with a guacamole_config block"))?;
        let protocol = block
            .get("protocol")
            .and_then(Value::as_str)
            .ok_or_else(|| ProviderError::unsupported("a guacamole_config block without a 'protocol'"))?;
        let parameters = protocol_parameters(protocol, block)?;

        let resource_name = self.core.session_resource_name(user_id, options);
        let parent = self.core.config_str("parent_identifier").unwrap_or("ROOT");
        let created = self
            .authed_call(
                Method::POST,
                &self.connections_path(),
                Some(&json!({
                    "parentIdentifier": parent,
                    "name": resource_name,
                    "protocol": protocol,
                    "parameters": parameters,
                    "attributes": { "max-connections": "1", "max-connections-per-user": "1" },
                })),
            )
            .await?;

        let connection_id = match created.get("identifier") {
            Some(Value::String(id)) => id.clone(),
            Some(Value::Number(id)) => id.to_string(),
            _ => return Err(ProviderError::unexpected("connection create response carried no identifier")),
        };

        let mut metadata = Map::new();
        metadata.insert("resource_name".to_string(), json!(resource_name));
        metadata.insert("protocol".to_string(), json!(protocol));
        metadata.insert("data_source".to_string(), json!(self.data_source()));
        let session = Session {
            access_url: self.access_url(&connection_id).await?,
            session_id: connection_id,
            created_at: Utc::now(),
            metadata,
        };
        self.core.emit_session_created(&session, user_id);
        Ok(session)
    }

    async fn get_session(&self, session_id: &str) -> ProviderResult<SessionDetails> {
        let body = self.authed_call(Method::GET, &self.connection_path(session_id), None).await?;
        let active = body.get("activeConnections").and_then(Value::as_u64).unwrap_or(0);
        let metadata = body.as_object().cloned().unwrap_or_default();
        Ok(SessionDetails {
            session_id: session_id.to_string(),
            status: if active > 0 { "active".to_string() } else { "idle".to_string() },
            metadata,
        })
    }

    async fn update_session(&self, session_id: &str, config_data: &Map<String, Value>) -> ProviderResult<bool> {
        self.authed_call(
            Method::PUT,
            &self.connection_path(session_id),
            Some(&Value::Object(config_data.clone())),
        )
        .await?;
        Ok(true)
    }

    async fn validate_step(&self, _session_id: &str, step: &ValidationStep, _validation_data: &Value) -> ProviderResult<ValidationResult> {
        let check: GuacamoleCheck = step.validation_type.parse()?;
        // Guest-side inspection needs an in-VM agent that is not wired up
        // yet; every check reports the displayable placeholder.
        Ok(ValidationResult::unimplemented(check.as_str(), step.max_score))
    }

    async fn destroy_session(&self, session_id: &str) -> ProviderResult<DestroyOutcome> {
        // Kill live desktop sessions first so the delete does not strand
        // them; failures here are logged, not fatal.
        let active_path = format!("/api/session/data/{}/activeConnections", self.data_source());
        match self.authed_call(Method::GET, &active_path, None).await {
            Ok(Value::Object(active)) => {
                for (uuid, record) in &active {
                    let belongs = record.get("connectionIdentifier").and_then(Value::as_str) == Some(session_id);
                    if !belongs {
                        continue;
                    }
                    if let Err(error) = self.authed_call(Method::DELETE, &format!("{}/{}", active_path, uuid), None).await {
                        warn!(session_id = %session_id, uuid = %uuid, error = %error, "active connection kill failed");
                        self.core
                            .emit_warn("session_stop_failed", json!({ "session_id": session_id, "error": error.to_string() }));
                    }
                }
            }
            Ok(_) => {}
            Err(error) => {
                warn!(session_id = %session_id, error = %error, "active connection listing failed");
                self.core
                    .emit_warn("session_stop_failed", json!({ "session_id": session_id, "error": error.to_string() }));
            }
        }

        let delete = self.authed_call(Method::DELETE, &self.connection_path(session_id), None).await;
        let outcome = classify_destroy_delete(delete)?;
        if outcome == DestroyOutcome::Destroyed {
            self.core.emit_info("session_destroyed", json!({ "session_id": session_id }));
        }
        Ok(outcome)
    }

    async fn session_url(&self, session_id: &str, _user_id: &str) -> ProviderResult<String> {
        self.access_url(session_id).await
    }
}

/// Encode a connection id into the identifier the Guacamole client URL
/// expects: base64 over `{id}\0c\0{data_source}`.
fn client_identifier(connection_id: &str, data_source: &str) -> String {
    BASE64.encode(format!("{}\0c\0{}", connection_id, data_source))
}

/// Map a `guacamole_config` block into the protocol-specific parameter map.
///
/// Every value is a string, the shape Guacamole's REST API expects. An empty
/// username is allowed (the learner types one at the prompt); a missing
/// hostname is not.
fn protocol_parameters(protocol: &str, block: &Value) -> ProviderResult<Map<String, Value>> {
    let default_port = match protocol {
        "rdp" => 3389u64,
        "ssh" => 22,
        "vnc" => 5900,
        other => return Err(ProviderError::unsupported(format!("protocol '{}' in a guacamole_config block", other))),
    };

    let hostname = block.get("hostname").and_then(Value::as_str).unwrap_or("");
    if hostname.is_empty() {
        return Err(ProviderError::config(
            "hostname",
            format!("'hostname' is required for {} connections", protocol),
        ));
    }
    let port = block.get("port").and_then(Value::as_u64).unwrap_or(default_port);
    let username = block.get("username").and_then(Value::as_str).unwrap_or("");
    let password = block.get("password").and_then(Value::as_str).unwrap_or("");

    let mut parameters = Map::new();
    parameters.insert("hostname".to_string(), json!(hostname));
    parameters.insert("port".to_string(), json!(port.to_string()));

    match protocol {
        "rdp" => {
            parameters.insert("username".to_string(), json!(username));
            parameters.insert("password".to_string(), json!(password));
            parameters.insert("security".to_string(), json!("any"));
            parameters.insert("ignore-cert".to_string(), json!("true"));
            for flag in RDP_STABILITY_FLAGS {
                parameters.insert(flag.to_string(), json!("false"));
            }
        }
        "ssh" => {
            parameters.insert("username".to_string(), json!(username));
            parameters.insert("password".to_string(), json!(password));
        }
        "vnc" => {
            parameters.insert("password".to_string(), json!(password));
        }
        _ => unreachable!("protocol checked above"),
    }
    Ok(parameters)
}

#[cfg(test)]
mod tests {
    use super::*;
    use sixlab_types::NullEventSink;

    fn provider() -> GuacamoleProvider {
        let mut config = Map::new();
        config.insert("server_url".to_string(), json!("https://guac.lab"));
        config.insert("password".to_string(), json!("guacadmin"));
        GuacamoleProvider::new(None, config, Arc::new(NullEventSink)).expect("provider")
    }

    #[test]
    fn rdp_map_allows_empty_username_and_disables_stability_flags() {
        let block = json!({ "hostname": "10.0.0.5" });
        let parameters = protocol_parameters("rdp", &block).expect("parameters");

        assert_eq!(parameters.get("username"), Some(&json!("")));
        assert_eq!(parameters.get("port"), Some(&json!("3389")));
        assert_eq!(parameters.get("security"), Some(&json!("any")));
        assert_eq!(parameters.get("ignore-cert"), Some(&json!("true")));
        for flag in RDP_STABILITY_FLAGS {
            assert_eq!(parameters.get(*flag), Some(&json!("false")), "flag {} must be disabled", flag);
        }
    }

    #[test]
    fn ssh_and_vnc_get_their_default_ports() {
        let block = json!({ "hostname": "10.0.0.5", "username": "student" });
        let ssh = protocol_parameters("ssh", &block).expect("ssh parameters");
        assert_eq!(ssh.get("port"), Some(&json!("22")));
        assert_eq!(ssh.get("username"), Some(&json!("student")));

        let vnc = protocol_parameters("vnc", &block).expect("vnc parameters");
        assert_eq!(vnc.get("port"), Some(&json!("5900")));
        assert!(vnc.get("username").is_none(), "vnc has no username parameter");
    }

    #[test]
    fn explicit_port_overrides_the_default() {
        let block = json!({ "hostname": "10.0.0.5", "port": 2222 });
        let parameters = protocol_parameters("ssh", &block).expect("parameters");
        assert_eq!(parameters.get("port"), Some(&json!("2222")));
    }

    #[test]
    fn unknown_protocol_is_a_typed_unsupported_error() {
        let block = json!({ "hostname": "10.0.0.5" });
        let error = protocol_parameters("telnet", &block).unwrap_err();
        assert!(matches!(error, ProviderError::Unsupported { .. }));
        assert!(error.to_string().contains("telnet"));
    }

    #[test]
    fn missing_hostname_is_rejected() {
        let error = protocol_parameters("rdp", &json!({})).unwrap_err();
        assert!(matches!(error, ProviderError::Config { ref field, .. } if field == "hostname"));
    }

    #[test]
    fn client_identifier_encodes_id_and_datasource() {
        assert_eq!(client_identifier("3", "mysql"), "MwBjAG15c3Fs");
    }

    #[tokio::test]
    async fn create_without_guacamole_config_is_unsupported() {
        let error = provider()
            .create_session("7", &Value::Null, &Map::new())
            .await
            .unwrap_err();
        assert!(matches!(error, ProviderError::Unsupported { .. }));
    }

    #[tokio::test]
    async fn unknown_validation_type_is_unsupported() {
        let step = ValidationStep {
            validation_type: "routing_table".to_string(),
            expected_result: None,
            max_score: 10.0,
        };
        let error = provider().validate_step("3", &step, &Value::Null).await.unwrap_err();
        assert!(matches!(error, ProviderError::Unsupported { .. }));
    }

    #[test]
    fn advertises_recording_and_collaboration() {
        let provider = provider();
        let capabilities = provider.capabilities();
        assert!(capabilities.supports_recording);
        assert!(capabilities.supports_collaboration);
        assert!(!capabilities.supports_snapshots);
        assert_eq!(capabilities.max_concurrent_sessions, 20);
    }
}
