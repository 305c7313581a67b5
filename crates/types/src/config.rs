//! Declarative provider configuration schemas and the rule-string validator.
//!
//! Every provider publishes an ordered map of [`FieldSchema`] entries that is
//! used both to render a settings form and to validate a candidate
//! configuration before it reaches the provider. Validation rules are a
//! pipe-delimited list (`required|url`, `required|min:3`), walked in order
//! with the first violated rule short-circuiting.

use indexmap::IndexMap;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use url::Url;

use crate::error::{ProviderError, ProviderResult};

static EMAIL_PATTERN: Lazy<Regex> = Lazy::new(|| Regex::new(r"^[^@\s]+@[^@\s]+\.[^@\s]+$").expect("valid email pattern"));

/// Widget/parse type of a configuration field.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FieldType {
    Text,
    Password,
    Url,
    Number,
    Checkbox,
    Select { options: Vec<String> },
}

/// Declarative description of a single provider configuration field.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FieldSchema {
    pub field_type: FieldType,
    pub label: String,
    #[serde(default)]
    pub default: Value,
    #[serde(default)]
    pub required: bool,
    /// Pipe-delimited rule string: `required`, `min:<n>`, `url`, `email`.
    #[serde(default)]
    pub validation: String,
}

impl FieldSchema {
    pub fn new(field_type: FieldType, label: impl Into<String>) -> Self {
        Self {
            field_type,
            label: label.into(),
            default: Value::Null,
            required: false,
            validation: String::new(),
        }
    }

    pub fn text(label: impl Into<String>) -> Self {
        Self::new(FieldType::Text, label)
    }

    pub fn password(label: impl Into<String>) -> Self {
        Self::new(FieldType::Password, label)
    }

    pub fn url(label: impl Into<String>) -> Self {
        Self::new(FieldType::Url, label)
    }

    pub fn checkbox(label: impl Into<String>) -> Self {
        Self::new(FieldType::Checkbox, label)
    }

    pub fn required(mut self) -> Self {
        self.required = true;
        self
    }

    pub fn default_value(mut self, value: impl Into<Value>) -> Self {
        self.default = value.into();
        self
    }

    pub fn rules(mut self, rules: impl Into<String>) -> Self {
        self.validation = rules.into();
        self
    }
}

/// Ordered field-name → schema map as published by a provider.
pub type ConfigFields = IndexMap<String, FieldSchema>;

/// Merge schema defaults under a caller-supplied configuration.
///
/// Supplied values always win; defaults only fill fields the caller left out
/// entirely (or set to null).
pub fn merge_defaults(fields: &ConfigFields, supplied: Map<String, Value>) -> Map<String, Value> {
    let mut merged = supplied;
    for (name, schema) in fields {
        let missing = match merged.get(name) {
            None | Some(Value::Null) => true,
            _ => false,
        };
        if missing && !schema.default.is_null() {
            merged.insert(name.clone(), schema.default.clone());
        }
    }
    merged
}

/// Collect the schema's non-null defaults into a configuration map. This is
/// what a fresh provider row starts from before the operator edits anything.
pub fn default_config(fields: &ConfigFields) -> Map<String, Value> {
    merge_defaults(fields, Map::new())
}

/// Validate a candidate configuration against a provider's field schemas.
///
/// Required fields are checked first for each field; rule checks then run in
/// the order they appear in the rule string. The first violation
/// short-circuits with a [`ProviderError::Config`] naming the field.
pub fn validate_config(fields: &ConfigFields, candidate: &Map<String, Value>) -> ProviderResult<()> {
    for (name, schema) in fields {
        let value = candidate.get(name);
        let is_empty = match value {
            None | Some(Value::Null) => true,
            Some(Value::String(text)) => text.trim().is_empty(),
            Some(_) => false,
        };

        if schema.required && is_empty {
            return Err(ProviderError::config(name, format!("'{}' is required", schema.label)));
        }

        // Optional fields left empty skip the remaining rules.
        if is_empty {
            continue;
        }
        let value = value.expect("non-empty value present");

        for rule in schema.validation.split('|').filter(|rule| !rule.is_empty()) {
            check_rule(rule, value).map_err(|message| ProviderError::config(name, message))?;
        }
    }
    Ok(())
}

/// Apply a single rule token to a present, non-empty value.
fn check_rule(rule: &str, value: &Value) -> Result<(), String> {
    match rule {
        // Emptiness was already handled before the rule walk.
        "required" => Ok(()),
        "url" => {
            let text = value.as_str().ok_or("must be a URL string")?;
            Url::parse(text).map(|_| ()).map_err(|error| format!("must be a valid URL: {}", error))
        }
        "email" => {
            let text = value.as_str().ok_or("must be an email address")?;
            if EMAIL_PATTERN.is_match(text) {
                Ok(())
            } else {
                Err("must be a valid email address".to_string())
            }
        }
        other => {
            if let Some(bound) = other.strip_prefix("min:") {
                let bound: f64 = bound.parse().map_err(|_| format!("invalid rule '{}'", other))?;
                match value {
                    Value::String(text) => {
                        if (text.chars().count() as f64) < bound {
                            Err(format!("must be at least {} characters", bound))
                        } else {
                            Ok(())
                        }
                    }
                    Value::Number(number) => {
                        let candidate = number.as_f64().unwrap_or(f64::MIN);
                        if candidate < bound {
                            Err(format!("must be at least {}", bound))
                        } else {
                            Ok(())
                        }
                    }
                    _ => Err("min rule applies to strings and numbers".to_string()),
                }
            } else {
                Err(format!("unknown validation rule '{}'", other))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn sample_fields() -> ConfigFields {
        let mut fields = ConfigFields::new();
        fields.insert(
            "server_url".to_string(),
            FieldSchema::url("Server URL").required().rules("required|url"),
        );
        fields.insert(
            "username".to_string(),
            FieldSchema::text("Username").default_value("admin").rules("min:3"),
        );
        fields.insert("contact".to_string(), FieldSchema::text("Contact").rules("email"));
        fields
    }

    fn config(pairs: &[(&str, Value)]) -> Map<String, Value> {
        pairs.iter().map(|(key, value)| (key.to_string(), value.clone())).collect()
    }

    #[test]
    fn missing_required_field_names_the_field() {
        let error = validate_config(&sample_fields(), &config(&[])).unwrap_err();
        match error {
            ProviderError::Config { field, .. } => assert_eq!(field, "server_url"),
            other => panic!("expected config error, got {:?}", other),
        }
    }

    #[test]
    fn empty_string_counts_as_missing_for_required() {
        let candidate = config(&[("server_url", json!("   "))]);
        assert!(validate_config(&sample_fields(), &candidate).is_err());
    }

    #[test]
    fn all_required_fields_with_valid_values_pass() {
        let candidate = config(&[("server_url", json!("http://gns3.lab:3080"))]);
        assert!(validate_config(&sample_fields(), &candidate).is_ok());
    }

    #[test]
    fn rule_violation_short_circuits_with_message() {
        let candidate = config(&[("server_url", json!("not a url"))]);
        let error = validate_config(&sample_fields(), &candidate).unwrap_err();
        assert!(error.to_string().contains("server_url"));
    }

    #[test]
    fn min_rule_applies_to_string_length() {
        let candidate = config(&[("server_url", json!("http://x.lab")), ("username", json!("ab"))]);
        assert!(validate_config(&sample_fields(), &candidate).is_err());
    }

    #[test]
    fn optional_empty_field_skips_rules() {
        let candidate = config(&[("server_url", json!("http://x.lab")), ("contact", json!(""))]);
        assert!(validate_config(&sample_fields(), &candidate).is_ok());
    }

    #[test]
    fn email_rule_rejects_malformed_addresses() {
        let candidate = config(&[("server_url", json!("http://x.lab")), ("contact", json!("not-an-email"))]);
        assert!(validate_config(&sample_fields(), &candidate).is_err());
    }

    #[test]
    fn default_config_keeps_only_fields_with_defaults() {
        let defaults = default_config(&sample_fields());
        assert_eq!(defaults.get("username"), Some(&json!("admin")));
        assert!(defaults.get("server_url").is_none());
        assert!(defaults.get("contact").is_none());
    }

    #[test]
    fn defaults_merge_under_supplied_values() {
        let merged = merge_defaults(&sample_fields(), config(&[("username", json!("operator"))]));
        assert_eq!(merged.get("username"), Some(&json!("operator")));

        let merged = merge_defaults(&sample_fields(), config(&[]));
        assert_eq!(merged.get("username"), Some(&json!("admin")));
        assert!(merged.get("server_url").is_none(), "fields without defaults stay absent");
    }
}
