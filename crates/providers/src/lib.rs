//! Lab-backend provider integrations.
//!
//! Every supported backend (GNS3, EVE-NG, Guacamole) implements the
//! [`LabProvider`] contract on top of a shared [`ProviderCore`], hiding three
//! incompatible authentication flows and resource models behind one session
//! lifecycle with consistent error semantics and cleanup guarantees.

use std::sync::Arc;

use serde_json::{Map, Value};
use tracing::{error, info, warn};

use sixlab_types::{EventLevel, EventSink, ProviderError, ProviderEvent, ProviderResult};

pub mod auth;
pub mod contract;
pub mod eveng;
pub mod gns3;
pub mod guacamole;
pub mod validation;

pub use auth::{AuthCache, Credential};
pub use contract::{LabProvider, ProviderCore};
pub use eveng::EvengProvider;
pub use gns3::Gns3Provider;
pub use guacamole::GuacamoleProvider;

/// Provider type identifiers accepted by [`build_provider`].
pub const PROVIDER_TYPES: &[&str] = &[Gns3Provider::TYPE, EvengProvider::TYPE, GuacamoleProvider::TYPE];

/// Construct a provider instance from a stored configuration row.
///
/// This is the seam the session orchestrator's registry plugs into: it keeps
/// opaque rows (`type`, optional display name, flat config map) and hands
/// them here to get a live adapter back. Unknown types are a typed
/// unsupported error so admin UIs can render them as unavailable.
pub fn build_provider(
    provider_type: &str,
    display_name: Option<String>,
    config: Map<String, Value>,
    events: Arc<dyn EventSink>,
) -> ProviderResult<Box<dyn LabProvider>> {
    match provider_type {
        Gns3Provider::TYPE => Ok(Box::new(Gns3Provider::new(display_name, config, events)?)),
        EvengProvider::TYPE => Ok(Box::new(EvengProvider::new(display_name, config, events)?)),
        GuacamoleProvider::TYPE => Ok(Box::new(GuacamoleProvider::new(display_name, config, events)?)),
        other => Err(ProviderError::unsupported(format!("provider type '{}'", other))),
    }
}

/// Event sink that forwards lifecycle events to `tracing`.
///
/// Used when no external collector is injected; emission is synchronous,
/// infallible, and never blocks on a downstream consumer.
#[derive(Debug, Default)]
pub struct TracingEventSink;

impl EventSink for TracingEventSink {
    fn emit(&self, event: ProviderEvent) {
        let data = event.data.to_string();
        match event.level {
            EventLevel::Info => info!(provider = %event.provider, action = %event.action, data = %data, "provider event"),
            EventLevel::Warn => warn!(provider = %event.provider, action = %event.action, data = %data, "provider event"),
            EventLevel::Error => error!(provider = %event.provider, action = %event.action, data = %data, "provider event"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use sixlab_types::NullEventSink;

    fn config(server_url: &str) -> Map<String, Value> {
        let mut config = Map::new();
        config.insert("server_url".to_string(), json!(server_url));
        config.insert("password".to_string(), json!("secret"));
        config
    }

    #[test]
    fn factory_builds_each_known_type() {
        for provider_type in PROVIDER_TYPES {
            let provider = build_provider(provider_type, None, config("http://backend.lab"), Arc::new(NullEventSink))
                .unwrap_or_else(|error| panic!("{} should build: {}", provider_type, error));
            assert_eq!(&provider.type_name(), provider_type);
        }
    }

    #[test]
    fn factory_rejects_unknown_type_with_typed_error() {
        let error = build_provider("packet_tracer", None, Map::new(), Arc::new(NullEventSink))
            .err()
            .expect("unknown type must fail");
        assert!(matches!(error, ProviderError::Unsupported { .. }));
    }

    #[test]
    fn factory_surfaces_config_errors_before_any_network_call() {
        let error = build_provider("eveng", None, Map::new(), Arc::new(NullEventSink))
            .err()
            .expect("empty eveng config must fail");
        assert!(matches!(error, ProviderError::Config { .. }));
    }

    #[test]
    fn display_name_passes_through_the_factory() {
        let provider = build_provider("gns3", Some("Campus rack".to_string()), config("http://gns3.lab:3080"), Arc::new(NullEventSink))
            .expect("provider");
        assert_eq!(provider.display_name(), "Campus rack");
    }
}
