//! Validation-step dispatch.
//!
//! Each provider declares the checks it can grade as a tagged enum parsed
//! from the caller-supplied `validation_type` string. Parsing happens before
//! any handler runs, so an unrecognized key is a typed
//! [`ProviderError::Unsupported`] rather than a silent no-op — template
//! authors supply these keys dynamically and UIs need to render "not
//! available" for keys a provider does not grade.

use std::str::FromStr;

use sixlab_types::ProviderError;

/// Checks the GNS3 integration dispatches on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Gns3Check {
    InterfaceConfiguration,
    RoutingTable,
    PingTest,
}

impl Gns3Check {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::InterfaceConfiguration => "interface_configuration",
            Self::RoutingTable => "routing_table",
            Self::PingTest => "ping_test",
        }
    }
}

impl FromStr for Gns3Check {
    type Err = ProviderError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "interface_configuration" => Ok(Self::InterfaceConfiguration),
            "routing_table" => Ok(Self::RoutingTable),
            "ping_test" => Ok(Self::PingTest),
            other => Err(unsupported_check("gns3", other)),
        }
    }
}

/// Checks the EVE-NG integration dispatches on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EvengCheck {
    NodeConfiguration,
    NetworkConnectivity,
    RoutingProtocol,
}

impl EvengCheck {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::NodeConfiguration => "node_configuration",
            Self::NetworkConnectivity => "network_connectivity",
            Self::RoutingProtocol => "routing_protocol",
        }
    }
}

impl FromStr for EvengCheck {
    type Err = ProviderError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "node_configuration" => Ok(Self::NodeConfiguration),
            "network_connectivity" => Ok(Self::NetworkConnectivity),
            "routing_protocol" => Ok(Self::RoutingProtocol),
            other => Err(unsupported_check("eveng", other)),
        }
    }
}

/// Checks the Guacamole integration dispatches on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GuacamoleCheck {
    Screenshot,
    FileExists,
    ProcessRunning,
}

impl GuacamoleCheck {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Screenshot => "screenshot",
            Self::FileExists => "file_exists",
            Self::ProcessRunning => "process_running",
        }
    }
}

impl FromStr for GuacamoleCheck {
    type Err = ProviderError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "screenshot" => Ok(Self::Screenshot),
            "file_exists" => Ok(Self::FileExists),
            "process_running" => Ok(Self::ProcessRunning),
            other => Err(unsupported_check("guacamole", other)),
        }
    }
}

fn unsupported_check(provider: &str, validation_type: &str) -> ProviderError {
    ProviderError::unsupported(format!("validation type '{}' for the {} provider", validation_type, provider))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn known_keys_parse_for_each_provider() {
        assert_eq!("ping_test".parse::<Gns3Check>().unwrap(), Gns3Check::PingTest);
        assert_eq!("routing_protocol".parse::<EvengCheck>().unwrap(), EvengCheck::RoutingProtocol);
        assert_eq!("file_exists".parse::<GuacamoleCheck>().unwrap(), GuacamoleCheck::FileExists);
    }

    #[test]
    fn unknown_key_is_a_typed_unsupported_error() {
        let error = "packet_capture".parse::<Gns3Check>().unwrap_err();
        assert!(matches!(error, ProviderError::Unsupported { .. }));
        assert!(error.to_string().contains("packet_capture"));
    }

    #[test]
    fn keys_do_not_cross_providers() {
        assert!("ping_test".parse::<GuacamoleCheck>().is_err());
        assert!("screenshot".parse::<EvengCheck>().is_err());
    }

    #[test]
    fn as_str_round_trips() {
        for check in [Gns3Check::InterfaceConfiguration, Gns3Check::RoutingTable, Gns3Check::PingTest] {
            assert_eq!(check.as_str().parse::<Gns3Check>().unwrap(), check);
        }
    }
}
