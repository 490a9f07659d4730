//! Static routing table mapping operation types to gateway endpoints.
//!
//! Loaded once at startup from a YAML file and immutable for the process
//! lifetime:
//!
//! ```yaml
//! routes:
//!   payment:
//!     url: http://localhost:8080/pay
//!     timeout: 30
//! default:
//!   url: http://localhost:8080/api
//!   timeout: 30
//! ```

use std::{collections::HashMap, path::Path};

use eyre::Context as _;
use serde::Deserialize;

/// One gateway endpoint.
#[derive(Debug, Clone, Deserialize)]
pub struct RouteEntry {
    /// The gateway URL the operation is dispatched to.
    pub url: String,
    /// Total end-to-end timeout for the gateway call, in seconds.
    pub timeout: u64,
}

/// The routing table.
#[derive(Debug, Default, Deserialize)]
pub struct RoutingConfig {
    #[serde(default)]
    routes: HashMap<String, RouteEntry>,
    #[serde(rename = "default")]
    default_route: Option<RouteEntry>,
}

impl RoutingConfig {
    /// Loads the routing table from a YAML file.
    pub fn load(path: &Path) -> eyre::Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("routing config file not found: {}", path.display()))?;
        serde_yaml::from_str(&raw).context("invalid YAML in routing config")
    }

    /// Resolves the route for an operation type: exact match first, then the
    /// default route.
    pub fn resolve(&self, operation_type: &str) -> Option<&RouteEntry> {
        self.routes
            .get(operation_type)
            .or(self.default_route.as_ref())
    }

    /// Number of configured (non-default) routes.
    pub fn len(&self) -> usize {
        self.routes.len()
    }

    /// Whether no routes are configured at all.
    pub fn is_empty(&self) -> bool {
        self.routes.is_empty() && self.default_route.is_none()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn table(yaml: &str) -> RoutingConfig {
        serde_yaml::from_str(yaml).expect("valid yaml")
    }

    #[test]
    fn exact_match_wins_over_default() {
        let config = table(
            r"
routes:
  payment:
    url: http://localhost:8080/pay
    timeout: 30
default:
  url: http://localhost:8080/api
  timeout: 10
",
        );
        assert_eq!(
            config.resolve("payment").unwrap().url,
            "http://localhost:8080/pay"
        );
        assert_eq!(
            config.resolve("unknown").unwrap().url,
            "http://localhost:8080/api"
        );
    }

    #[test]
    fn no_default_means_unknown_operations_fail() {
        let config = table(
            r"
routes:
  payment:
    url: http://localhost:8080/pay
    timeout: 30
",
        );
        assert!(config.resolve("unknown").is_none());
        assert_eq!(config.len(), 1);
    }

    #[test]
    fn empty_table_resolves_nothing() {
        let config = RoutingConfig::default();
        assert!(config.is_empty());
        assert!(config.resolve("payment").is_none());
    }
}
