//! Reconciliation configuration
//!
//! Operator-wide settings are fixed at startup. The JWT handler mode is read
//! from the `api-gateway-config` ConfigMap on every reconcile, and both are
//! combined into an immutable [`ReconciliationConfig`] handed to validators,
//! builders and processors.

use std::collections::BTreeMap;

use serde::Deserialize;

use crate::resources::{CorsPolicy, StringMatch};
use crate::{Error, Result};

/// Config key holding the handler mode
const JWT_HANDLER_KEY: &str = "jwtHandler";

/// Enforcement stack selected by the mode ConfigMap
#[derive(Clone, Copy, Debug, Default, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum JwtHandler {
    /// Proxy mode: Oathkeeper access rules
    #[default]
    Ory,
    /// Mesh mode: Istio RequestAuthentications and AuthorizationPolicies
    Istio,
}

impl std::fmt::Display for JwtHandler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            JwtHandler::Ory => write!(f, "ory"),
            JwtHandler::Istio => write!(f, "istio"),
        }
    }
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct ModeConfig {
    jwt_handler: String,
}

impl JwtHandler {
    /// Parse the mode from the ConfigMap data value.
    ///
    /// `None` (ConfigMap or key absent) selects the default mode.
    pub fn from_config_map_data(data: Option<&str>) -> Result<Self> {
        let Some(raw) = data else {
            return Ok(JwtHandler::default());
        };

        let config: ModeConfig = serde_yaml::from_str(raw).map_err(|e| {
            Error::config(JWT_HANDLER_KEY, format!("cannot parse mode configuration: {e}"))
        })?;

        match config.jwt_handler.as_str() {
            "ory" => Ok(JwtHandler::Ory),
            "istio" => Ok(JwtHandler::Istio),
            other => Err(Error::config(
                JWT_HANDLER_KEY,
                format!("unsupported JWT handler: {other}"),
            )),
        }
    }
}

/// Operator-wide settings, fixed for the lifetime of the process
#[derive(Clone, Debug, PartialEq)]
pub struct OperatorSettings {
    /// Domain appended to hosts without one (empty = none)
    pub default_domain_name: String,
    /// CORS policy applied to every route
    pub cors: CorsPolicy,
    /// Oathkeeper proxy service host
    pub oathkeeper_service: String,
    /// Oathkeeper proxy service port
    pub oathkeeper_port: u32,
    /// Services that may not be exposed, by namespace
    pub service_blocklist: BTreeMap<String, Vec<String>>,
    /// Domains fully qualified hosts must belong to (empty = any)
    pub domain_allowlist: Vec<String>,
    /// Hosts that may not be exposed
    pub host_blocklist: Vec<String>,
    /// Labels added to every generated resource
    pub additional_labels: BTreeMap<String, String>,
}

impl Default for OperatorSettings {
    fn default() -> Self {
        Self {
            default_domain_name: String::new(),
            cors: default_cors_policy(),
            oathkeeper_service: "ory-oathkeeper-proxy.kyma-system.svc.cluster.local".to_string(),
            oathkeeper_port: 4455,
            service_blocklist: BTreeMap::from([
                ("default".to_string(), vec!["kubernetes".to_string()]),
                ("kube-system".to_string(), vec!["kube-dns".to_string()]),
            ]),
            domain_allowlist: Vec::new(),
            host_blocklist: Vec::new(),
            additional_labels: BTreeMap::new(),
        }
    }
}

/// CORS policy used when no flags override it
pub fn default_cors_policy() -> CorsPolicy {
    CorsPolicy {
        allow_origins: vec![StringMatch::Regex(".*".to_string())],
        allow_methods: ["GET", "POST", "PUT", "DELETE", "PATCH"]
            .iter()
            .map(|m| m.to_string())
            .collect(),
        allow_headers: ["Authorization", "Content-Type", "*"]
            .iter()
            .map(|h| h.to_string())
            .collect(),
    }
}

/// Parse `svc.namespace` entries into a namespace -> services map
pub fn parse_service_blocklist(entries: &[String]) -> Result<BTreeMap<String, Vec<String>>> {
    let mut result: BTreeMap<String, Vec<String>> = BTreeMap::new();
    for entry in entries.iter().map(|e| e.trim()).filter(|e| !e.is_empty()) {
        let (service, namespace) = match entry.split_once('.') {
            Some((s, ns)) if is_dns_label(s) && is_dns_label(ns) => (s, ns),
            _ => {
                return Err(Error::config(
                    "service-blocklist",
                    format!("invalid service entry '{entry}', expected <service>.<namespace>"),
                ))
            }
        };
        result
            .entry(namespace.to_string())
            .or_default()
            .push(service.to_string());
    }
    Ok(result)
}

/// Parse `key=value` entries into a label map
pub fn parse_labels(entries: &[String]) -> Result<BTreeMap<String, String>> {
    entries
        .iter()
        .map(|e| e.trim())
        .filter(|e| !e.is_empty())
        .map(|entry| match entry.split_once('=') {
            Some((k, v)) if !k.is_empty() => Ok((k.to_string(), v.to_string())),
            _ => Err(Error::config(
                "additional-labels",
                format!("invalid label '{entry}', expected <key>=<value>"),
            )),
        })
        .collect()
}

/// Parse `regex:<re>`, `prefix:<p>` or `exact:<s>` entries into origin matches
pub fn parse_cors_origins(entries: &[String]) -> Result<Vec<StringMatch>> {
    entries
        .iter()
        .map(|e| e.trim())
        .filter(|e| !e.is_empty())
        .map(|entry| match entry.split_once(':') {
            Some(("regex", v)) => Ok(StringMatch::Regex(v.to_string())),
            Some(("prefix", v)) => Ok(StringMatch::Prefix(v.to_string())),
            Some(("exact", v)) => Ok(StringMatch::Exact(v.to_string())),
            _ => Err(Error::config(
                "cors-allow-origins",
                format!("invalid origin '{entry}', expected regex:, prefix: or exact:"),
            )),
        })
        .collect()
}

fn is_dns_label(s: &str) -> bool {
    !s.is_empty()
        && s.chars()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-')
        && !s.starts_with('-')
        && !s.ends_with('-')
}

/// Everything one reconcile needs to know about the environment
#[derive(Clone, Debug, PartialEq)]
pub struct ReconciliationConfig {
    /// Active mode
    pub mode: JwtHandler,
    /// Operator-wide settings
    pub settings: OperatorSettings,
}

impl ReconciliationConfig {
    /// Combine settings with the mode read for this reconcile
    pub fn new(mode: JwtHandler, settings: OperatorSettings) -> Self {
        Self { mode, settings }
    }

    /// True in mesh (Istio) mode
    pub fn is_mesh(&self) -> bool {
        self.mode == JwtHandler::Istio
    }

    /// Fully qualified Oathkeeper host
    pub fn oathkeeper_host(&self) -> &str {
        &self.settings.oathkeeper_service
    }
}
