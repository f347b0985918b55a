//! APIRule CRD: exposes a service on a host through a gateway
//!
//! An APIRule lists rules (path + methods + access strategies + mutators) and
//! is translated into a VirtualService plus either Oathkeeper access rules
//! or Istio RequestAuthentications and AuthorizationPolicies.

use kube::CustomResource;
use schemars::gen::SchemaGenerator;
use schemars::schema::{InstanceType, Schema, SchemaObject};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use super::status::ApiRuleStatus;

// =============================================================================
// CRD
// =============================================================================

/// Spec for an APIRule
#[derive(CustomResource, Clone, Debug, Deserialize, Serialize, JsonSchema, PartialEq)]
#[kube(
    group = "gateway.kyma-project.io",
    version = "v1beta1",
    kind = "APIRule",
    plural = "apirules",
    namespaced,
    status = "ApiRuleStatus",
    printcolumn = r#"{"name":"Status","type":"string","jsonPath":".status.APIRuleStatus.code"}"#,
    printcolumn = r#"{"name":"Host","type":"string","jsonPath":".spec.host"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct ApiRuleSpec {
    /// Host the service is exposed on; qualified with the default domain when
    /// it contains no dot
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub host: Option<String>,

    /// Backend service used by rules without their own service
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub service: Option<Service>,

    /// Istio gateway in `namespace/name` form
    pub gateway: String,

    /// Exposure rules, evaluated in order
    #[serde(default)]
    pub rules: Vec<Rule>,

    /// Route timeout in seconds for all rules
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout: Option<u32>,
}

/// An APIRule resource
pub type ApiRule = APIRule;

/// Backend service reference
#[derive(Clone, Debug, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Service {
    /// Service name
    pub name: String,
    /// Service namespace (defaults to the APIRule namespace)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub namespace: Option<String>,
    /// Service port
    pub port: u32,
}

/// A single exposure rule
#[derive(Clone, Debug, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Rule {
    /// Path regex
    pub path: String,
    /// Service overriding the spec-level one
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub service: Option<Service>,
    /// Allowed HTTP methods
    #[serde(default)]
    pub methods: Vec<String>,
    /// Authenticators protecting the path
    #[serde(default)]
    pub access_strategies: Vec<Authenticator>,
    /// Request mutators
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub mutators: Vec<Mutator>,
    /// Route timeout in seconds, overrides the spec-level timeout
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout: Option<u32>,
}

/// Named handler with opaque configuration
#[derive(Clone, Debug, Deserialize, Serialize, JsonSchema, PartialEq)]
pub struct Handler {
    /// Handler name (e.g. "jwt", "noop", "header")
    #[serde(rename = "handler")]
    pub name: String,
    /// Handler configuration, decoded per handler kind
    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[schemars(schema_with = "preserve_unknown_fields")]
    pub config: Option<serde_json::Value>,
}

/// Access strategy of a rule
pub type Authenticator = Handler;

/// Request mutator of a rule
pub type Mutator = Handler;

fn preserve_unknown_fields(_: &mut SchemaGenerator) -> Schema {
    let mut schema = SchemaObject {
        instance_type: Some(InstanceType::Object.into()),
        ..Default::default()
    };
    schema.extensions.insert(
        "x-kubernetes-preserve-unknown-fields".to_string(),
        serde_json::Value::Bool(true),
    );
    Schema::Object(schema)
}

// =============================================================================
// Resolution helpers
// =============================================================================

impl Handler {
    /// Handler without configuration
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            config: None,
        }
    }

    /// Handler with configuration
    pub fn with_config(name: impl Into<String>, config: serde_json::Value) -> Self {
        Self {
            name: name.into(),
            config: Some(config),
        }
    }

    /// True when the config is absent, `null` or `{}`
    pub fn config_is_empty(&self) -> bool {
        match &self.config {
            None | Some(serde_json::Value::Null) => true,
            Some(serde_json::Value::Object(map)) => map.is_empty(),
            Some(_) => false,
        }
    }
}

impl ApiRuleSpec {
    /// Service a rule routes to: the rule-level service, else the spec-level one
    pub fn effective_service<'a>(&'a self, rule: &'a Rule) -> Option<&'a Service> {
        rule.service.as_ref().or(self.service.as_ref())
    }

    /// Namespace of a rule's service: rule service > spec service > APIRule namespace
    pub fn service_namespace<'a>(&'a self, rule: &'a Rule, api_rule_namespace: &'a str) -> &'a str {
        rule.service
            .as_ref()
            .and_then(|s| s.namespace.as_deref())
            .or_else(|| self.service.as_ref().and_then(|s| s.namespace.as_deref()))
            .unwrap_or(api_rule_namespace)
    }

    /// Route timeout for a rule: rule > spec > `default_secs`
    pub fn effective_timeout(&self, rule: &Rule, default_secs: u32) -> u32 {
        rule.timeout.or(self.timeout).unwrap_or(default_secs)
    }
}

/// Whether `host` already carries a domain (contains a dot)
pub fn host_includes_domain(host: &str) -> bool {
    host.contains('.')
}

/// Qualify `host` with `default_domain` unless it already has a domain
pub fn host_with_domain(host: &str, default_domain: &str) -> String {
    if host_includes_domain(host) || default_domain.is_empty() {
        host.to_string()
    } else {
        format!("{host}.{default_domain}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use kube::CustomResourceExt;

    fn service(name: &str, namespace: Option<&str>) -> Service {
        Service {
            name: name.to_string(),
            namespace: namespace.map(String::from),
            port: 8000,
        }
    }

    fn rule(path: &str) -> Rule {
        Rule {
            path: path.to_string(),
            service: None,
            methods: vec!["GET".to_string()],
            access_strategies: vec![Handler::named("noop")],
            mutators: vec![],
            timeout: None,
        }
    }

    fn valid_spec() -> ApiRuleSpec {
        ApiRuleSpec {
            host: Some("httpbin".to_string()),
            service: Some(service("httpbin", None)),
            gateway: "kyma-system/kyma-gateway".to_string(),
            rules: vec![rule("/headers")],
            timeout: None,
        }
    }

    #[test]
    fn spec_round_trips_through_yaml_shape() {
        let spec: ApiRuleSpec = serde_json::from_value(serde_json::json!({
            "host": "httpbin",
            "gateway": "kyma-system/kyma-gateway",
            "service": {"name": "httpbin", "port": 8000},
            "rules": [{
                "path": "/.*",
                "methods": ["GET"],
                "accessStrategies": [{"handler": "jwt", "config": {"authentications": []}}],
                "mutators": [{"handler": "header", "config": {"headers": {"X-A": "b"}}}]
            }]
        }))
        .unwrap();
        assert_eq!(spec.rules[0].access_strategies[0].name, "jwt");
        assert!(spec.rules[0].access_strategies[0].config.is_some());
        assert_eq!(spec.rules[0].mutators[0].name, "header");
    }

    #[test]
    fn rule_service_overrides_spec_service() {
        let mut spec = valid_spec();
        assert_eq!(spec.effective_service(&spec.rules[0]).unwrap().name, "httpbin");

        spec.rules[0].service = Some(service("other", Some("other-ns")));
        let r = spec.rules[0].clone();
        assert_eq!(spec.effective_service(&r).unwrap().name, "other");
        assert_eq!(spec.service_namespace(&r, "default"), "other-ns");
    }

    #[test]
    fn service_namespace_falls_back_to_api_rule_namespace() {
        let mut spec = valid_spec();
        let r = spec.rules[0].clone();
        assert_eq!(spec.service_namespace(&r, "default"), "default");

        spec.service = Some(service("httpbin", Some("backend")));
        assert_eq!(spec.service_namespace(&r, "default"), "backend");
    }

    #[test]
    fn timeout_precedence_rule_then_spec_then_default() {
        let mut spec = valid_spec();
        let mut r = spec.rules[0].clone();
        assert_eq!(spec.effective_timeout(&r, 180), 180);

        spec.timeout = Some(20);
        assert_eq!(spec.effective_timeout(&r, 180), 20);

        r.timeout = Some(10);
        assert_eq!(spec.effective_timeout(&r, 180), 10);
    }

    #[test]
    fn host_is_qualified_only_without_domain() {
        assert_eq!(host_with_domain("httpbin", "local.kyma.dev"), "httpbin.local.kyma.dev");
        assert_eq!(host_with_domain("httpbin.example.com", "local.kyma.dev"), "httpbin.example.com");
        assert_eq!(host_with_domain("httpbin", ""), "httpbin");
    }

    #[test]
    fn empty_config_detection() {
        assert!(Handler::named("jwt").config_is_empty());
        assert!(Handler::with_config("jwt", serde_json::Value::Null).config_is_empty());
        assert!(Handler::with_config("jwt", serde_json::json!({})).config_is_empty());
        assert!(!Handler::with_config("jwt", serde_json::json!({"a": 1})).config_is_empty());
    }

    #[test]
    fn crd_marks_handler_config_as_free_form() {
        let crd = serde_json::to_value(ApiRule::crd()).unwrap();
        let text = crd.to_string();
        assert!(text.contains("x-kubernetes-preserve-unknown-fields"));
        assert_eq!(crd["spec"]["names"]["kind"], "APIRule");
        assert_eq!(crd["spec"]["group"], "gateway.kyma-project.io");
    }
}
