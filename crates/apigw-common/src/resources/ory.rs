//! Oathkeeper access rule (`oathkeeper.ory.sh/v1alpha1` Rule)

use serde::{Deserialize, Serialize};

use super::{impl_managed_resource, ResourceKind};
use crate::crd::Handler;
use crate::kube_utils::{HasApiResource, ObjectMeta};

/// Oathkeeper access rule protecting one path of an APIRule
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct AccessRule {
    /// API version
    #[serde(default = "AccessRule::default_api_version")]
    pub api_version: String,
    /// Kind
    #[serde(default = "AccessRule::default_kind")]
    pub kind: String,
    /// Metadata
    pub metadata: ObjectMeta,
    /// Spec
    pub spec: AccessRuleSpec,
}

impl HasApiResource for AccessRule {
    const API_VERSION: &'static str = "oathkeeper.ory.sh/v1alpha1";
    const KIND: &'static str = "Rule";
}

impl_managed_resource!(AccessRule, AccessRuleSpec, ResourceKind::AccessRule);

/// Access rule spec
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct AccessRuleSpec {
    /// Where matching requests are forwarded
    pub upstream: Upstream,
    /// Which requests the rule applies to
    #[serde(rename = "match")]
    pub matcher: Match,
    /// Authenticators, tried in order
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub authenticators: Vec<Handler>,
    /// Authorizer
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub authorizer: Option<Handler>,
    /// Mutators, applied in order
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub mutators: Vec<Handler>,
}

/// Upstream target
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Upstream {
    /// Upstream URL
    pub url: String,
    /// Forward the original Host header
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub preserve_host: Option<bool>,
    /// Path prefix stripped before forwarding
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub strip_path: Option<String>,
}

/// Request matcher: URL pattern plus methods
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct Match {
    /// URL pattern, regex parts in angle brackets
    pub url: String,
    /// HTTP methods
    #[serde(default)]
    pub methods: Vec<String>,
}

impl AccessRuleSpec {
    /// Diff key of a rule: match URL plus sorted methods
    pub fn key(&self) -> String {
        let mut methods = self.matcher.methods.clone();
        methods.sort();
        format!("{}:{}", self.matcher.url, methods.join(","))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resources::ManagedResource;

    fn spec(methods: &[&str]) -> AccessRuleSpec {
        AccessRuleSpec {
            upstream: Upstream {
                url: "http://httpbin.default.svc.cluster.local:8000".to_string(),
                preserve_host: None,
                strip_path: None,
            },
            matcher: Match {
                url: "<http|https>://httpbin.local.kyma.dev</headers>".to_string(),
                methods: methods.iter().map(|m| m.to_string()).collect(),
            },
            authenticators: vec![Handler::named("noop")],
            authorizer: Some(Handler::named("allow")),
            mutators: vec![],
        }
    }

    #[test]
    fn key_ignores_method_order() {
        assert_eq!(spec(&["POST", "GET"]).key(), spec(&["GET", "POST"]).key());
        assert_ne!(spec(&["GET"]).key(), spec(&["POST"]).key());
    }

    #[test]
    fn access_rule_wire_format() {
        let rule = AccessRule::new(ObjectMeta::generated("httpbin-", "default"), spec(&["GET"]));
        let json = serde_json::to_value(&rule).unwrap();
        assert_eq!(json["apiVersion"], "oathkeeper.ory.sh/v1alpha1");
        assert_eq!(json["kind"], "Rule");
        assert_eq!(json["spec"]["match"]["methods"][0], "GET");
        assert_eq!(json["spec"]["authorizer"]["handler"], "allow");
        assert_eq!(json["spec"]["authenticators"][0]["handler"], "noop");
        assert!(json["spec"].get("mutators").is_none());
    }

    #[test]
    fn set_spec_keeps_identity() {
        let mut rule: AccessRule = serde_json::from_value(serde_json::json!({
            "metadata": {"name": "httpbin-abc12", "namespace": "default", "resourceVersion": "7"},
            "spec": serde_json::to_value(spec(&["GET"])).unwrap()
        }))
        .unwrap();
        rule.set_spec(spec(&["GET", "POST"]));
        assert_eq!(rule.metadata().name, "httpbin-abc12");
        assert_eq!(rule.spec().matcher.methods.len(), 2);
    }
}
