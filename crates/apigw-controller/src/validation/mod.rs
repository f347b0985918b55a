//! APIRule validation
//!
//! [`ApiRuleValidator::validate`] runs every check against an APIRule and
//! collects all failures; no check stops the others. Each failure names the
//! offending attribute with a path mirroring the spec structure, e.g.
//! `.spec.rules[0].accessStrategies[1].handler`.
//!
//! Checks:
//! - host: presence, domain, allow list, block list, occupancy
//! - services: presence per rule, block list
//! - rules: presence, duplicate path/method pairs, issuer consistency
//! - access strategies: support per mode, exclusivity, secure/insecure mix,
//!   handler configuration, sidecar injection
//! - mutators and timeouts
//!
//! Only the sidecar injection check reads from the cluster.

mod access_strategy;
mod host;
mod injection;
mod jwt;
mod mutators;
mod rules;
mod timeout;

use kube::ResourceExt;
use tracing::debug;

use apigw_common::crd::ApiRule;
use apigw_common::resources::VirtualService;
use apigw_common::ReconciliationConfig;

use crate::client::GatewayKubeClient;
use crate::workload::WorkloadSelectors;

/// One validation problem
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Failure {
    /// Path of the offending attribute
    pub attribute_path: String,
    /// What is wrong with it
    pub message: String,
}

impl Failure {
    /// Create a failure
    pub fn new(attribute_path: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            attribute_path: attribute_path.into(),
            message: message.into(),
        }
    }
}

impl std::fmt::Display for Failure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Attribute \"{}\": {}", self.attribute_path, self.message)
    }
}

/// Cluster state the validator reads
pub struct ValidationContext<'a> {
    /// Mode and operator settings
    pub config: &'a ReconciliationConfig,
    /// Read-only cluster access for the sidecar injection check
    pub client: &'a dyn GatewayKubeClient,
    /// All VirtualServices, for host occupancy
    pub virtual_services: &'a [VirtualService],
    /// Workload selectors of the exposed services
    pub selectors: &'a WorkloadSelectors,
}

/// Validates APIRules for the active mode
pub struct ApiRuleValidator<'a> {
    ctx: ValidationContext<'a>,
}

impl<'a> ApiRuleValidator<'a> {
    /// Create a validator over a cluster snapshot
    pub fn new(ctx: ValidationContext<'a>) -> Self {
        Self { ctx }
    }

    /// Validate an APIRule, returning every failure found
    pub async fn validate(&self, api_rule: &ApiRule) -> Vec<Failure> {
        let mut failures = Vec::new();
        let settings = &self.ctx.config.settings;
        let api_ns = api_rule.namespace().unwrap_or_default();

        if let Some(service) = &api_rule.spec.service {
            let namespace = service.namespace.as_deref().unwrap_or(&api_ns);
            failures.extend(rules::validate_service_blocklist(
                ".spec.service",
                &service.name,
                namespace,
                &settings.service_blocklist,
            ));
        }

        failures.extend(host::validate_host(
            ".spec.host",
            api_rule,
            settings,
            self.ctx.virtual_services,
        ));

        failures.extend(self.validate_rules(".spec.rules", api_rule).await);

        failures.extend(timeout::validate_timeout(".spec.timeout", api_rule.spec.timeout));

        debug!(
            api_rule = %api_rule.name_any(),
            failures = failures.len(),
            "validated APIRule"
        );
        failures
    }

    async fn validate_rules(&self, path: &str, api_rule: &ApiRule) -> Vec<Failure> {
        let spec = &api_rule.spec;
        let mode = self.ctx.config.mode;
        let api_ns = api_rule.namespace().unwrap_or_default();

        if spec.rules.is_empty() {
            return vec![Failure::new(path, "No rules defined")];
        }

        let mut failures = rules::validate_duplicates(path, &spec.rules);

        for (i, rule) in spec.rules.iter().enumerate() {
            let rule_path = format!("{path}[{i}]");

            match spec.effective_service(rule) {
                None => failures.push(Failure::new(
                    format!("{rule_path}.service"),
                    "No service defined with no main service on spec level",
                )),
                Some(service) => {
                    let namespace = spec.service_namespace(rule, &api_ns);
                    let strategy_ctx = access_strategy::StrategyContext {
                        mode,
                        client: self.ctx.client,
                        selector: self.ctx.selectors.for_service(namespace, &service.name),
                        namespace,
                    };
                    failures.extend(
                        access_strategy::validate_access_strategies(
                            &format!("{rule_path}.accessStrategies"),
                            &rule.access_strategies,
                            &strategy_ctx,
                        )
                        .await,
                    );
                }
            }

            if let Some(service) = &rule.service {
                failures.extend(rules::validate_service_blocklist(
                    &format!("{rule_path}.service"),
                    &service.name,
                    spec.service_namespace(rule, &api_ns),
                    &self.ctx.config.settings.service_blocklist,
                ));
            }

            failures.extend(mutators::validate_mutators(&rule_path, rule, mode));
            failures.extend(timeout::validate_timeout(
                &format!("{rule_path}.timeout"),
                rule.timeout,
            ));
        }

        if self.ctx.config.is_mesh() {
            failures.extend(rules::validate_issuer_consistency(path, &spec.rules));
        }

        failures
    }
}

#[cfg(test)]
pub(crate) mod test_fixtures {
    use apigw_common::crd::{ApiRule, ApiRuleSpec, Handler, Rule, Service};

    pub fn rule(path: &str, methods: &[&str], strategies: Vec<Handler>) -> Rule {
        Rule {
            path: path.to_string(),
            service: None,
            methods: methods.iter().map(|m| m.to_string()).collect(),
            access_strategies: strategies,
            mutators: vec![],
            timeout: None,
        }
    }

    pub fn api_rule(rules: Vec<Rule>) -> ApiRule {
        let mut api_rule = ApiRule::new(
            "httpbin",
            ApiRuleSpec {
                host: Some("httpbin.local.kyma.dev".to_string()),
                service: Some(Service {
                    name: "httpbin".to_string(),
                    namespace: None,
                    port: 8000,
                }),
                gateway: "kyma-system/kyma-gateway".to_string(),
                rules,
                timeout: None,
            },
        );
        api_rule.metadata.namespace = Some("default".to_string());
        api_rule.metadata.uid = Some("uid-1".to_string());
        api_rule.metadata.generation = Some(1);
        api_rule
    }

    pub fn jwt(issuer: &str, jwks_uri: &str) -> Handler {
        Handler::with_config(
            "jwt",
            serde_json::json!({
                "authentications": [{"issuer": issuer, "jwksUri": jwks_uri}]
            }),
        )
    }
}
