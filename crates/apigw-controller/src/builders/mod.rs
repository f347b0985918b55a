//! Desired downstream resources for an APIRule
//!
//! Every builder is a pure function of a [`BuildContext`]: the APIRule, the
//! reconciliation config and the workload selectors resolved beforehand.
//! Each returns its resources keyed by semantic identity so the diff engine
//! can match them against what exists in the cluster.
//!
//! - [`virtual_service`]: one VirtualService per APIRule
//! - [`access_rule`]: one Oathkeeper Rule per proxied path and method set
//! - [`request_authentication`]: one RequestAuthentication per workload and issuer set
//! - [`authorization_policy`]: one AuthorizationPolicy per rule and authorization block

pub mod access_rule;
pub mod authorization_policy;
pub mod request_authentication;
pub mod virtual_service;

use kube::ResourceExt;

use apigw_common::crd::{host_with_domain, ApiRule, Rule, Service};
use apigw_common::kube_utils::{controller_owner_ref, ObjectMeta};
use apigw_common::resources::WorkloadSelector;
use apigw_common::{OwnerLabels, ReconciliationConfig};

use crate::workload::WorkloadSelectors;

/// Inputs shared by all builders
#[derive(Clone, Copy)]
pub struct BuildContext<'a> {
    /// APIRule being translated
    pub api_rule: &'a ApiRule,
    /// Mode and operator settings
    pub config: &'a ReconciliationConfig,
    /// Workload selectors of the exposed services
    pub selectors: &'a WorkloadSelectors,
}

/// A rule together with the service it routes to
pub struct RuleTarget<'a> {
    /// The rule
    pub rule: &'a Rule,
    /// Rule-level service, else the spec-level one
    pub service: &'a Service,
    /// Namespace of that service
    pub namespace: &'a str,
}

impl<'a> BuildContext<'a> {
    /// Create a build context
    pub fn new(
        api_rule: &'a ApiRule,
        config: &'a ReconciliationConfig,
        selectors: &'a WorkloadSelectors,
    ) -> Self {
        Self {
            api_rule,
            config,
            selectors,
        }
    }

    /// Namespace of the APIRule
    pub fn namespace(&self) -> String {
        self.api_rule.namespace().unwrap_or_default()
    }

    /// Exposed host, qualified with the default domain when needed
    pub fn host(&self) -> String {
        host_with_domain(
            self.api_rule.spec.host.as_deref().unwrap_or_default(),
            &self.config.settings.default_domain_name,
        )
    }

    /// Rules with their resolved service; rules without one are skipped
    /// (validation rejects them before any builder runs)
    pub fn targets(&self) -> Vec<RuleTarget<'a>> {
        let spec = &self.api_rule.spec;
        let api_ns = self.api_rule.metadata.namespace.as_deref().unwrap_or_default();
        spec.rules
            .iter()
            .filter_map(|rule| {
                spec.effective_service(rule).map(|service| RuleTarget {
                    rule,
                    service,
                    namespace: spec.service_namespace(rule, api_ns),
                })
            })
            .collect()
    }

    /// Workload selector of a rule's service
    pub fn selector(&self, target: &RuleTarget<'_>) -> WorkloadSelector {
        self.selectors
            .for_service(target.namespace, &target.service.name)
    }

    /// Metadata for a generated resource in `namespace`.
    ///
    /// Carries the owner label and any additional labels. The owner
    /// reference is only set when the resource shares the APIRule's
    /// namespace, since Kubernetes ignores cross-namespace owners.
    pub fn metadata(&self, namespace: &str) -> ObjectMeta {
        let mut meta = ObjectMeta::generated(format!("{}-", self.api_rule.name_any()), namespace)
            .with_labels(&self.config.settings.additional_labels)
            .with_labels(&OwnerLabels::for_api_rule(self.api_rule).labels());
        if namespace == self.namespace() {
            if let Some(owner) = controller_owner_ref(self.api_rule) {
                meta = meta.with_owner(owner);
            }
        }
        meta
    }
}

/// In-cluster DNS name of a service
pub fn service_host(name: &str, namespace: &str) -> String {
    format!("{name}.{namespace}.svc.cluster.local")
}
