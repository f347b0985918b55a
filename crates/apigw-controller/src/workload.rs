//! Workload selectors of the services an APIRule exposes
//!
//! Resolved once per reconcile from the Kubernetes Services, then shared by
//! the sidecar injection check and the mesh-mode builders.

use std::collections::BTreeMap;

use kube::ResourceExt;

use apigw_common::crd::ApiRule;
use apigw_common::resources::WorkloadSelector;
use apigw_common::Error;

use crate::client::GatewayKubeClient;

/// Selectors keyed by (namespace, service name)
#[derive(Clone, Debug, Default, PartialEq)]
pub struct WorkloadSelectors {
    by_service: BTreeMap<(String, String), BTreeMap<String, String>>,
}

impl WorkloadSelectors {
    /// Look up the selector of every service referenced by `api_rule`.
    ///
    /// Services that do not exist or have no selector are left out and fall
    /// back to `app: <name>` on lookup.
    pub async fn resolve(client: &dyn GatewayKubeClient, api_rule: &ApiRule) -> Result<Self, Error> {
        let api_ns = api_rule.namespace().unwrap_or_default();
        let mut selectors = Self::default();

        for rule in &api_rule.spec.rules {
            let Some(service) = api_rule.spec.effective_service(rule) else {
                continue;
            };
            let namespace = api_rule.spec.service_namespace(rule, &api_ns).to_string();
            let key = (namespace, service.name.clone());
            if selectors.by_service.contains_key(&key) {
                continue;
            }

            let found = client.get_service(&key.0, &key.1).await?;
            if let Some(labels) = found
                .and_then(|svc| svc.spec)
                .and_then(|spec| spec.selector)
                .filter(|s| !s.is_empty())
            {
                selectors.by_service.insert(key, labels);
            }
        }

        Ok(selectors)
    }

    /// Record a selector for a service
    pub fn insert(&mut self, namespace: &str, service: &str, labels: BTreeMap<String, String>) {
        self.by_service
            .insert((namespace.to_string(), service.to_string()), labels);
    }

    /// Selector for a service, `app: <name>` when none was resolved
    pub fn for_service(&self, namespace: &str, service: &str) -> WorkloadSelector {
        let match_labels = self
            .by_service
            .get(&(namespace.to_string(), service.to_string()))
            .cloned()
            .unwrap_or_else(|| BTreeMap::from([("app".to_string(), service.to_string())]));
        WorkloadSelector { match_labels }
    }
}

/// Render match labels as a label selector string (`k1=v1,k2=v2`)
pub fn label_selector(selector: &WorkloadSelector) -> String {
    selector
        .match_labels
        .iter()
        .map(|(k, v)| format!("{k}={v}"))
        .collect::<Vec<_>>()
        .join(",")
}
