//! Owner labels linking downstream resources to their APIRule
//!
//! Two label keys identify the owning APIRule. The current key is written on
//! every generated resource; the legacy key is only read, so resources created
//! under the previous identity scheme are still found and adopted.

use std::collections::BTreeMap;

use kube::ResourceExt;

use crate::crd::ApiRule;

/// Current owner label key
pub const OWNER_LABEL: &str = "apirule.gateway.kyma-project.io/v1beta1";

/// Legacy owner label key, read for migration only
pub const LEGACY_OWNER_LABEL: &str = "apirule.gateway.kyma-project.io/v1alpha1";

/// Owner label lookup for one APIRule.
///
/// Lookups try the current key first and fall back to the legacy key.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct OwnerLabels {
    value: String,
}

impl OwnerLabels {
    /// Owner labels for the APIRule `name` in `namespace`
    pub fn new(name: &str, namespace: &str) -> Self {
        Self {
            value: format!("{name}.{namespace}"),
        }
    }

    /// Owner labels for an APIRule object
    pub fn for_api_rule(api_rule: &ApiRule) -> Self {
        Self::new(
            &api_rule.name_any(),
            api_rule.namespace().as_deref().unwrap_or_default(),
        )
    }

    /// Label value, `<name>.<namespace>`
    pub fn value(&self) -> &str {
        &self.value
    }

    /// Label selectors in lookup order: current key, then legacy key
    pub fn selectors(&self) -> [String; 2] {
        [
            format!("{}={}", OWNER_LABEL, self.value),
            format!("{}={}", LEGACY_OWNER_LABEL, self.value),
        ]
    }

    /// Labels written on generated resources
    pub fn labels(&self) -> BTreeMap<String, String> {
        BTreeMap::from([(OWNER_LABEL.to_string(), self.value.clone())])
    }

    /// Whether `labels` mark a resource as owned by this APIRule.
    ///
    /// When the current key is present it decides alone; the legacy key is
    /// only consulted on resources that were never migrated.
    pub fn owns(&self, labels: &BTreeMap<String, String>) -> bool {
        match labels.get(OWNER_LABEL) {
            Some(v) => *v == self.value,
            None => labels.get(LEGACY_OWNER_LABEL) == Some(&self.value),
        }
    }

    /// Whether `labels` carry only the legacy key for this APIRule
    pub fn is_legacy(&self, labels: &BTreeMap<String, String>) -> bool {
        !labels.contains_key(OWNER_LABEL) && labels.get(LEGACY_OWNER_LABEL) == Some(&self.value)
    }

    /// Move `labels` to the current key, dropping the legacy one
    pub fn adopt(&self, labels: &mut BTreeMap<String, String>) {
        labels.remove(LEGACY_OWNER_LABEL);
        labels.insert(OWNER_LABEL.to_string(), self.value.clone());
    }
}
