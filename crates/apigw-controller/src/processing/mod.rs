//! Desired-state processors, one per downstream resource kind
//!
//! A [`Processor`] lists the resources an APIRule owns (current owner label
//! first, then the legacy one), asks its [`Creator`] for the desired set and
//! diffs the two into [`ObjectChange`]s. Processors never write; the
//! controller applies the changes.

pub mod diff;

use std::collections::{BTreeMap, BTreeSet};

use async_trait::async_trait;
use tracing::{debug, warn};

use apigw_common::resources::{
    AccessRule, AuthorizationPolicy, ManagedResource, RequestAuthentication, ResourceKind,
    VirtualService,
};
use apigw_common::{Error, OwnerLabels};

use crate::builders::{self, BuildContext};
use crate::client::GatewayKubeClient;
use diff::{diff, Change};

/// Diff key of the single VirtualService
pub const VIRTUAL_SERVICE_KEY: &str = "virtual-service";

// =============================================================================
// Changes
// =============================================================================

/// What to do with an object
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ChangeAction {
    /// Create it
    Create,
    /// Replace it
    Update,
    /// Delete it
    Delete,
}

impl std::fmt::Display for ChangeAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            ChangeAction::Create => "create",
            ChangeAction::Update => "update",
            ChangeAction::Delete => "delete",
        })
    }
}

/// A change to one serialized object, ready to be sent to the API server
#[derive(Clone, Debug, PartialEq)]
pub struct ObjectChange {
    /// Resource kind
    pub kind: ResourceKind,
    /// Action
    pub action: ChangeAction,
    /// Namespace of the object
    pub namespace: String,
    /// Name of the object (empty for creates)
    pub name: String,
    /// Full object to send
    pub object: serde_json::Value,
}

// =============================================================================
// Creators
// =============================================================================

/// Computes the desired resources of one kind
pub trait Creator: Send + Sync {
    /// Resource kind produced
    type Resource: ManagedResource + Send;

    /// Desired resources keyed by semantic identity
    fn desired(&self, ctx: &BuildContext<'_>) -> Result<BTreeMap<String, Self::Resource>, Error>;

    /// Key of an actual resource, matching the key of its desired counterpart
    fn key(&self, resource: &Self::Resource) -> String;
}

/// The APIRule's VirtualService
pub struct VirtualServiceCreator;

impl Creator for VirtualServiceCreator {
    type Resource = VirtualService;

    fn desired(&self, ctx: &BuildContext<'_>) -> Result<BTreeMap<String, VirtualService>, Error> {
        let vs = builders::virtual_service::build(ctx)?;
        Ok(BTreeMap::from([(VIRTUAL_SERVICE_KEY.to_string(), vs)]))
    }

    fn key(&self, _: &VirtualService) -> String {
        VIRTUAL_SERVICE_KEY.to_string()
    }
}

/// Oathkeeper rules of proxied paths
pub struct AccessRuleCreator;

impl Creator for AccessRuleCreator {
    type Resource = AccessRule;

    fn desired(&self, ctx: &BuildContext<'_>) -> Result<BTreeMap<String, AccessRule>, Error> {
        Ok(builders::access_rule::build(ctx))
    }

    fn key(&self, resource: &AccessRule) -> String {
        resource.spec.key()
    }
}

/// RequestAuthentications of JWT rules
pub struct RequestAuthenticationCreator;

impl Creator for RequestAuthenticationCreator {
    type Resource = RequestAuthentication;

    fn desired(&self, ctx: &BuildContext<'_>) -> Result<BTreeMap<String, RequestAuthentication>, Error> {
        Ok(builders::request_authentication::build(ctx))
    }

    fn key(&self, resource: &RequestAuthentication) -> String {
        builders::request_authentication::key(resource)
    }
}

/// AuthorizationPolicies of every rule once JWT is in use
pub struct AuthorizationPolicyCreator;

impl Creator for AuthorizationPolicyCreator {
    type Resource = AuthorizationPolicy;

    fn desired(&self, ctx: &BuildContext<'_>) -> Result<BTreeMap<String, AuthorizationPolicy>, Error> {
        Ok(builders::authorization_policy::build(ctx))
    }

    fn key(&self, resource: &AuthorizationPolicy) -> String {
        builders::authorization_policy::key(resource)
    }
}

// =============================================================================
// Processors
// =============================================================================

/// Evaluates the changes needed for one resource kind
#[async_trait]
pub trait ResourceProcessor: Send + Sync {
    /// Kind handled
    fn kind(&self) -> ResourceKind;

    /// Whether this kind is part of the active mode; inactive processors only
    /// clean up what the other mode left behind
    fn is_active(&self) -> bool;

    /// List owned resources, build the desired ones and diff them
    async fn evaluate_reconciliation(
        &self,
        client: &dyn GatewayKubeClient,
        ctx: &BuildContext<'_>,
    ) -> Result<Vec<ObjectChange>, Error>;
}

/// Processor over a [`Creator`]
pub struct Processor<C> {
    creator: C,
    active: bool,
}

impl<C: Creator> Processor<C> {
    /// Processor producing the creator's resources
    pub fn active(creator: C) -> Self {
        Self {
            creator,
            active: true,
        }
    }

    /// Processor with an empty desired set, deleting leftovers
    pub fn cleanup(creator: C) -> Self {
        Self {
            creator,
            active: false,
        }
    }
}

/// Owned resources of `kind`, raw and parsed, deduplicated across both owner labels
async fn list_owned<T: ManagedResource>(
    client: &dyn GatewayKubeClient,
    kind: ResourceKind,
    owner: &OwnerLabels,
) -> Result<Vec<(serde_json::Value, T)>, Error> {
    let mut seen = BTreeSet::new();
    let mut result = Vec::new();

    for selector in owner.selectors() {
        for raw in client.list_owned(kind, &selector).await? {
            let parsed: T = match serde_json::from_value(raw.clone()) {
                Ok(parsed) => parsed,
                Err(e) => {
                    warn!(kind = %kind, error = %e, "skipping unreadable owned resource");
                    continue;
                }
            };
            let meta = parsed.metadata();
            if !owner.owns(&meta.labels) {
                continue;
            }
            if seen.insert((meta.namespace.clone(), meta.name.clone())) {
                result.push((raw, parsed));
            }
        }
    }

    Ok(result)
}

/// Merge an updated resource into the raw object it was read from, keeping
/// every field the operator does not manage
fn merge_update<T: ManagedResource>(raw: &serde_json::Value, updated: &T) -> Result<serde_json::Value, Error> {
    let updated = serde_json::to_value(updated)?;
    let mut object = raw.clone();
    object["spec"] = updated["spec"].clone();
    object["metadata"]["labels"] = updated["metadata"]["labels"].clone();
    object["metadata"]["ownerReferences"] = updated["metadata"]["ownerReferences"].clone();
    Ok(object)
}

#[async_trait]
impl<C: Creator> ResourceProcessor for Processor<C> {
    fn kind(&self) -> ResourceKind {
        <C::Resource as ManagedResource>::RESOURCE_KIND
    }

    fn is_active(&self) -> bool {
        self.active
    }

    async fn evaluate_reconciliation(
        &self,
        client: &dyn GatewayKubeClient,
        ctx: &BuildContext<'_>,
    ) -> Result<Vec<ObjectChange>, Error> {
        let kind = self.kind();
        let owner = OwnerLabels::for_api_rule(ctx.api_rule);

        let desired = if self.active {
            self.creator.desired(ctx)?
        } else {
            BTreeMap::new()
        };
        let owned = list_owned::<C::Resource>(client, kind, &owner).await?;

        let mut raw_by_name: BTreeMap<(String, String), serde_json::Value> = BTreeMap::new();
        let mut actual = Vec::with_capacity(owned.len());
        for (raw, parsed) in owned {
            let meta = parsed.metadata();
            raw_by_name.insert((meta.namespace.clone(), meta.name.clone()), raw);
            actual.push(parsed);
        }

        let changes = diff(desired, actual, |r| self.creator.key(r), &owner);
        debug!(kind = %kind, changes = changes.len(), active = self.active, "evaluated reconciliation");

        changes
            .into_iter()
            .map(|change| -> Result<ObjectChange, Error> {
                let meta = change.resource().metadata();
                let id = (meta.namespace.clone(), meta.name.clone());
                let (action, object) = match &change {
                    Change::Create(r) => (ChangeAction::Create, serde_json::to_value(r)?),
                    Change::Update(r) => match raw_by_name.get(&id) {
                        Some(raw) => (ChangeAction::Update, merge_update(raw, r)?),
                        None => (ChangeAction::Update, serde_json::to_value(r)?),
                    },
                    Change::Delete(r) => (ChangeAction::Delete, serde_json::to_value(r)?),
                };
                Ok(ObjectChange {
                    kind,
                    action,
                    namespace: id.0,
                    name: id.1,
                    object,
                })
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::builders::test_fixtures::{api_rule, config, rule};
    use crate::client::MockGatewayKubeClient;
    use crate::workload::WorkloadSelectors;
    use apigw_common::crd::Handler;
    use apigw_common::labels::{LEGACY_OWNER_LABEL, OWNER_LABEL};
    use apigw_common::JwtHandler;
    use serde_json::json;
    use std::sync::{Arc, Mutex};

    fn existing_access_rule(name: &str, label: &str, path: &str) -> serde_json::Value {
        json!({
            "apiVersion": "oathkeeper.ory.sh/v1alpha1",
            "kind": "Rule",
            "metadata": {
                "name": name,
                "namespace": "default",
                "resourceVersion": "7",
                "finalizers": ["keep-me"],
                "labels": {label: "httpbin.default"}
            },
            "spec": {
                "upstream": {"url": "http://httpbin.default.svc.cluster.local:8000"},
                "match": {"url": format!("<http|https>://httpbin.local.kyma.dev<{path}>"), "methods": ["GET"]},
                "authenticators": [{"handler": "noop"}],
                "authorizer": {"handler": "allow"}
            }
        })
    }

    /// Story: resources found under either owner label are reconciled once
    #[tokio::test]
    async fn story_lists_current_then_legacy_label() {
        let selectors_seen = Arc::new(Mutex::new(Vec::new()));
        let seen = selectors_seen.clone();

        let mut mock = MockGatewayKubeClient::new();
        mock.expect_list_owned().returning(move |kind, selector| {
            assert_eq!(kind, ResourceKind::AccessRule);
            seen.lock().unwrap().push(selector.to_string());
            if selector.starts_with(OWNER_LABEL) {
                Ok(vec![existing_access_rule("current", OWNER_LABEL, "/a")])
            } else {
                Ok(vec![
                    existing_access_rule("legacy", LEGACY_OWNER_LABEL, "/b"),
                    existing_access_rule("current", OWNER_LABEL, "/a"),
                ])
            }
        });

        let api_rule = api_rule(vec![
            rule("/a", &["GET"], vec![Handler::named("noop")]),
            rule("/b", &["GET"], vec![Handler::named("noop")]),
        ]);
        let config = config(JwtHandler::Ory);
        let selectors = WorkloadSelectors::default();
        let ctx = BuildContext::new(&api_rule, &config, &selectors);

        let changes = Processor::active(AccessRuleCreator)
            .evaluate_reconciliation(&mock, &ctx)
            .await
            .unwrap();

        let seen = selectors_seen.lock().unwrap();
        assert_eq!(seen.len(), 2);
        assert!(seen[0].starts_with(OWNER_LABEL));
        assert!(seen[1].starts_with(LEGACY_OWNER_LABEL));

        assert_eq!(changes.len(), 2);
        assert!(changes.iter().all(|c| c.action == ChangeAction::Update));

        let legacy = changes.iter().find(|c| c.name == "legacy").unwrap();
        assert_eq!(legacy.object["metadata"]["labels"][OWNER_LABEL], "httpbin.default");
        assert!(legacy.object["metadata"]["labels"]
            .get(LEGACY_OWNER_LABEL)
            .is_none());
        assert_eq!(legacy.object["metadata"]["finalizers"][0], "keep-me");
        assert_eq!(
            legacy.object["metadata"]["ownerReferences"][0]["uid"],
            api_rule.metadata.uid.clone().unwrap()
        );
        assert_eq!(legacy.object["metadata"]["resourceVersion"], "7");
    }

    #[tokio::test]
    async fn cleanup_processor_deletes_everything_owned() {
        let mut mock = MockGatewayKubeClient::new();
        mock.expect_list_owned().returning(|_, selector| {
            if selector.starts_with(OWNER_LABEL) {
                Ok(vec![existing_access_rule("leftover", OWNER_LABEL, "/a")])
            } else {
                Ok(vec![])
            }
        });

        let api_rule = api_rule(vec![rule("/a", &["GET"], vec![Handler::named("noop")])]);
        let config = config(JwtHandler::Istio);
        let selectors = WorkloadSelectors::default();
        let ctx = BuildContext::new(&api_rule, &config, &selectors);

        let processor = Processor::cleanup(AccessRuleCreator);
        assert!(!processor.is_active());
        let changes = processor.evaluate_reconciliation(&mock, &ctx).await.unwrap();
        assert_eq!(changes.len(), 1);
        assert_eq!(changes[0].action, ChangeAction::Delete);
        assert_eq!(changes[0].name, "leftover");
    }

    #[tokio::test]
    async fn resources_of_other_owners_are_ignored() {
        let mut mock = MockGatewayKubeClient::new();
        mock.expect_list_owned().returning(|_, selector| {
            if selector.starts_with(LEGACY_OWNER_LABEL) {
                let mut foreign = existing_access_rule("foreign", LEGACY_OWNER_LABEL, "/a");
                foreign["metadata"]["labels"][OWNER_LABEL] = json!("other.default");
                Ok(vec![foreign])
            } else {
                Ok(vec![])
            }
        });

        let api_rule = api_rule(vec![rule("/a", &["GET"], vec![Handler::named("noop")])]);
        let config = config(JwtHandler::Ory);
        let selectors = WorkloadSelectors::default();
        let ctx = BuildContext::new(&api_rule, &config, &selectors);

        let changes = Processor::active(AccessRuleCreator)
            .evaluate_reconciliation(&mock, &ctx)
            .await
            .unwrap();
        assert_eq!(changes.len(), 1);
        assert_eq!(changes[0].action, ChangeAction::Create);
        assert_eq!(changes[0].object["metadata"]["generateName"], "httpbin-");
    }

    #[tokio::test]
    async fn virtual_service_is_a_singleton() {
        let mut mock = MockGatewayKubeClient::new();
        mock.expect_list_owned().returning(|_, _| Ok(vec![]));

        let api_rule = api_rule(vec![rule("/a", &["GET"], vec![Handler::named("allow")])]);
        let config = config(JwtHandler::Ory);
        let selectors = WorkloadSelectors::default();
        let ctx = BuildContext::new(&api_rule, &config, &selectors);

        let processor = Processor::active(VirtualServiceCreator);
        assert_eq!(processor.kind(), ResourceKind::VirtualService);
        let changes = processor.evaluate_reconciliation(&mock, &ctx).await.unwrap();
        assert_eq!(changes.len(), 1);
        assert_eq!(changes[0].object["kind"], "VirtualService");
    }
}
