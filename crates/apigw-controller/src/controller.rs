//! APIRule controller
//!
//! One reconcile runs end to end for a single APIRule:
//!
//! 1. read the JWT handler mode from the mode ConfigMap
//! 2. snapshot cluster state (VirtualServices, workload selectors)
//! 3. validate; on failure write the failure status and stop, leaving every
//!    downstream resource untouched
//! 4. evaluate every processor and apply its changes
//! 5. write the aggregated status
//!
//! Nothing is cached between reconciles.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use kube::runtime::controller::Action;
use kube::{Client, ResourceExt};
use tracing::{debug, error, info, instrument, warn};

use apigw_common::crd::{ApiRule, ApiRuleStatus};
use apigw_common::retry::{retry_on_conflict, RetryConfig};
use apigw_common::{
    Error, JwtHandler, OperatorSettings, ReconciliationConfig, CONFIG_MAP_KEY, CONFIG_MAP_NAME,
    KYMA_SYSTEM_NAMESPACE,
};

use crate::builders::BuildContext;
use crate::client::{GatewayKubeClient, GatewayKubeClientImpl};
use crate::processing::{ChangeAction, ObjectChange, ResourceProcessor};
use crate::reconciliation::processors;
use crate::status;
use crate::validation::{ApiRuleValidator, ValidationContext};
use crate::workload::WorkloadSelectors;

/// Requeue after a controller error
const ERROR_POLICY_REQUEUE: Duration = Duration::from_secs(60);

/// Attempts for a conflicting status write
const STATUS_WRITE_ATTEMPTS: u32 = 5;

// =============================================================================
// Context
// =============================================================================

/// Requeue periods
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RequeuePeriods {
    /// After a successful reconcile
    pub reconcile: Duration,
    /// After a reconcile that wrote an error status
    pub error: Duration,
}

impl Default for RequeuePeriods {
    fn default() -> Self {
        Self {
            reconcile: Duration::from_secs(30 * 60),
            error: Duration::from_secs(60),
        }
    }
}

/// Shared controller context
pub struct Context {
    /// Cluster access
    pub kube: Arc<dyn GatewayKubeClient>,
    /// Operator-wide settings
    pub settings: OperatorSettings,
    /// Namespace of the mode ConfigMap
    pub config_map_namespace: String,
    /// Name of the mode ConfigMap
    pub config_map_name: String,
    /// Requeue periods
    pub periods: RequeuePeriods,
}

impl Context {
    /// Create a context over an existing client
    pub fn new(
        kube: Arc<dyn GatewayKubeClient>,
        settings: OperatorSettings,
        periods: RequeuePeriods,
    ) -> Self {
        Self {
            kube,
            settings,
            config_map_namespace: KYMA_SYSTEM_NAMESPACE.to_string(),
            config_map_name: CONFIG_MAP_NAME.to_string(),
            periods,
        }
    }

    /// Create a context from a Kubernetes client
    pub fn from_client(client: Client, settings: OperatorSettings, periods: RequeuePeriods) -> Self {
        Self::new(Arc::new(GatewayKubeClientImpl::new(client)), settings, periods)
    }

    /// Read the mode ConfigMap from another location
    pub fn with_config_map(mut self, namespace: impl Into<String>, name: impl Into<String>) -> Self {
        self.config_map_namespace = namespace.into();
        self.config_map_name = name.into();
        self
    }

    /// Create a context for testing with a mock client
    #[cfg(test)]
    pub fn for_testing(kube: Arc<dyn GatewayKubeClient>) -> Self {
        Self::new(
            kube,
            OperatorSettings {
                default_domain_name: "local.kyma.dev".to_string(),
                ..Default::default()
            },
            RequeuePeriods::default(),
        )
    }

    /// Build this reconcile's configuration from the mode ConfigMap
    async fn load_config(&self) -> Result<ReconciliationConfig, Error> {
        let config_map = self
            .kube
            .get_config_map(&self.config_map_namespace, &self.config_map_name)
            .await?;
        let data = config_map
            .as_ref()
            .and_then(|cm| cm.data.as_ref())
            .and_then(|data| data.get(CONFIG_MAP_KEY))
            .map(String::as_str);
        let mode = JwtHandler::from_config_map_data(data)?;
        Ok(ReconciliationConfig::new(mode, self.settings.clone()))
    }
}

// =============================================================================
// APIRule reconciliation
// =============================================================================

/// Reconcile an APIRule
#[instrument(skip(api_rule, ctx), fields(api_rule = %api_rule.name_any()))]
pub async fn reconcile(api_rule: Arc<ApiRule>, ctx: Arc<Context>) -> Result<Action, Error> {
    info!("reconciling APIRule");

    let config = match ctx.load_config().await {
        Ok(config) => config,
        Err(e @ Error::Config { .. }) => {
            warn!(error = %e, "invalid mode configuration");
            return finish(&api_rule, &ctx, status::failed(e.to_string())).await;
        }
        Err(e) => return Err(e),
    };
    debug!(mode = %config.mode, "loaded reconciliation config");

    let client = ctx.kube.as_ref();
    let virtual_services = client.list_virtual_services().await?;
    let selectors = WorkloadSelectors::resolve(client, &api_rule).await?;

    let failures = ApiRuleValidator::new(ValidationContext {
        config: &config,
        client,
        virtual_services: &virtual_services,
        selectors: &selectors,
    })
    .validate(&api_rule)
    .await;

    if !failures.is_empty() {
        info!(failures = failures.len(), "APIRule failed validation");
        return finish(&api_rule, &ctx, status::validation_failed(config.mode, &failures)).await;
    }

    let build_ctx = BuildContext::new(&api_rule, &config, &selectors);
    let mut errors = BTreeMap::new();
    for processor in processors(config.mode) {
        if let Err(e) = process(processor.as_ref(), client, &build_ctx).await {
            warn!(kind = %processor.kind(), error = %e, "processing failed");
            errors.insert(processor.kind(), e.to_string());
        }
    }

    finish(&api_rule, &ctx, status::processed(config.mode, &errors)).await
}

/// Evaluate one processor and apply its changes in order
async fn process(
    processor: &dyn ResourceProcessor,
    client: &dyn GatewayKubeClient,
    ctx: &BuildContext<'_>,
) -> Result<(), Error> {
    let changes = processor.evaluate_reconciliation(client, ctx).await?;
    for change in &changes {
        apply(client, change).await?;
    }
    Ok(())
}

async fn apply(client: &dyn GatewayKubeClient, change: &ObjectChange) -> Result<(), Error> {
    debug!(
        kind = %change.kind,
        action = %change.action,
        namespace = %change.namespace,
        name = %change.name,
        "applying change"
    );
    match change.action {
        ChangeAction::Create => client.create(change.kind, &change.object).await,
        ChangeAction::Update => client.update(change.kind, &change.object).await,
        ChangeAction::Delete => {
            client
                .delete(change.kind, &change.namespace, &change.name)
                .await
        }
    }
}

/// Write the status and pick the requeue interval
async fn finish(api_rule: &ApiRule, ctx: &Context, status: ApiRuleStatus) -> Result<Action, Error> {
    let failed = status::is_error(&status);
    let status = status::stamp(status, api_rule.metadata.generation);
    write_status(ctx.kube.as_ref(), api_rule, &status).await?;

    if failed {
        Ok(Action::requeue(ctx.periods.error))
    } else {
        info!("APIRule reconciled");
        Ok(Action::requeue(ctx.periods.reconcile))
    }
}

/// Replace the status on the latest version of the APIRule, retrying on conflict.
///
/// The write is skipped when the stored status already reports the same
/// outcome, so status writes do not retrigger reconciles endlessly.
async fn write_status(
    client: &dyn GatewayKubeClient,
    api_rule: &ApiRule,
    status: &ApiRuleStatus,
) -> Result<(), Error> {
    let name = api_rule.name_any();
    let namespace = api_rule.namespace().unwrap_or_default();
    let (name, namespace) = (name.as_str(), namespace.as_str());

    retry_on_conflict(
        &RetryConfig::with_max_attempts(STATUS_WRITE_ATTEMPTS),
        "write APIRule status",
        move || async move {
            let Some(current) = client.get_api_rule(namespace, name).await? else {
                debug!("APIRule is gone, skipping status write");
                return Ok(());
            };
            if current
                .status
                .as_ref()
                .is_some_and(|existing| existing.same_outcome(status))
            {
                debug!("status unchanged, skipping update");
                return Ok(());
            }
            client
                .patch_api_rule_status(
                    namespace,
                    name,
                    current.metadata.resource_version.clone(),
                    status,
                )
                .await
        },
    )
    .await
}

/// Error policy for the APIRule controller
pub fn error_policy(api_rule: Arc<ApiRule>, error: &Error, _ctx: Arc<Context>) -> Action {
    error!(
        ?error,
        api_rule = %api_rule.name_any(),
        retryable = error.is_retryable(),
        "reconciliation failed"
    );
    Action::requeue(ERROR_POLICY_REQUEUE)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::MockGatewayKubeClient;
    use apigw_common::crd::{ApiRuleSpec, Handler, ResourceStatus, Rule, Service, StatusCode};
    use apigw_common::labels::OWNER_LABEL;
    use apigw_common::resources::ResourceKind;
    use k8s_openapi::api::core::v1::ConfigMap;
    use serde_json::json;
    use std::sync::Mutex;

    // =========================================================================
    // Fixtures
    // =========================================================================

    fn rule(path: &str, methods: &[&str], strategies: Vec<Handler>) -> Rule {
        Rule {
            path: path.to_string(),
            service: None,
            methods: methods.iter().map(|m| m.to_string()).collect(),
            access_strategies: strategies,
            mutators: vec![],
            timeout: None,
        }
    }

    fn sample_api_rule(rules: Vec<Rule>) -> ApiRule {
        let mut api_rule = ApiRule::new(
            "httpbin",
            ApiRuleSpec {
                host: Some("httpbin".to_string()),
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
        api_rule.metadata.generation = Some(2);
        api_rule
    }

    fn mode_config_map(handler: &str) -> ConfigMap {
        ConfigMap {
            data: Some(BTreeMap::from([(
                CONFIG_MAP_KEY.to_string(),
                format!("jwtHandler: {handler}"),
            )])),
            ..Default::default()
        }
    }

    #[derive(Default)]
    struct Recorded {
        writes: Mutex<Vec<(String, ResourceKind)>>,
        statuses: Mutex<Vec<ApiRuleStatus>>,
    }

    /// Mock with an empty cluster that records writes and statuses
    fn mock_cluster(
        handler: Option<&'static str>,
        existing: Vec<(ResourceKind, serde_json::Value)>,
        api_rule: &ApiRule,
        recorded: Arc<Recorded>,
    ) -> MockGatewayKubeClient {
        let mut mock = MockGatewayKubeClient::new();
        mock.expect_get_config_map()
            .returning(move |_, _| Ok(handler.map(mode_config_map)));
        mock.expect_list_virtual_services().returning(|| Ok(vec![]));
        mock.expect_get_service().returning(|_, _| Ok(None));
        mock.expect_list_pods().returning(|_, _| Ok(vec![]));
        mock.expect_list_owned().returning(move |kind, selector| {
            if !selector.starts_with(OWNER_LABEL) {
                return Ok(vec![]);
            }
            Ok(existing
                .iter()
                .filter(|(k, _)| *k == kind)
                .map(|(_, v)| v.clone())
                .collect())
        });

        let r = recorded.clone();
        mock.expect_create().returning(move |kind, _| {
            r.writes.lock().unwrap().push(("create".to_string(), kind));
            Ok(())
        });
        let r = recorded.clone();
        mock.expect_update().returning(move |kind, _| {
            r.writes.lock().unwrap().push(("update".to_string(), kind));
            Ok(())
        });
        let r = recorded.clone();
        mock.expect_delete().returning(move |kind, _, _| {
            r.writes.lock().unwrap().push(("delete".to_string(), kind));
            Ok(())
        });

        let stored = api_rule.clone();
        mock.expect_get_api_rule()
            .returning(move |_, _| Ok(Some(stored.clone())));
        let r = recorded;
        mock.expect_patch_api_rule_status()
            .returning(move |_, _, _, status| {
                r.statuses.lock().unwrap().push(status.clone());
                Ok(())
            });
        mock
    }

    fn owned(kind: &str, api_version: &str, name: &str, spec: serde_json::Value) -> serde_json::Value {
        json!({
            "apiVersion": api_version,
            "kind": kind,
            "metadata": {
                "name": name,
                "namespace": "default",
                "labels": {OWNER_LABEL: "httpbin.default"}
            },
            "spec": spec
        })
    }

    // =========================================================================
    // Reconciliation Story Tests
    // =========================================================================

    /// Story: a fresh noop APIRule in proxy mode gets a route and one access rule
    #[tokio::test]
    async fn story_proxy_mode_creates_route_and_access_rule() {
        let api_rule = sample_api_rule(vec![rule("/rule1", &["GET"], vec![Handler::named("noop")])]);
        let recorded = Arc::new(Recorded::default());
        let mock = mock_cluster(None, vec![], &api_rule, recorded.clone());
        let ctx = Arc::new(Context::for_testing(Arc::new(mock)));

        let action = reconcile(Arc::new(api_rule), ctx)
            .await
            .expect("reconcile should succeed");
        assert_eq!(action, Action::requeue(Duration::from_secs(30 * 60)));

        let writes = recorded.writes.lock().unwrap();
        assert_eq!(
            *writes,
            vec![
                ("create".to_string(), ResourceKind::VirtualService),
                ("create".to_string(), ResourceKind::AccessRule),
            ]
        );

        let statuses = recorded.statuses.lock().unwrap();
        let status = &statuses[0];
        assert_eq!(status.code(), Some(StatusCode::Ok));
        assert_eq!(status.access_rule_status, Some(ResourceStatus::ok()));
        assert!(status.request_authentication_status.is_none());
        assert_eq!(status.observed_generation, Some(2));
    }

    /// Story: duplicate paths are rejected and nothing in the cluster changes
    #[tokio::test]
    async fn story_validation_failure_leaves_cluster_untouched() {
        let api_rule = sample_api_rule(vec![
            rule("/a", &["GET"], vec![Handler::named("noop")]),
            rule("/a", &["GET"], vec![Handler::named("noop")]),
        ]);
        let existing = vec![(
            ResourceKind::AccessRule,
            owned(
                "Rule",
                "oathkeeper.ory.sh/v1alpha1",
                "stale",
                json!({
                    "upstream": {"url": "http://old.default.svc.cluster.local:80"},
                    "match": {"url": "<http|https>://old.local.kyma.dev</old>", "methods": ["GET"]}
                }),
            ),
        )];
        let recorded = Arc::new(Recorded::default());
        let mock = mock_cluster(Some("ory"), existing, &api_rule, recorded.clone());
        let ctx = Arc::new(Context::for_testing(Arc::new(mock)));

        let action = reconcile(Arc::new(api_rule), ctx).await.unwrap();
        assert_eq!(action, Action::requeue(Duration::from_secs(60)));
        assert!(recorded.writes.lock().unwrap().is_empty());

        let statuses = recorded.statuses.lock().unwrap();
        let status = &statuses[0];
        let description = &status.api_rule_status.as_ref().unwrap().description;
        assert!(description.starts_with("Validation error: "));
        assert!(description.contains("multiple rules defined for the same path and method"));
        assert_eq!(status.virtual_service_status, Some(ResourceStatus::skipped()));
        assert_eq!(status.access_rule_status, Some(ResourceStatus::skipped()));
    }

    /// Story: after switching to mesh mode the old access rules are cleaned up
    #[tokio::test]
    async fn story_mode_switch_cleans_up_previous_mode() {
        let api_rule = sample_api_rule(vec![rule("/a", &["GET"], vec![Handler::named("allow")])]);
        let existing = vec![(
            ResourceKind::AccessRule,
            owned(
                "Rule",
                "oathkeeper.ory.sh/v1alpha1",
                "httpbin-old",
                json!({
                    "upstream": {"url": "http://httpbin.default.svc.cluster.local:8000"},
                    "match": {"url": "<http|https>://httpbin.local.kyma.dev</a>", "methods": ["GET"]}
                }),
            ),
        )];
        let recorded = Arc::new(Recorded::default());
        let mock = mock_cluster(Some("istio"), existing, &api_rule, recorded.clone());
        let ctx = Arc::new(Context::for_testing(Arc::new(mock)));

        reconcile(Arc::new(api_rule), ctx).await.unwrap();

        let writes = recorded.writes.lock().unwrap();
        assert!(writes.contains(&("create".to_string(), ResourceKind::VirtualService)));
        assert!(writes.contains(&("delete".to_string(), ResourceKind::AccessRule)));

        let statuses = recorded.statuses.lock().unwrap();
        assert!(statuses[0].access_rule_status.is_none());
        assert_eq!(
            statuses[0].request_authentication_status,
            Some(ResourceStatus::ok())
        );
    }

    /// Story: an unknown handler in the mode ConfigMap is reported on the APIRule
    #[tokio::test]
    async fn story_invalid_mode_config_is_reported() {
        let api_rule = sample_api_rule(vec![rule("/a", &["GET"], vec![Handler::named("noop")])]);
        let recorded = Arc::new(Recorded::default());
        let mock = mock_cluster(Some("foo"), vec![], &api_rule, recorded.clone());
        let ctx = Arc::new(Context::for_testing(Arc::new(mock)));

        let action = reconcile(Arc::new(api_rule), ctx).await.unwrap();
        assert_eq!(action, Action::requeue(Duration::from_secs(60)));

        let statuses = recorded.statuses.lock().unwrap();
        let parent = statuses[0].api_rule_status.as_ref().unwrap();
        assert_eq!(parent.code, StatusCode::Error);
        assert!(parent.description.contains("foo"));
        assert!(statuses[0].virtual_service_status.is_none());
    }

    /// Story: a failed write marks only that kind as failed
    #[tokio::test]
    async fn story_apply_error_is_reported_per_kind() {
        let api_rule = sample_api_rule(vec![rule("/a", &["GET"], vec![Handler::named("noop")])]);
        let statuses = Arc::new(Mutex::new(Vec::new()));

        let mut mock = MockGatewayKubeClient::new();
        mock.expect_get_config_map().returning(|_, _| Ok(None));
        mock.expect_list_virtual_services().returning(|| Ok(vec![]));
        mock.expect_get_service().returning(|_, _| Ok(None));
        mock.expect_list_owned().returning(|_, _| Ok(vec![]));
        mock.expect_create().returning(|kind, _| match kind {
            ResourceKind::AccessRule => Err(Error::internal("admission webhook denied the request")),
            _ => Ok(()),
        });
        let stored = api_rule.clone();
        mock.expect_get_api_rule()
            .returning(move |_, _| Ok(Some(stored.clone())));
        let s = statuses.clone();
        mock.expect_patch_api_rule_status()
            .returning(move |_, _, _, status| {
                s.lock().unwrap().push(status.clone());
                Ok(())
            });
        let ctx = Arc::new(Context::for_testing(Arc::new(mock)));

        let action = reconcile(Arc::new(api_rule), ctx).await.unwrap();
        assert_eq!(action, Action::requeue(Duration::from_secs(60)));

        let statuses = statuses.lock().unwrap();
        assert_eq!(statuses[0].virtual_service_status, Some(ResourceStatus::ok()));
        let access = statuses[0].access_rule_status.as_ref().unwrap();
        assert_eq!(access.code, StatusCode::Error);
        assert!(access.description.contains("admission webhook denied"));
    }

    #[tokio::test]
    async fn unchanged_status_is_not_rewritten() {
        let mut api_rule = sample_api_rule(vec![rule("/a", &["GET"], vec![Handler::named("allow")])]);
        let recorded = Arc::new(Recorded::default());
        let mut expected = status::processed(JwtHandler::Ory, &BTreeMap::new());
        expected.observed_generation = Some(2);
        api_rule.status = Some(expected);

        let mock = mock_cluster(None, vec![], &api_rule, recorded.clone());
        let ctx = Arc::new(Context::for_testing(Arc::new(mock)));

        reconcile(Arc::new(api_rule), ctx).await.unwrap();
        assert!(recorded.statuses.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn status_write_retries_on_conflict() {
        let api_rule = sample_api_rule(vec![]);
        let attempts = Arc::new(Mutex::new(0u32));

        let mut mock = MockGatewayKubeClient::new();
        let stored = api_rule.clone();
        mock.expect_get_api_rule()
            .returning(move |_, _| Ok(Some(stored.clone())));
        let a = attempts.clone();
        mock.expect_patch_api_rule_status()
            .returning(move |_, _, _, _| {
                let mut n = a.lock().unwrap();
                *n += 1;
                if *n == 1 {
                    Err(Error::from(kube::Error::Api(kube::core::ErrorResponse {
                        status: "Failure".to_string(),
                        message: "the object has been modified".to_string(),
                        reason: "Conflict".to_string(),
                        code: 409,
                    })))
                } else {
                    Ok(())
                }
            });

        write_status(&mock, &api_rule, &status::failed("boom"))
            .await
            .unwrap();
        assert_eq!(*attempts.lock().unwrap(), 2);
    }

    #[test]
    fn error_policy_requeues_after_a_minute() {
        let api_rule = Arc::new(sample_api_rule(vec![]));
        let ctx = Arc::new(Context::for_testing(Arc::new(MockGatewayKubeClient::new())));
        let action = error_policy(api_rule, &Error::internal("boom"), ctx);
        assert_eq!(action, Action::requeue(Duration::from_secs(60)));
    }
}
