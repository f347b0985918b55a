//! Controller runner - wires the APIRule controller onto the watch stream

use std::sync::Arc;

use futures::StreamExt;
use kube::runtime::controller::Config as ControllerConfig;
use kube::runtime::watcher::Config as WatcherConfig;
use kube::runtime::Controller;
use kube::{Api, Client};

use apigw_common::crd::ApiRule;
use apigw_common::OperatorSettings;
use apigw_controller::{error_policy, reconcile, Context, RequeuePeriods};

/// Watcher timeout (seconds) - must be less than client read_timeout (30s)
/// This forces the API server to close the watch before the client times out,
/// preventing "body read timed out" errors on idle watches.
const WATCH_TIMEOUT_SECS: u32 = 25;

/// Run the APIRule controller until a shutdown signal arrives
pub async fn run_api_rule_controller(
    client: Client,
    settings: OperatorSettings,
    periods: RequeuePeriods,
    (config_map_namespace, config_map_name): (String, String),
    max_concurrent_reconciles: u16,
) {
    let ctx = Arc::new(
        Context::from_client(client.clone(), settings, periods)
            .with_config_map(config_map_namespace, config_map_name),
    );
    let api_rules: Api<ApiRule> = Api::all(client);

    tracing::info!(
        concurrency = max_concurrent_reconciles,
        "- APIRule controller"
    );

    Controller::new(
        api_rules,
        WatcherConfig::default().timeout(WATCH_TIMEOUT_SECS),
    )
    .with_config(ControllerConfig::default().concurrency(max_concurrent_reconciles))
    .shutdown_on_signal()
    .run(reconcile, error_policy, ctx)
    .for_each(log_reconcile_result("APIRule"))
    .await;
}

/// Creates a closure for logging reconciliation results.
fn log_reconcile_result<T: std::fmt::Debug, E: std::fmt::Debug>(
    controller_name: &'static str,
) -> impl Fn(Result<T, E>) -> std::future::Ready<()> {
    move |result| {
        match result {
            Ok(action) => tracing::debug!(?action, "{} reconciliation completed", controller_name),
            Err(e) => tracing::error!(error = ?e, "{} reconciliation error", controller_name),
        }
        std::future::ready(())
    }
}
