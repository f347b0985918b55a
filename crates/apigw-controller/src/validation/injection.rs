use k8s_openapi::api::core::v1::Pod;
use kube::ResourceExt;

use apigw_common::resources::WorkloadSelector;

use super::Failure;
use crate::client::GatewayKubeClient;
use crate::workload::label_selector;

/// Container name of the Istio sidecar
const SIDECAR_CONTAINER: &str = "istio-proxy";

/// Every pod behind a JWT-protected service needs a sidecar, or the
/// RequestAuthentication is never enforced
pub(super) async fn validate_injection(
    strategy_path: &str,
    client: &dyn GatewayKubeClient,
    namespace: &str,
    selector: &WorkloadSelector,
) -> Vec<Failure> {
    let pods = match client.list_pods(namespace, &label_selector(selector)).await {
        Ok(pods) => pods,
        Err(e) => {
            return vec![Failure::new(
                format!("{strategy_path}.handler"),
                format!("Could not find pod for selected service, err: {e}"),
            )]
        }
    };

    pods.iter()
        .filter(|pod| !has_sidecar(pod))
        .map(|pod| {
            Failure::new(
                format!("{strategy_path}.injection"),
                format!(
                    "Pod {}/{} does not have an injected istio sidecar",
                    pod.namespace().unwrap_or_else(|| namespace.to_string()),
                    pod.name_any()
                ),
            )
        })
        .collect()
}

/// Regular or native (init) sidecar container
fn has_sidecar(pod: &Pod) -> bool {
    pod.spec.as_ref().is_some_and(|spec| {
        spec.containers
            .iter()
            .chain(spec.init_containers.iter().flatten())
            .any(|c| c.name == SIDECAR_CONTAINER)
    })
}
