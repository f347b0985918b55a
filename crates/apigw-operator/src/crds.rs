//! APIRule CRD output and installation

use k8s_openapi::apiextensions_apiserver::pkg::apis::apiextensions::v1::CustomResourceDefinition;
use kube::api::{Api, Patch, PatchParams};
use kube::{Client, CustomResourceExt};

use apigw_common::crd::ApiRule;

/// Field manager for CRD installation
const CRD_FIELD_MANAGER: &str = "api-gateway-operator";

/// The APIRule CRD rendered as YAML
pub fn crd_yaml() -> anyhow::Result<String> {
    serde_yaml::to_string(&ApiRule::crd())
        .map_err(|e| anyhow::anyhow!("failed to serialize APIRule CRD: {}", e))
}

/// Install or update the APIRule CRD using server-side apply
pub async fn install(client: &Client) -> anyhow::Result<()> {
    let crds: Api<CustomResourceDefinition> = Api::all(client.clone());
    let params = PatchParams::apply(CRD_FIELD_MANAGER).force();
    let name = ApiRule::crd_name();

    tracing::info!("Installing {} CRD...", name);
    crds.patch(name, &params, &Patch::Apply(&ApiRule::crd()))
        .await
        .map_err(|e| anyhow::anyhow!("failed to install {} CRD: {}", name, e))?;
    tracing::info!("APIRule CRD installed/updated");
    Ok(())
}
