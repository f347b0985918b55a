//! Cluster access for APIRule reconciliation
//!
//! All reads and writes go through [`GatewayKubeClient`] so validators,
//! processors and the controller can be tested against a mock.

use async_trait::async_trait;
use k8s_openapi::api::core::v1::{ConfigMap, Pod, Service};
use kube::api::{Api, DeleteParams, DynamicObject, ListParams, Patch, PatchParams, PostParams};
use kube::Client;
use tracing::{debug, warn};

#[cfg(test)]
use mockall::automock;

use apigw_common::crd::{ApiRule, ApiRuleStatus};
use apigw_common::resources::{ResourceKind, VirtualService};
use apigw_common::Error;

/// Field manager recorded on writes
pub const FIELD_MANAGER: &str = "api-gateway-controller";

/// Trait abstracting Kubernetes client operations for APIRules
#[cfg_attr(test, automock)]
#[async_trait]
pub trait GatewayKubeClient: Send + Sync {
    /// List resources of `kind` in all namespaces matching a label selector
    async fn list_owned(
        &self,
        kind: ResourceKind,
        label_selector: &str,
    ) -> Result<Vec<serde_json::Value>, Error>;

    /// List all VirtualServices in the cluster
    async fn list_virtual_services(&self) -> Result<Vec<VirtualService>, Error>;

    /// Get a Service by namespace and name
    async fn get_service(&self, namespace: &str, name: &str) -> Result<Option<Service>, Error>;

    /// List pods in a namespace matching a label selector
    async fn list_pods(&self, namespace: &str, label_selector: &str) -> Result<Vec<Pod>, Error>;

    /// Get a ConfigMap by namespace and name
    async fn get_config_map(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<Option<ConfigMap>, Error>;

    /// Create a resource of `kind`
    async fn create(&self, kind: ResourceKind, object: &serde_json::Value) -> Result<(), Error>;

    /// Replace an existing resource of `kind`
    async fn update(&self, kind: ResourceKind, object: &serde_json::Value) -> Result<(), Error>;

    /// Delete a resource of `kind`; a missing resource is not an error
    async fn delete(&self, kind: ResourceKind, namespace: &str, name: &str) -> Result<(), Error>;

    /// Get an APIRule by namespace and name
    async fn get_api_rule(&self, namespace: &str, name: &str) -> Result<Option<ApiRule>, Error>;

    /// Write an APIRule status, guarded by `resource_version` when given
    async fn patch_api_rule_status(
        &self,
        namespace: &str,
        name: &str,
        resource_version: Option<String>,
        status: &ApiRuleStatus,
    ) -> Result<(), Error>;
}

/// Real Kubernetes client implementation
pub struct GatewayKubeClientImpl {
    client: Client,
}

impl GatewayKubeClientImpl {
    /// Wrap a kube client
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    fn dynamic_api(&self, kind: ResourceKind, namespace: &str) -> Api<DynamicObject> {
        Api::namespaced_with(self.client.clone(), namespace, &kind.api_resource())
    }
}

/// Namespace and name of a serialized object
fn object_ref(kind: ResourceKind, object: &serde_json::Value) -> Result<(String, String), Error> {
    let metadata = &object["metadata"];
    let namespace = metadata["namespace"].as_str().unwrap_or_default();
    if namespace.is_empty() {
        return Err(Error::serialization_for_kind(
            kind.kind(),
            "object has no namespace",
        ));
    }
    let name = metadata["name"].as_str().unwrap_or_default();
    Ok((namespace.to_string(), name.to_string()))
}

fn to_dynamic(kind: ResourceKind, object: &serde_json::Value) -> Result<DynamicObject, Error> {
    serde_json::from_value(object.clone())
        .map_err(|e| Error::serialization_for_kind(kind.kind(), e.to_string()))
}

#[async_trait]
impl GatewayKubeClient for GatewayKubeClientImpl {
    async fn list_owned(
        &self,
        kind: ResourceKind,
        label_selector: &str,
    ) -> Result<Vec<serde_json::Value>, Error> {
        let api: Api<DynamicObject> = Api::all_with(self.client.clone(), &kind.api_resource());
        let list = api
            .list(&ListParams::default().labels(label_selector))
            .await?;
        list.items
            .into_iter()
            .map(|obj| serde_json::to_value(obj).map_err(Error::from))
            .collect()
    }

    async fn list_virtual_services(&self) -> Result<Vec<VirtualService>, Error> {
        let api: Api<DynamicObject> =
            Api::all_with(self.client.clone(), &ResourceKind::VirtualService.api_resource());
        let list = api.list(&ListParams::default()).await?;

        let mut result = Vec::with_capacity(list.items.len());
        for obj in list.items {
            let name = obj.metadata.name.clone().unwrap_or_default();
            match serde_json::to_value(obj).and_then(serde_json::from_value) {
                Ok(vs) => result.push(vs),
                Err(e) => warn!(virtual_service = %name, error = %e, "skipping unreadable VirtualService"),
            }
        }
        Ok(result)
    }

    async fn get_service(&self, namespace: &str, name: &str) -> Result<Option<Service>, Error> {
        let api: Api<Service> = Api::namespaced(self.client.clone(), namespace);
        match api.get(name).await {
            Ok(svc) => Ok(Some(svc)),
            Err(kube::Error::Api(ae)) if ae.code == 404 => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    async fn list_pods(&self, namespace: &str, label_selector: &str) -> Result<Vec<Pod>, Error> {
        let api: Api<Pod> = Api::namespaced(self.client.clone(), namespace);
        let list = api
            .list(&ListParams::default().labels(label_selector))
            .await?;
        Ok(list.items)
    }

    async fn get_config_map(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<Option<ConfigMap>, Error> {
        let api: Api<ConfigMap> = Api::namespaced(self.client.clone(), namespace);
        match api.get(name).await {
            Ok(cm) => Ok(Some(cm)),
            Err(kube::Error::Api(ae)) if ae.code == 404 => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    async fn create(&self, kind: ResourceKind, object: &serde_json::Value) -> Result<(), Error> {
        let (namespace, _) = object_ref(kind, object)?;
        let obj = to_dynamic(kind, object)?;
        let pp = PostParams {
            field_manager: Some(FIELD_MANAGER.to_string()),
            ..Default::default()
        };
        let created = self.dynamic_api(kind, &namespace).create(&pp, &obj).await?;
        debug!(kind = %kind, namespace = %namespace, name = ?created.metadata.name, "created");
        Ok(())
    }

    async fn update(&self, kind: ResourceKind, object: &serde_json::Value) -> Result<(), Error> {
        let (namespace, name) = object_ref(kind, object)?;
        let obj = to_dynamic(kind, object)?;
        let pp = PostParams {
            field_manager: Some(FIELD_MANAGER.to_string()),
            ..Default::default()
        };
        self.dynamic_api(kind, &namespace)
            .replace(&name, &pp, &obj)
            .await?;
        debug!(kind = %kind, namespace = %namespace, name = %name, "updated");
        Ok(())
    }

    async fn delete(&self, kind: ResourceKind, namespace: &str, name: &str) -> Result<(), Error> {
        match self
            .dynamic_api(kind, namespace)
            .delete(name, &DeleteParams::default())
            .await
        {
            Ok(_) => {
                debug!(kind = %kind, namespace = %namespace, name = %name, "deleted");
                Ok(())
            }
            Err(kube::Error::Api(ae)) if ae.code == 404 => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    async fn get_api_rule(&self, namespace: &str, name: &str) -> Result<Option<ApiRule>, Error> {
        let api: Api<ApiRule> = Api::namespaced(self.client.clone(), namespace);
        match api.get(name).await {
            Ok(rule) => Ok(Some(rule)),
            Err(kube::Error::Api(ae)) if ae.code == 404 => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    async fn patch_api_rule_status(
        &self,
        namespace: &str,
        name: &str,
        resource_version: Option<String>,
        status: &ApiRuleStatus,
    ) -> Result<(), Error> {
        let api: Api<ApiRule> = Api::namespaced(self.client.clone(), namespace);
        let mut patch = serde_json::json!({ "status": status });
        if let Some(rv) = resource_version {
            patch["metadata"] = serde_json::json!({ "resourceVersion": rv });
        }

        api.patch_status(
            name,
            &PatchParams::apply(FIELD_MANAGER),
            &Patch::Merge(&patch),
        )
        .await?;

        Ok(())
    }
}
