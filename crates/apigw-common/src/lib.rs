//! Common types for the API gateway operator: the APIRule CRD, the downstream
//! resources it is translated into, errors and shared utilities

#![deny(missing_docs)]

pub mod config;
pub mod crd;
pub mod error;
pub mod kube_utils;
pub mod labels;
pub mod resources;
pub mod retry;

pub use config::{JwtHandler, OperatorSettings, ReconciliationConfig};
pub use error::Error;
pub use labels::OwnerLabels;

/// Result type alias using our custom Error type
pub type Result<T> = std::result::Result<T, Error>;

/// API group of the APIRule CRD
pub const API_GROUP: &str = "gateway.kyma-project.io";

/// Served version of the APIRule CRD
pub const API_VERSION: &str = "v1beta1";

/// Namespace of the operator and the Oathkeeper deployment
pub const KYMA_SYSTEM_NAMESPACE: &str = "kyma-system";

/// Name of the ConfigMap selecting the JWT handler
pub const CONFIG_MAP_NAME: &str = "api-gateway-config";

/// Data key inside the mode ConfigMap
pub const CONFIG_MAP_KEY: &str = "api-gateway-config";

/// Label carrying the authorization block index of a generated AuthorizationPolicy
pub const INDEX_LABEL: &str = "gateway.kyma-project.io/index";

/// Principal of the Istio ingress gateway
pub const INGRESS_GATEWAY_PRINCIPAL: &str =
    "cluster.local/ns/istio-system/sa/istio-ingressgateway-service-account";

/// Principal of the Oathkeeper proxy
pub const OATHKEEPER_PRINCIPAL: &str = "cluster.local/ns/kyma-system/sa/oathkeeper-maester-account";

/// Route timeout applied when neither the rule nor the spec sets one (seconds)
pub const DEFAULT_HTTP_TIMEOUT_SECS: u32 = 180;

/// Largest accepted timeout on a rule or spec (65 minutes, in seconds)
pub const MAX_TIMEOUT_SECS: u32 = 3900;
