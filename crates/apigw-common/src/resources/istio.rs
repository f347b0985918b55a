//! Istio resource types
//!
//! - VirtualService: gateway routing for the exposed host
//! - RequestAuthentication: JWT issuer/JWKS configuration for a workload
//! - AuthorizationPolicy: ALLOW rules with principal, operation and claim conditions

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use super::{impl_managed_resource, ResourceKind};
use crate::kube_utils::{HasApiResource, ObjectMeta};

// =============================================================================
// VirtualService
// =============================================================================

/// Istio VirtualService routing the APIRule host
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct VirtualService {
    /// API version
    #[serde(default = "VirtualService::default_api_version")]
    pub api_version: String,
    /// Kind
    #[serde(default = "VirtualService::default_kind")]
    pub kind: String,
    /// Metadata
    pub metadata: ObjectMeta,
    /// Spec
    pub spec: VirtualServiceSpec,
}

impl HasApiResource for VirtualService {
    const API_VERSION: &'static str = "networking.istio.io/v1beta1";
    const KIND: &'static str = "VirtualService";
}

impl_managed_resource!(VirtualService, VirtualServiceSpec, ResourceKind::VirtualService);

/// VirtualService spec
#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct VirtualServiceSpec {
    /// Hosts served
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub hosts: Vec<String>,
    /// Gateways the routes bind to
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub gateways: Vec<String>,
    /// HTTP routes, matched in order
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub http: Vec<HttpRoute>,
}

/// One HTTP route
#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct HttpRoute {
    /// Match conditions (OR)
    #[serde(default, rename = "match", skip_serializing_if = "Vec::is_empty")]
    pub matches: Vec<HttpMatchRequest>,
    /// Destinations
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub route: Vec<HttpRouteDestination>,
    /// CORS policy
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cors_policy: Option<CorsPolicy>,
    /// Header manipulation
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub headers: Option<Headers>,
    /// Request timeout (e.g. "180s")
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout: Option<String>,
}

/// Match conditions of a route (AND)
#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq)]
pub struct HttpMatchRequest {
    /// URI match
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub uri: Option<StringMatch>,
    /// Method match
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub method: Option<StringMatch>,
}

/// Istio string match, exactly one variant set
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum StringMatch {
    /// Exact match
    Exact(String),
    /// Prefix match
    Prefix(String),
    /// RE2 regex match
    Regex(String),
}

/// Weighted destination of a route
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct HttpRouteDestination {
    /// Destination
    pub destination: Destination,
    /// Weight
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub weight: Option<i32>,
}

/// Destination service
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct Destination {
    /// Fully qualified service host
    pub host: String,
    /// Port
    pub port: PortSelector,
}

/// Destination port
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct PortSelector {
    /// Port number
    pub number: u32,
}

/// CORS policy of a route
#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct CorsPolicy {
    /// Allowed origins
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub allow_origins: Vec<StringMatch>,
    /// Allowed methods
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub allow_methods: Vec<String>,
    /// Allowed headers
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub allow_headers: Vec<String>,
}

/// Header operations on requests and responses
#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq)]
pub struct Headers {
    /// Request header operations
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub request: Option<HeaderOperations>,
    /// Response header operations
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub response: Option<HeaderOperations>,
}

/// Header set/add/remove operations
#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq)]
pub struct HeaderOperations {
    /// Overwrite headers
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub set: BTreeMap<String, String>,
    /// Append headers
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub add: BTreeMap<String, String>,
    /// Remove headers
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub remove: Vec<String>,
}

// =============================================================================
// RequestAuthentication
// =============================================================================

/// Istio RequestAuthentication validating JWTs for a workload
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct RequestAuthentication {
    /// API version
    #[serde(default = "RequestAuthentication::default_api_version")]
    pub api_version: String,
    /// Kind
    #[serde(default = "RequestAuthentication::default_kind")]
    pub kind: String,
    /// Metadata
    pub metadata: ObjectMeta,
    /// Spec
    pub spec: RequestAuthenticationSpec,
}

impl HasApiResource for RequestAuthentication {
    const API_VERSION: &'static str = "security.istio.io/v1beta1";
    const KIND: &'static str = "RequestAuthentication";
}

impl_managed_resource!(
    RequestAuthentication,
    RequestAuthenticationSpec,
    ResourceKind::RequestAuthentication
);

/// RequestAuthentication spec
#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct RequestAuthenticationSpec {
    /// Workloads the rules apply to
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub selector: Option<WorkloadSelector>,
    /// Accepted issuers
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub jwt_rules: Vec<JwtRule>,
}

/// One accepted JWT issuer
#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct JwtRule {
    /// Issuer
    pub issuer: String,
    /// JWKS location
    pub jwks_uri: String,
    /// Headers the token is read from
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub from_headers: Vec<JwtHeader>,
    /// Query parameters the token is read from
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub from_params: Vec<String>,
    /// Forward the token to the workload
    #[serde(default)]
    pub forward_original_token: bool,
}

/// Header carrying a JWT
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct JwtHeader {
    /// Header name
    pub name: String,
    /// Value prefix (e.g. "Bearer ")
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub prefix: String,
}

// =============================================================================
// AuthorizationPolicy
// =============================================================================

/// Istio AuthorizationPolicy allowing requests to one rule of an APIRule
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct AuthorizationPolicy {
    /// API version
    #[serde(default = "AuthorizationPolicy::default_api_version")]
    pub api_version: String,
    /// Kind
    #[serde(default = "AuthorizationPolicy::default_kind")]
    pub kind: String,
    /// Metadata
    pub metadata: ObjectMeta,
    /// Spec
    pub spec: AuthorizationPolicySpec,
}

impl HasApiResource for AuthorizationPolicy {
    const API_VERSION: &'static str = "security.istio.io/v1beta1";
    const KIND: &'static str = "AuthorizationPolicy";
}

impl_managed_resource!(
    AuthorizationPolicy,
    AuthorizationPolicySpec,
    ResourceKind::AuthorizationPolicy
);

/// AuthorizationPolicy spec
#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct AuthorizationPolicySpec {
    /// Workloads the policy applies to
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub selector: Option<WorkloadSelector>,
    /// Action: ALLOW, DENY, AUDIT, CUSTOM (empty = ALLOW)
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub action: String,
    /// Rules (OR)
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub rules: Vec<AuthorizationRule>,
}

/// Workload selector
#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct WorkloadSelector {
    /// Match labels
    pub match_labels: BTreeMap<String, String>,
}

/// Authorization rule: all of `from`, `to` and `when` must hold
#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq)]
pub struct AuthorizationRule {
    /// Source conditions
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub from: Vec<RuleFrom>,
    /// Operation conditions
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub to: Vec<RuleTo>,
    /// Request attribute conditions (AND)
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub when: Vec<Condition>,
}

/// Source wrapper
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct RuleFrom {
    /// Source
    pub source: Source,
}

/// Caller identity
#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Source {
    /// Peer principals
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub principals: Vec<String>,
    /// JWT request principals (`iss/sub`)
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub request_principals: Vec<String>,
}

/// Operation wrapper
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct RuleTo {
    /// Operation
    pub operation: Operation,
}

/// HTTP operation
#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq)]
pub struct Operation {
    /// Methods
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub methods: Vec<String>,
    /// Paths
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub paths: Vec<String>,
}

/// Request attribute condition
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct Condition {
    /// Attribute key (e.g. "request.auth.claims[scp]")
    pub key: String,
    /// Accepted values (OR)
    pub values: Vec<String>,
}
