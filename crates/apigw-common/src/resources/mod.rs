//! Downstream resource types generated from APIRules
//!
//! - [`VirtualService`]: routing on the Istio gateway
//! - [`RequestAuthentication`]: JWT validation at the sidecar
//! - [`AuthorizationPolicy`]: claim-based access control at the sidecar
//! - [`AccessRule`]: Oathkeeper proxy rule

pub use istio::{
    AuthorizationPolicy, AuthorizationPolicySpec, AuthorizationRule, Condition, CorsPolicy,
    Destination, HeaderOperations, Headers, HttpMatchRequest, HttpRoute, HttpRouteDestination,
    JwtHeader, JwtRule, Operation, PortSelector, RequestAuthentication, RequestAuthenticationSpec,
    RuleFrom, RuleTo, Source, StringMatch, VirtualService, VirtualServiceSpec, WorkloadSelector,
};
pub use ory::{AccessRule, AccessRuleSpec, Match, Upstream};

use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::kube_utils::{HasApiResource, ObjectMeta};

/// Kinds of downstream resources managed per APIRule
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ResourceKind {
    /// networking.istio.io VirtualService
    VirtualService,
    /// oathkeeper.ory.sh Rule
    AccessRule,
    /// security.istio.io RequestAuthentication
    RequestAuthentication,
    /// security.istio.io AuthorizationPolicy
    AuthorizationPolicy,
}

impl ResourceKind {
    /// Kubernetes kind name
    pub fn kind(&self) -> &'static str {
        match self {
            ResourceKind::VirtualService => VirtualService::KIND,
            ResourceKind::AccessRule => AccessRule::KIND,
            ResourceKind::RequestAuthentication => RequestAuthentication::KIND,
            ResourceKind::AuthorizationPolicy => AuthorizationPolicy::KIND,
        }
    }

    /// ApiResource for dynamic API access
    pub fn api_resource(&self) -> kube::discovery::ApiResource {
        match self {
            ResourceKind::VirtualService => VirtualService::api_resource(),
            ResourceKind::AccessRule => AccessRule::api_resource(),
            ResourceKind::RequestAuthentication => RequestAuthentication::api_resource(),
            ResourceKind::AuthorizationPolicy => AuthorizationPolicy::api_resource(),
        }
    }
}

impl std::fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.kind())
    }
}

/// A downstream resource the operator creates, updates and deletes.
///
/// The diff engine only touches `spec` and `metadata.labels` of listed
/// objects; everything else on them is preserved.
pub trait ManagedResource: Clone + Serialize + DeserializeOwned + HasApiResource {
    /// Spec type copied from desired onto existing objects
    type Spec: Clone + PartialEq;

    /// Kind of this resource
    const RESOURCE_KIND: ResourceKind;

    /// Metadata
    fn metadata(&self) -> &ObjectMeta;
    /// Mutable metadata
    fn metadata_mut(&mut self) -> &mut ObjectMeta;
    /// Spec
    fn spec(&self) -> &Self::Spec;
    /// Replace the spec
    fn set_spec(&mut self, spec: Self::Spec);
}

/// Implement serde defaults, `new` and [`ManagedResource`] for a
/// `{ api_version, kind, metadata, spec }` resource implementing `HasApiResource`.
macro_rules! impl_managed_resource {
    ($type:ident, $spec:ty, $kind:expr) => {
        impl $type {
            fn default_api_version() -> String {
                <Self as HasApiResource>::API_VERSION.to_string()
            }
            fn default_kind() -> String {
                <Self as HasApiResource>::KIND.to_string()
            }

            /// Create a new resource
            pub fn new(metadata: ObjectMeta, spec: $spec) -> Self {
                Self {
                    api_version: Self::default_api_version(),
                    kind: Self::default_kind(),
                    metadata,
                    spec,
                }
            }
        }

        impl $crate::resources::ManagedResource for $type {
            type Spec = $spec;
            const RESOURCE_KIND: $crate::resources::ResourceKind = $kind;

            fn metadata(&self) -> &ObjectMeta {
                &self.metadata
            }
            fn metadata_mut(&mut self) -> &mut ObjectMeta {
                &mut self.metadata
            }
            fn spec(&self) -> &$spec {
                &self.spec
            }
            fn set_spec(&mut self, spec: $spec) {
                self.spec = spec;
            }
        }
    };
}

pub(crate) use impl_managed_resource;

mod istio;
mod ory;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kinds_resolve_to_their_api_groups() {
        let ar = ResourceKind::VirtualService.api_resource();
        assert_eq!(ar.api_version, "networking.istio.io/v1beta1");
        assert_eq!(ar.plural, "virtualservices");

        let ar = ResourceKind::AccessRule.api_resource();
        assert_eq!(ar.api_version, "oathkeeper.ory.sh/v1alpha1");
        assert_eq!(ar.kind, "Rule");

        let ar = ResourceKind::RequestAuthentication.api_resource();
        assert_eq!(ar.group, "security.istio.io");
        assert_eq!(ar.plural, "requestauthentications");

        assert_eq!(ResourceKind::AuthorizationPolicy.to_string(), "AuthorizationPolicy");
    }
}
