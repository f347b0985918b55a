//! Processor sets per JWT handler mode
//!
//! Both modes list every downstream kind so that switching modes cleans up
//! what the previous mode created. Kinds outside the active mode run with an
//! empty desired set and never get a status of their own.

use apigw_common::resources::ResourceKind;
use apigw_common::JwtHandler;

use crate::processing::{
    AccessRuleCreator, AuthorizationPolicyCreator, Processor, RequestAuthenticationCreator,
    ResourceProcessor, VirtualServiceCreator,
};

/// Kinds produced by a mode, in processing order
pub fn active_kinds(mode: JwtHandler) -> &'static [ResourceKind] {
    match mode {
        JwtHandler::Ory => &[ResourceKind::VirtualService, ResourceKind::AccessRule],
        JwtHandler::Istio => &[
            ResourceKind::VirtualService,
            ResourceKind::RequestAuthentication,
            ResourceKind::AuthorizationPolicy,
        ],
    }
}

/// Whether `kind` is produced in `mode`
pub fn is_active(mode: JwtHandler, kind: ResourceKind) -> bool {
    active_kinds(mode).contains(&kind)
}

/// All processors for a mode: active kinds first, cleanup kinds after
pub fn processors(mode: JwtHandler) -> Vec<Box<dyn ResourceProcessor>> {
    fn pick<C: crate::processing::Creator + 'static>(
        mode: JwtHandler,
        kind: ResourceKind,
        creator: C,
    ) -> Box<dyn ResourceProcessor> {
        if is_active(mode, kind) {
            Box::new(Processor::active(creator))
        } else {
            Box::new(Processor::cleanup(creator))
        }
    }

    let mut all: Vec<Box<dyn ResourceProcessor>> = vec![
        pick(mode, ResourceKind::VirtualService, VirtualServiceCreator),
        pick(mode, ResourceKind::AccessRule, AccessRuleCreator),
        pick(mode, ResourceKind::RequestAuthentication, RequestAuthenticationCreator),
        pick(mode, ResourceKind::AuthorizationPolicy, AuthorizationPolicyCreator),
    ];
    all.sort_by_key(|p| !p.is_active());
    all
}

#[cfg(test)]
mod tests {
    use super::*;

    fn summary(mode: JwtHandler) -> Vec<(ResourceKind, bool)> {
        processors(mode)
            .iter()
            .map(|p| (p.kind(), p.is_active()))
            .collect()
    }

    #[test]
    fn proxy_mode_builds_routes_and_access_rules() {
        assert_eq!(
            summary(JwtHandler::Ory),
            vec![
                (ResourceKind::VirtualService, true),
                (ResourceKind::AccessRule, true),
                (ResourceKind::RequestAuthentication, false),
                (ResourceKind::AuthorizationPolicy, false),
            ]
        );
    }

    #[test]
    fn mesh_mode_builds_routes_and_istio_security() {
        assert_eq!(
            summary(JwtHandler::Istio),
            vec![
                (ResourceKind::VirtualService, true),
                (ResourceKind::RequestAuthentication, true),
                (ResourceKind::AuthorizationPolicy, true),
                (ResourceKind::AccessRule, false),
            ]
        );
        assert!(!is_active(JwtHandler::Istio, ResourceKind::AccessRule));
    }
}
