//! RequestAuthentications for JWT rules in mesh mode
//!
//! Rules sharing a workload and an issuer set collapse into one resource.

use std::collections::BTreeMap;

use apigw_common::resources::{JwtRule, RequestAuthentication, RequestAuthenticationSpec};

use super::BuildContext;
use crate::handlers::{is_jwt_secured, istio_jwt_configs};
use crate::workload::label_selector;

/// Diff key: workload selector, issuers and namespace
pub fn key(resource: &RequestAuthentication) -> String {
    let selector = resource
        .spec
        .selector
        .as_ref()
        .map(label_selector)
        .unwrap_or_default();
    let issuers = resource
        .spec
        .jwt_rules
        .iter()
        .map(|r| format!("{}:{}", r.issuer, r.jwks_uri))
        .collect::<Vec<_>>()
        .join("|");
    format!("{selector}:{issuers}:{}", resource.metadata.namespace)
}

/// Build the RequestAuthentications of an APIRule
pub fn build(ctx: &BuildContext<'_>) -> BTreeMap<String, RequestAuthentication> {
    let mut result = BTreeMap::new();

    for target in ctx.targets() {
        if !is_jwt_secured(target.rule) {
            continue;
        }

        let jwt_rules: Vec<JwtRule> = istio_jwt_configs(target.rule)
            .into_iter()
            .flat_map(|config| config.authentications)
            .map(|auth| JwtRule {
                issuer: auth.issuer,
                jwks_uri: auth.jwks_uri,
                from_headers: auth.from_headers,
                from_params: auth.from_params,
                forward_original_token: true,
            })
            .collect();
        if jwt_rules.is_empty() {
            continue;
        }

        let resource = RequestAuthentication::new(
            ctx.metadata(target.namespace),
            RequestAuthenticationSpec {
                selector: Some(ctx.selector(&target)),
                jwt_rules,
            },
        );
        result.insert(key(&resource), resource);
    }

    result
}
