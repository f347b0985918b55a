//! Oathkeeper access rules for the paths the proxy enforces

use std::collections::BTreeMap;

use apigw_common::crd::Handler;
use apigw_common::resources::{AccessRule, AccessRuleSpec, Match, Upstream};

use super::{service_host, BuildContext};
use crate::handlers::requires_proxy;

/// Authorizer set on every generated rule
const DEFAULT_AUTHORIZER: &str = "allow";

/// Build the access rules of an APIRule, keyed by match URL and methods
pub fn build(ctx: &BuildContext<'_>) -> BTreeMap<String, AccessRule> {
    let host = ctx.host();
    let namespace = ctx.namespace();

    ctx.targets()
        .into_iter()
        .filter(|target| requires_proxy(target.rule, ctx.config.mode))
        .map(|target| {
            let rule = target.rule;
            let spec = AccessRuleSpec {
                upstream: Upstream {
                    url: format!(
                        "http://{}:{}",
                        service_host(&target.service.name, target.namespace),
                        target.service.port
                    ),
                    preserve_host: None,
                    strip_path: None,
                },
                matcher: Match {
                    url: format!("<http|https>://{host}<{}>", rule.path),
                    methods: rule.methods.clone(),
                },
                authenticators: rule.access_strategies.clone(),
                authorizer: Some(Handler::named(DEFAULT_AUTHORIZER)),
                mutators: rule.mutators.clone(),
            };
            (spec.key(), AccessRule::new(ctx.metadata(&namespace), spec))
        })
        .collect()
}
