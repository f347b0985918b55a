//! VirtualService: one per APIRule, routing every distinct path

use std::collections::{BTreeMap, BTreeSet};

use kube::ResourceExt;

use apigw_common::crd::Rule;
use apigw_common::resources::{
    Destination, HeaderOperations, Headers, HttpMatchRequest, HttpRoute, HttpRouteDestination,
    PortSelector, StringMatch, VirtualService, VirtualServiceSpec,
};
use apigw_common::{Error, JwtHandler, DEFAULT_HTTP_TIMEOUT_SECS};

use super::{service_host, BuildContext, RuleTarget};
use crate::handlers::{has_strategy, is_jwt_secured, requires_proxy, RequestMutations, StrategyKind};

/// Path matching every request
pub const WILDCARD_PATH: &str = "/.*";

/// Header carrying the exposed host to the backend
const FORWARDED_HOST_HEADER: &str = "x-forwarded-host";

/// Build the VirtualService of an APIRule
pub fn build(ctx: &BuildContext<'_>) -> Result<VirtualService, Error> {
    let host = ctx.host();
    let mut seen_paths = BTreeSet::new();
    let mut http = Vec::new();

    for target in ctx.targets() {
        if !seen_paths.insert(target.rule.path.as_str()) {
            continue;
        }
        http.push(route(ctx, &target, &host)?);
    }

    Ok(VirtualService::new(
        ctx.metadata(&ctx.namespace()),
        VirtualServiceSpec {
            hosts: vec![host],
            gateways: vec![ctx.api_rule.spec.gateway.clone()],
            http,
        },
    ))
}

fn route(ctx: &BuildContext<'_>, target: &RuleTarget<'_>, host: &str) -> Result<HttpRoute, Error> {
    let rule = target.rule;
    let mode = ctx.config.mode;
    let settings = &ctx.config.settings;

    let (destination_host, port) = if requires_proxy(rule, mode) {
        (settings.oathkeeper_service.clone(), settings.oathkeeper_port)
    } else {
        (
            service_host(&target.service.name, target.namespace),
            target.service.port,
        )
    };

    let uri = if mode == JwtHandler::Istio && rule.path == WILDCARD_PATH {
        StringMatch::Prefix("/".to_string())
    } else {
        StringMatch::Regex(rule.path.clone())
    };
    let method = (restricts_methods(rule, mode) && !rule.methods.is_empty())
        .then(|| StringMatch::Regex(format!("^({})$", rule.methods.join("|"))));

    let mut cors = settings.cors.clone();
    if !rule.methods.is_empty() {
        cors.allow_methods = rule.methods.clone();
    }

    let mut set = BTreeMap::from([(FORWARDED_HOST_HEADER.to_string(), host.to_string())]);
    if mode == JwtHandler::Istio && is_jwt_secured(rule) {
        let mutations = RequestMutations::from_rule(rule).map_err(|e| {
            Error::validation_for_field(ctx.api_rule.name_any(), "mutators", e.to_string())
        })?;
        set.extend(mutations.headers);
    }

    let timeout = ctx
        .api_rule
        .spec
        .effective_timeout(rule, DEFAULT_HTTP_TIMEOUT_SECS);

    Ok(HttpRoute {
        matches: vec![HttpMatchRequest {
            uri: Some(uri),
            method,
        }],
        route: vec![HttpRouteDestination {
            destination: Destination {
                host: destination_host,
                port: PortSelector { number: port },
            },
            weight: None,
        }],
        cors_policy: Some(cors),
        headers: Some(Headers {
            request: Some(HeaderOperations {
                set,
                ..Default::default()
            }),
            response: None,
        }),
        timeout: Some(format!("{timeout}s")),
    })
}

/// Whether the route itself has to enforce the rule's method list
fn restricts_methods(rule: &Rule, mode: JwtHandler) -> bool {
    match mode {
        JwtHandler::Ory => has_strategy(rule, StrategyKind::NoAuth),
        JwtHandler::Istio => !has_strategy(rule, StrategyKind::Allow),
    }
}
