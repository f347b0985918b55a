//! AuthorizationPolicies for mesh mode
//!
//! Once any rule uses `jwt`, every rule gets policies: Istio switches a
//! workload to deny-by-default as soon as one ALLOW policy selects it, so
//! paths without JWT need their own policy to stay reachable.
//!
//! Each authorization block of a rule becomes its own policy, labelled with
//! the block's index. Required scopes fan out over the three claim names
//! issuers use for scopes; audiences are conjoined with them.

use std::collections::BTreeMap;

use apigw_common::crd::Rule;
use apigw_common::resources::{
    AuthorizationPolicy, AuthorizationPolicySpec, AuthorizationRule, Condition, Operation,
    RuleFrom, RuleTo, Source,
};
use apigw_common::{INDEX_LABEL, INGRESS_GATEWAY_PRINCIPAL, OATHKEEPER_PRINCIPAL};

use super::virtual_service::WILDCARD_PATH;
use super::{BuildContext, RuleTarget};
use crate::handlers::{has_strategy, is_jwt_secured, istio_jwt_configs, JwtAuthorization, StrategyKind};
use crate::workload::label_selector;

/// Claim names carrying scopes, any one of them may match
pub const SCOPE_CLAIM_KEYS: [&str; 3] = [
    "request.auth.claims[scp]",
    "request.auth.claims[scope]",
    "request.auth.claims[scopes]",
];

/// Attribute carrying the token audiences
pub const AUDIENCE_KEY: &str = "request.auth.audiences";

/// Diff key: workload, methods, path, namespace and authorization index
pub fn key(resource: &AuthorizationPolicy) -> String {
    let selector = resource
        .spec
        .selector
        .as_ref()
        .map(label_selector)
        .unwrap_or_default();
    let operation = resource
        .spec
        .rules
        .first()
        .and_then(|r| r.to.first())
        .map(|to| {
            let mut methods = to.operation.methods.clone();
            methods.sort();
            format!("{}:{}", methods.join(","), to.operation.paths.join(","))
        })
        .unwrap_or_default();
    let index = resource
        .metadata
        .labels
        .get(INDEX_LABEL)
        .map(String::as_str)
        .unwrap_or("0");
    format!(
        "{selector}:{operation}:{}:{index}",
        resource.metadata.namespace
    )
}

/// Build the AuthorizationPolicies of an APIRule
pub fn build(ctx: &BuildContext<'_>) -> BTreeMap<String, AuthorizationPolicy> {
    let mut result = BTreeMap::new();
    if !ctx.api_rule.spec.rules.iter().any(is_jwt_secured) {
        return result;
    }

    for target in ctx.targets() {
        let blocks: Vec<JwtAuthorization> = istio_jwt_configs(target.rule)
            .iter()
            .flat_map(|c| c.authorization_blocks())
            .collect();

        if blocks.is_empty() {
            let policy = policy(ctx, &target, &JwtAuthorization::default(), 0);
            result.insert(key(&policy), policy);
        } else {
            for (index, block) in blocks.iter().enumerate() {
                let policy = policy(ctx, &target, block, index);
                result.insert(key(&policy), policy);
            }
        }
    }

    result
}

fn policy(
    ctx: &BuildContext<'_>,
    target: &RuleTarget<'_>,
    block: &JwtAuthorization,
    index: usize,
) -> AuthorizationPolicy {
    let base = AuthorizationRule {
        from: vec![RuleFrom {
            source: source(target.rule),
        }],
        to: vec![RuleTo {
            operation: operation(target.rule),
        }],
        when: Vec::new(),
    };
    let audiences: Vec<Condition> = block
        .audience_list()
        .iter()
        .map(|aud| condition(AUDIENCE_KEY, aud))
        .collect();

    let rules = if block.scopes().is_empty() {
        vec![AuthorizationRule {
            when: audiences,
            ..base
        }]
    } else {
        SCOPE_CLAIM_KEYS
            .iter()
            .map(|claim| {
                let mut when: Vec<Condition> = block
                    .scopes()
                    .iter()
                    .map(|scope| condition(claim, scope))
                    .collect();
                when.extend(audiences.iter().cloned());
                AuthorizationRule {
                    when,
                    ..base.clone()
                }
            })
            .collect()
    };

    AuthorizationPolicy::new(
        ctx.metadata(target.namespace)
            .with_label(INDEX_LABEL, index.to_string()),
        AuthorizationPolicySpec {
            selector: Some(ctx.selector(target)),
            action: String::new(),
            rules,
        },
    )
}

fn condition(key: &str, value: &str) -> Condition {
    Condition {
        key: key.to_string(),
        values: vec![value.to_string()],
    }
}

/// Who may call the path, decided by the rule's strategy mix
fn source(rule: &Rule) -> Source {
    let principals = |p: &str| Source {
        principals: vec![p.to_string()],
        ..Default::default()
    };

    if !is_jwt_secured(rule)
        || has_strategy(rule, StrategyKind::Allow)
        || has_strategy(rule, StrategyKind::NoAuth)
    {
        principals(INGRESS_GATEWAY_PRINCIPAL)
    } else if has_strategy(rule, StrategyKind::Noop)
        || has_strategy(rule, StrategyKind::Oauth2Introspection)
    {
        principals(OATHKEEPER_PRINCIPAL)
    } else {
        Source {
            request_principals: vec!["*".to_string()],
            ..Default::default()
        }
    }
}

fn operation(rule: &Rule) -> Operation {
    let path = if rule.path == WILDCARD_PATH {
        "/*".to_string()
    } else {
        rule.path.clone()
    };
    Operation {
        methods: rule.methods.clone(),
        paths: vec![path],
    }
}
