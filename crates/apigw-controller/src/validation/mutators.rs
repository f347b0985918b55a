//! Mutator checks for one rule
//!
//! In mesh mode only `header` and `cookie` exist and only JWT rules are
//! checked, since other rules never apply mutators. In proxy mode any
//! Oathkeeper mutator may be named.

use std::collections::{BTreeMap, BTreeSet};

use apigw_common::crd::Rule;
use apigw_common::JwtHandler;

use super::Failure;
use crate::handlers::{is_jwt_secured, CookieMutatorConfig, DecodeError, HeaderMutatorConfig, MutatorKind};

pub(super) fn validate_mutators(rule_path: &str, rule: &Rule, mode: JwtHandler) -> Vec<Failure> {
    if mode == JwtHandler::Istio && !is_jwt_secured(rule) {
        return Vec::new();
    }

    let base = format!("{rule_path}.mutators");
    let mut failures = Vec::new();
    let mut seen = BTreeSet::new();

    for (i, mutator) in rule.mutators.iter().enumerate() {
        if !seen.insert(mutator.name.as_str()) {
            failures.push(Failure::new(
                format!("{base}[{i}].handler.{}", mutator.name),
                "mutator for same handler already exists",
            ));
        }
    }

    for (i, mutator) in rule.mutators.iter().enumerate() {
        let handler_path = format!("{base}[{i}].handler");
        let config_path = format!("{handler_path}.config");

        if mutator.name.is_empty() {
            failures.push(Failure::new(handler_path, "mutator handler cannot be empty"));
            continue;
        }

        match MutatorKind::from_name(&mutator.name) {
            MutatorKind::Header => failures.extend(
                HeaderMutatorConfig::from_handler(mutator)
                    .map(|c| validate_entries(&config_path, "headers", &c.headers))
                    .unwrap_or_else(|e| vec![json_failure(&config_path, e)]),
            ),
            MutatorKind::Cookie => failures.extend(
                CookieMutatorConfig::from_handler(mutator)
                    .map(|c| validate_entries(&config_path, "cookies", &c.cookies))
                    .unwrap_or_else(|e| vec![json_failure(&config_path, e)]),
            ),
            MutatorKind::Passthrough(name) if mode == JwtHandler::Istio => {
                failures.push(Failure::new(handler_path, format!("unsupported mutator: {name}")));
            }
            MutatorKind::Passthrough(_) => {}
        }
    }

    failures
}

fn validate_entries(config_path: &str, field: &str, entries: &BTreeMap<String, String>) -> Vec<Failure> {
    if entries.is_empty() {
        return vec![Failure::new(config_path, format!("{field} cannot be empty"))];
    }
    if entries.keys().any(|k| k.is_empty()) {
        return vec![Failure::new(format!("{config_path}.{field}.name"), "cannot be empty")];
    }
    if entries.values().any(|v| v.is_empty()) {
        return vec![Failure::new(format!("{config_path}.{field}.value"), "cannot be empty")];
    }
    Vec::new()
}

fn json_failure(config_path: &str, error: DecodeError) -> Failure {
    Failure::new(config_path, error.to_string())
}

#[cfg(test)]
mod tests {
    use super::super::test_fixtures::{jwt, rule};
    use super::*;
    use apigw_common::crd::Handler;
    use serde_json::json;

    fn jwt_rule(mutators: Vec<Handler>) -> Rule {
        let mut r = rule("/a", &["GET"], vec![jwt("https://issuer.test/", "https://issuer.test/jwks")]);
        r.mutators = mutators;
        r
    }

    #[test]
    fn mesh_mode_skips_rules_without_jwt() {
        let mut r = rule("/a", &["GET"], vec![Handler::named("allow")]);
        r.mutators = vec![Handler::named("id_token")];
        assert!(validate_mutators(".spec.rules[0]", &r, JwtHandler::Istio).is_empty());
    }

    #[test]
    fn mesh_mode_rejects_oathkeeper_mutators() {
        let r = jwt_rule(vec![Handler::named("id_token"), Handler::named("")]);
        assert_eq!(
            validate_mutators(".spec.rules[0]", &r, JwtHandler::Istio),
            vec![
                Failure::new(".spec.rules[0].mutators[0].handler", "unsupported mutator: id_token"),
                Failure::new(".spec.rules[0].mutators[1].handler", "mutator handler cannot be empty"),
            ]
        );
        let r = jwt_rule(vec![Handler::named("id_token")]);
        assert!(validate_mutators(".spec.rules[0]", &r, JwtHandler::Ory).is_empty());
    }

    #[test]
    fn duplicates_name_the_handler() {
        let header = Handler::with_config("header", json!({"headers": {"X-A": "b"}}));
        let r = jwt_rule(vec![header.clone(), header]);
        assert_eq!(
            validate_mutators(".spec.rules[0]", &r, JwtHandler::Istio),
            vec![Failure::new(
                ".spec.rules[0].mutators[1].handler.header",
                "mutator for same handler already exists"
            )]
        );
    }

    #[test]
    fn header_and_cookie_maps_must_be_filled() {
        let r = jwt_rule(vec![
            Handler::named("header"),
            Handler::with_config("cookie", json!({"cookies": {"": "x"}})),
        ]);
        assert_eq!(
            validate_mutators(".spec.rules[0]", &r, JwtHandler::Istio),
            vec![
                Failure::new(".spec.rules[0].mutators[0].handler.config", "headers cannot be empty"),
                Failure::new(".spec.rules[0].mutators[1].handler.config.cookies.name", "cannot be empty"),
            ]
        );

        let r = jwt_rule(vec![Handler::with_config("header", json!({"headers": {"X-A": ""}}))]);
        assert_eq!(
            validate_mutators(".spec.rules[0]", &r, JwtHandler::Ory),
            vec![Failure::new(".spec.rules[0].mutators[0].handler.config.headers.value", "cannot be empty")]
        );
    }

    #[test]
    fn malformed_mutator_config_is_reported() {
        let r = jwt_rule(vec![Handler::with_config("header", json!({"headers": ["X-A"]}))]);
        let failures = validate_mutators(".spec.rules[0]", &r, JwtHandler::Istio);
        assert_eq!(failures.len(), 1);
        assert!(failures[0].message.starts_with("Can't read json: "));
    }
}
