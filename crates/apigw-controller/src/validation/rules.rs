//! Checks spanning the rule list: duplicates, blocked services, issuers

use std::collections::{BTreeMap, BTreeSet};

use apigw_common::crd::Rule;
use apigw_common::resources::JwtHeader;

use super::Failure;
use crate::handlers::{IstioJwtConfig, StrategyKind};

/// Two rules may not serve the same path and method
pub(super) fn validate_duplicates(path: &str, rules: &[Rule]) -> Vec<Failure> {
    let mut seen = BTreeSet::new();
    for rule in rules {
        let keys: Vec<String> = if rule.methods.is_empty() {
            vec![rule.path.clone()]
        } else {
            rule.methods
                .iter()
                .map(|m| format!("{}:{m}", rule.path))
                .collect()
        };
        for key in keys {
            if !seen.insert(key) {
                return vec![Failure::new(
                    path,
                    "multiple rules defined for the same path and method",
                )];
            }
        }
    }
    Vec::new()
}

/// Services that may never be exposed
pub(super) fn validate_service_blocklist(
    path: &str,
    name: &str,
    namespace: &str,
    blocklist: &BTreeMap<String, Vec<String>>,
) -> Vec<Failure> {
    let blocked = blocklist
        .get(namespace)
        .is_some_and(|services| services.iter().any(|s| s == name));
    if blocked {
        vec![Failure::new(
            format!("{path}.name"),
            format!("Service {name} in namespace {namespace} is blocklisted"),
        )]
    } else {
        Vec::new()
    }
}

/// Token location of one issuer
type TokenLocation = (Vec<JwtHeader>, Vec<String>);

/// Every rule trusting an issuer must read the token from the same place,
/// since they end up sharing one RequestAuthentication per workload
pub(super) fn validate_issuer_consistency(path: &str, rules: &[Rule]) -> Vec<Failure> {
    let mut locations: BTreeMap<String, TokenLocation> = BTreeMap::new();
    let mut failures = Vec::new();

    for (i, rule) in rules.iter().enumerate() {
        for (j, strategy) in rule.access_strategies.iter().enumerate() {
            if strategy.name != StrategyKind::Jwt.name() {
                continue;
            }
            let Ok(config) = IstioJwtConfig::from_handler(strategy) else {
                continue;
            };
            for (k, auth) in config.authentications.iter().enumerate() {
                let location = (auth.from_headers.clone(), auth.from_params.clone());
                match locations.get(&auth.issuer_key()) {
                    Some(known) if *known != location => failures.push(Failure::new(
                        format!("{path}[{i}].accessStrategies[{j}].config.authentications[{k}]"),
                        "multiple jwt configurations that differ for the same issuer",
                    )),
                    Some(_) => {}
                    None => {
                        locations.insert(auth.issuer_key(), location);
                    }
                }
            }
        }
    }

    failures
}
