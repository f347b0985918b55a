//! Access strategy checks for one rule

use apigw_common::crd::Authenticator;
use apigw_common::resources::WorkloadSelector;
use apigw_common::JwtHandler;

use super::{injection, jwt, Failure};
use crate::client::GatewayKubeClient;
use crate::handlers::{AccessStrategy, DecodeError, JwtConfig, StrategyKind};

/// What strategy checks need to know about the rule's environment
pub(super) struct StrategyContext<'a> {
    pub mode: JwtHandler,
    pub client: &'a dyn GatewayKubeClient,
    pub selector: WorkloadSelector,
    pub namespace: &'a str,
}

pub(super) async fn validate_access_strategies(
    path: &str,
    strategies: &[Authenticator],
    ctx: &StrategyContext<'_>,
) -> Vec<Failure> {
    if strategies.is_empty() {
        return vec![Failure::new(path, "No accessStrategies defined")];
    }

    let mut failures = Vec::new();
    failures.extend(validate_exclusivity(path, strategies, ctx.mode));
    failures.extend(validate_security_mix(path, strategies));

    for (i, handler) in strategies.iter().enumerate() {
        let strategy_path = format!("{path}[{i}]");

        let kind = StrategyKind::from_name(&handler.name);
        if !kind.is_some_and(|kind| kind.supported_in(ctx.mode)) {
            failures.push(Failure::new(
                format!("{strategy_path}.handler"),
                format!("Unsupported accessStrategy: {}", handler.name),
            ));
            // Known handlers still get their config checked
            if kind.is_some() {
                if let Err(e) = AccessStrategy::decode(handler, ctx.mode) {
                    failures.push(decode_failure(&strategy_path, e));
                }
            }
            continue;
        }

        let decoded = match AccessStrategy::decode(handler, ctx.mode) {
            Ok(decoded) => decoded,
            Err(e) => {
                failures.push(decode_failure(&strategy_path, e));
                continue;
            }
        };

        match decoded {
            AccessStrategy::Jwt(JwtConfig::Istio(config)) => {
                failures.extend(jwt::validate_istio(&strategy_path, handler, &config));
                failures.extend(
                    injection::validate_injection(
                        &strategy_path,
                        ctx.client,
                        ctx.namespace,
                        &ctx.selector,
                    )
                    .await,
                );
            }
            AccessStrategy::Jwt(JwtConfig::Ory(config)) => {
                failures.extend(jwt::validate_ory(&strategy_path, handler, &config));
            }
            _ => {}
        }
    }

    failures
}

fn decode_failure(strategy_path: &str, error: DecodeError) -> Failure {
    Failure::new(format!("{strategy_path}.config"), error.to_string())
}

/// Exclusive strategies may not share a rule. The failure points at the
/// first strategy that conflicts with an earlier one.
fn validate_exclusivity(path: &str, strategies: &[Authenticator], mode: JwtHandler) -> Vec<Failure> {
    let kinds: Vec<Option<StrategyKind>> = strategies
        .iter()
        .map(|s| StrategyKind::from_name(&s.name))
        .collect();

    for (i, later) in kinds.iter().enumerate().skip(1) {
        for earlier in &kinds[..i] {
            let exclusive = [later, earlier]
                .into_iter()
                .flatten()
                .find(|k| k.is_exclusive_in(mode));
            if let Some(kind) = exclusive {
                return vec![Failure::new(
                    format!("{path}[{i}].handler"),
                    format!(
                        "{kind} access strategy is not allowed in combination with other access strategies"
                    ),
                )];
            }
        }
    }
    Vec::new()
}

fn validate_security_mix(path: &str, strategies: &[Authenticator]) -> Vec<Failure> {
    let kinds: Vec<StrategyKind> = strategies
        .iter()
        .filter_map(|s| StrategyKind::from_name(&s.name))
        .collect();
    if kinds.iter().any(|k| k.is_secure()) && kinds.iter().any(|k| k.is_insecure()) {
        vec![Failure::new(
            path,
            "Secure access strategies cannot be used in combination with unsecure access strategies",
        )]
    } else {
        Vec::new()
    }
}
