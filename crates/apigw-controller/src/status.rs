//! APIRule status aggregation
//!
//! Every reconcile ends in exactly one of three outcomes:
//!
//! - validation failed: parent `ERROR` with the failure summary, kinds of the
//!   active mode `SKIPPED`
//! - processing ran: each kind of the active mode `OK` or `ERROR` with its
//!   apply error, parent `ERROR` when anything failed
//! - reconciliation could not start (mode configuration, listing): parent
//!   `ERROR` only
//!
//! Kinds outside the active mode are never given a status.

use std::collections::BTreeMap;

use chrono::Utc;

use apigw_common::crd::{ApiRuleStatus, ResourceStatus, StatusCode};
use apigw_common::resources::ResourceKind;
use apigw_common::JwtHandler;

use crate::reconciliation::active_kinds;
use crate::validation::Failure;

/// Failures listed in a validation description before truncation
const MAX_LISTED_FAILURES: usize = 3;

/// Human readable summary of validation failures
pub fn validation_description(failures: &[Failure]) -> String {
    if let [only] = failures {
        return format!("Validation error: {only}");
    }

    let mut description = String::from("Multiple validation errors: ");
    for failure in failures.iter().take(MAX_LISTED_FAILURES) {
        description.push('\n');
        description.push_str(&failure.to_string());
    }
    if failures.len() > MAX_LISTED_FAILURES {
        description.push_str(&format!(
            "\n{} more error(s)...",
            failures.len() - MAX_LISTED_FAILURES
        ));
    }
    description
}

/// Status after validation rejected the APIRule
pub fn validation_failed(mode: JwtHandler, failures: &[Failure]) -> ApiRuleStatus {
    let mut status = ApiRuleStatus {
        api_rule_status: Some(ResourceStatus::error(validation_description(failures))),
        ..Default::default()
    };
    for kind in active_kinds(mode) {
        set_kind(&mut status, *kind, ResourceStatus::skipped());
    }
    status
}

/// Status when reconciliation failed before any resource was processed
pub fn failed(message: impl Into<String>) -> ApiRuleStatus {
    ApiRuleStatus {
        api_rule_status: Some(ResourceStatus::error(message)),
        ..Default::default()
    }
}

/// Status after processing.
///
/// `errors` holds the apply error of every kind that failed, including
/// cleanup kinds; those only surface on the parent.
pub fn processed(mode: JwtHandler, errors: &BTreeMap<ResourceKind, String>) -> ApiRuleStatus {
    let mut status = ApiRuleStatus::default();
    for kind in active_kinds(mode) {
        let kind_status = match errors.get(kind) {
            Some(message) => ResourceStatus::error(message.clone()),
            None => ResourceStatus::ok(),
        };
        set_kind(&mut status, *kind, kind_status);
    }

    status.api_rule_status = Some(if errors.is_empty() {
        ResourceStatus::ok()
    } else {
        let description = errors
            .iter()
            .map(|(kind, message)| format!("{kind}: {message}"))
            .collect::<Vec<_>>()
            .join("\n");
        ResourceStatus::error(description)
    });
    status
}

/// Stamp the processing time and the generation the status refers to
pub fn stamp(mut status: ApiRuleStatus, generation: Option<i64>) -> ApiRuleStatus {
    status.last_processed_time = Some(Utc::now());
    status.observed_generation = generation;
    status
}

/// Whether the status reports a failure
pub fn is_error(status: &ApiRuleStatus) -> bool {
    status.code() == Some(StatusCode::Error)
}

fn set_kind(status: &mut ApiRuleStatus, kind: ResourceKind, value: ResourceStatus) {
    let slot = match kind {
        ResourceKind::VirtualService => &mut status.virtual_service_status,
        ResourceKind::AccessRule => &mut status.access_rule_status,
        ResourceKind::RequestAuthentication => &mut status.request_authentication_status,
        ResourceKind::AuthorizationPolicy => &mut status.authorization_policy_status,
    };
    *slot = Some(value);
}
