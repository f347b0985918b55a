//! Host checks: presence, domain, allow and block lists, occupancy

use apigw_common::crd::{host_includes_domain, host_with_domain, ApiRule};
use apigw_common::resources::VirtualService;
use apigw_common::{OperatorSettings, OwnerLabels};

use super::Failure;

pub(super) fn validate_host(
    path: &str,
    api_rule: &ApiRule,
    settings: &OperatorSettings,
    virtual_services: &[VirtualService],
) -> Vec<Failure> {
    let Some(declared) = api_rule.spec.host.as_deref().filter(|h| !h.is_empty()) else {
        return vec![Failure::new(path, "Host was nil")];
    };

    let mut failures = Vec::new();

    if host_includes_domain(declared) {
        if !settings.domain_allowlist.is_empty()
            && !is_allowlisted(declared, &settings.domain_allowlist)
        {
            failures.push(Failure::new(path, "Host is not allowlisted"));
        }
    } else if settings.default_domain_name.is_empty() {
        failures.push(Failure::new(
            path,
            "Host does not contain a domain name and no default domain name is configured",
        ));
    }

    let host = host_with_domain(declared, &settings.default_domain_name);

    if settings.host_blocklist.iter().any(|blocked| *blocked == host) {
        let (sub, domain) = host.split_once('.').unwrap_or((host.as_str(), ""));
        failures.push(Failure::new(
            path,
            format!("The subdomain {sub} is blocklisted for {domain} domain"),
        ));
    }

    let owner = OwnerLabels::for_api_rule(api_rule);
    let occupied = virtual_services.iter().any(|vs| {
        vs.spec.hosts.iter().any(|h| *h == host) && !owner.owns(&vs.metadata.labels)
    });
    if occupied {
        failures.push(Failure::new(
            path,
            "This host is occupied by another Virtual Service",
        ));
    }

    failures
}

/// The host ends in exactly one allowed domain, as a suffix after a dot
fn is_allowlisted(host: &str, allowlist: &[String]) -> bool {
    allowlist.iter().any(|domain| {
        host.strip_suffix(domain.as_str())
            .is_some_and(|prefix| prefix.ends_with('.') && !prefix.contains(domain.as_str()))
    })
}
