//! Custom Resource Definitions owned by the API gateway operator

mod api_rule;
mod status;

pub use api_rule::{
    host_includes_domain, host_with_domain, ApiRule, ApiRuleSpec, Authenticator, Handler,
    Mutator, Rule, Service,
};
pub use status::{ApiRuleStatus, ResourceStatus, StatusCode};
