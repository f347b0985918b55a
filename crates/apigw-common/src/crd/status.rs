//! APIRule status: one code per downstream resource kind plus an aggregate

use chrono::{DateTime, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Outcome code of one resource kind
#[derive(Clone, Copy, Debug, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "UPPERCASE")]
pub enum StatusCode {
    /// Reconciled successfully
    Ok,
    /// Not touched because an earlier step failed
    Skipped,
    /// Failed
    Error,
}

impl std::fmt::Display for StatusCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StatusCode::Ok => write!(f, "OK"),
            StatusCode::Skipped => write!(f, "SKIPPED"),
            StatusCode::Error => write!(f, "ERROR"),
        }
    }
}

/// Status of one resource kind
#[derive(Clone, Debug, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
pub struct ResourceStatus {
    /// Outcome code
    pub code: StatusCode,
    /// Human readable description
    #[serde(default, rename = "desc", skip_serializing_if = "String::is_empty")]
    pub description: String,
}

impl ResourceStatus {
    /// Status with an empty description
    pub fn new(code: StatusCode) -> Self {
        Self {
            code,
            description: String::new(),
        }
    }

    /// Status with a description
    pub fn with_description(code: StatusCode, description: impl Into<String>) -> Self {
        Self {
            code,
            description: description.into(),
        }
    }

    /// `OK` without description
    pub fn ok() -> Self {
        Self::new(StatusCode::Ok)
    }

    /// `SKIPPED` without description
    pub fn skipped() -> Self {
        Self::new(StatusCode::Skipped)
    }

    /// `ERROR` with description
    pub fn error(description: impl Into<String>) -> Self {
        Self::with_description(StatusCode::Error, description)
    }
}

/// Status of an APIRule
///
/// Kinds not handled by the active mode stay `None`.
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ApiRuleStatus {
    /// When the APIRule was last reconciled
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_processed_time: Option<DateTime<Utc>>,
    /// Generation the status refers to
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub observed_generation: Option<i64>,
    /// Aggregate status of the APIRule
    #[serde(default, rename = "APIRuleStatus", skip_serializing_if = "Option::is_none")]
    pub api_rule_status: Option<ResourceStatus>,
    /// VirtualService status
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub virtual_service_status: Option<ResourceStatus>,
    /// Oathkeeper access rule status
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub access_rule_status: Option<ResourceStatus>,
    /// RequestAuthentication status
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub request_authentication_status: Option<ResourceStatus>,
    /// AuthorizationPolicy status
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub authorization_policy_status: Option<ResourceStatus>,
}

impl ApiRuleStatus {
    /// Aggregate code, if any
    pub fn code(&self) -> Option<StatusCode> {
        self.api_rule_status.as_ref().map(|s| s.code)
    }

    /// Whether two statuses report the same outcome, ignoring timestamps
    pub fn same_outcome(&self, other: &ApiRuleStatus) -> bool {
        self.observed_generation == other.observed_generation
            && self.api_rule_status == other.api_rule_status
            && self.virtual_service_status == other.virtual_service_status
            && self.access_rule_status == other.access_rule_status
            && self.request_authentication_status == other.request_authentication_status
            && self.authorization_policy_status == other.authorization_policy_status
    }
}
