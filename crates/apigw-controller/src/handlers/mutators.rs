//! Request mutators
//!
//! In mesh mode `header` and `cookie` mutators on JWT rules are realised as
//! VirtualService request headers. Every other mutator is only meaningful to
//! Oathkeeper and is passed through in proxy mode.

use std::collections::BTreeMap;

use serde::Deserialize;

use apigw_common::crd::{Handler, Rule};

use super::DecodeError;

/// Known mutator names
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum MutatorKind {
    /// Set request headers
    Header,
    /// Set request cookies
    Cookie,
    /// Oathkeeper-only mutator (e.g. `id_token`, `hydrator`)
    Passthrough(String),
}

impl MutatorKind {
    /// Classify a mutator by name
    pub fn from_name(name: &str) -> Self {
        match name {
            "header" => MutatorKind::Header,
            "cookie" => MutatorKind::Cookie,
            other => MutatorKind::Passthrough(other.to_string()),
        }
    }
}

/// `header` mutator config
#[derive(Clone, Debug, Default, Deserialize, PartialEq, Eq)]
pub struct HeaderMutatorConfig {
    /// Header name -> value
    #[serde(default)]
    pub headers: BTreeMap<String, String>,
}

/// `cookie` mutator config
#[derive(Clone, Debug, Default, Deserialize, PartialEq, Eq)]
pub struct CookieMutatorConfig {
    /// Cookie name -> value
    #[serde(default)]
    pub cookies: BTreeMap<String, String>,
}

fn decode<T: serde::de::DeserializeOwned + Default>(handler: &Handler) -> Result<T, DecodeError> {
    match &handler.config {
        None | Some(serde_json::Value::Null) => Ok(T::default()),
        Some(raw) => {
            serde_json::from_value(raw.clone()).map_err(|e| DecodeError::InvalidJson(e.to_string()))
        }
    }
}

impl HeaderMutatorConfig {
    /// Decode a `header` mutator
    pub fn from_handler(handler: &Handler) -> Result<Self, DecodeError> {
        decode(handler)
    }
}

impl CookieMutatorConfig {
    /// Decode a `cookie` mutator
    pub fn from_handler(handler: &Handler) -> Result<Self, DecodeError> {
        decode(handler)
    }

    /// Cookie header value, `k1=v1; k2=v2` with keys sorted
    pub fn header_value(&self) -> String {
        self.cookies
            .iter()
            .map(|(k, v)| format!("{k}={v}"))
            .collect::<Vec<_>>()
            .join("; ")
    }
}

/// Request headers a rule's mutators set on the route
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct RequestMutations {
    /// Headers to set
    pub headers: BTreeMap<String, String>,
}

impl RequestMutations {
    /// Collect header and cookie mutations of a rule; later mutators win
    pub fn from_rule(rule: &Rule) -> Result<Self, DecodeError> {
        let mut headers = BTreeMap::new();
        for mutator in &rule.mutators {
            match MutatorKind::from_name(&mutator.name) {
                MutatorKind::Header => {
                    headers.extend(HeaderMutatorConfig::from_handler(mutator)?.headers);
                }
                MutatorKind::Cookie => {
                    let cookies = CookieMutatorConfig::from_handler(mutator)?;
                    if !cookies.cookies.is_empty() {
                        headers.insert("Cookie".to_string(), cookies.header_value());
                    }
                }
                MutatorKind::Passthrough(_) => {}
            }
        }
        Ok(Self { headers })
    }
}
