//! `jwt` handler checks for both modes

use apigw_common::crd::Handler;
use url::Url;

use super::Failure;
use crate::handlers::{IstioJwtConfig, JwtAuthorization, OryJwtConfig};

/// Proxy-mode keys that have no meaning in mesh mode
const ORY_ONLY_KEYS: [&str; 3] = ["jwks_urls", "required_scopes", "trusted_issuers"];

/// Why `value` is not an absolute URL
fn invalid_url(value: &str) -> Option<String> {
    if value.is_empty() {
        return Some("value is empty".to_string());
    }
    Url::parse(value).err().map(|e| e.to_string())
}

/// Why `value` is not served over a secure scheme (`https` or `file`)
fn unsecured_url(value: &str) -> Option<String> {
    if value.is_empty() {
        return Some("value is empty".to_string());
    }
    match Url::parse(value) {
        Ok(url) if !matches!(url.scheme(), "https" | "file") => {
            Some("value is unsecure".to_string())
        }
        _ => None,
    }
}

/// Both URL checks for one attribute, each reported on its own
fn url_failures(attribute: &str, value: &str) -> Vec<Failure> {
    let mut failures = Vec::new();
    if let Some(e) = invalid_url(value) {
        failures.push(Failure::new(
            attribute,
            format!("value is empty or not a valid url err={e}"),
        ));
    }
    if let Some(e) = unsecured_url(value) {
        failures.push(Failure::new(
            attribute,
            format!("value is not a secured url err={e}"),
        ));
    }
    failures
}

/// Whether the raw config sets `key` to something other than null or `[]`
fn has_key(handler: &Handler, key: &str) -> bool {
    match handler.config.as_ref().and_then(|c| c.get(key)) {
        None | Some(serde_json::Value::Null) => false,
        Some(serde_json::Value::Array(items)) => !items.is_empty(),
        Some(_) => true,
    }
}

// =============================================================================
// Mesh mode
// =============================================================================

pub(super) fn validate_istio(path: &str, handler: &Handler, config: &IstioJwtConfig) -> Vec<Failure> {
    let mut failures = Vec::new();

    for key in ORY_ONLY_KEYS {
        if has_key(handler, key) {
            failures.push(Failure::new(
                format!("{path}.config.{key}"),
                format!("Configuration for {key} is not supported with Istio handler"),
            ));
        }
    }

    failures.extend(validate_authorizations(path, config.authorizations.as_deref()));
    failures.extend(validate_authentications(path, config));
    failures
}

fn validate_authorizations(path: &str, authorizations: Option<&[Option<JwtAuthorization>]>) -> Vec<Failure> {
    let Some(authorizations) = authorizations else {
        return Vec::new();
    };
    let base = format!("{path}.config.authorizations");
    if authorizations.is_empty() {
        return vec![Failure::new(base, "value is empty")];
    }

    let mut failures = Vec::new();
    for (i, authorization) in authorizations.iter().enumerate() {
        let Some(authorization) = authorization else {
            failures.push(Failure::new(format!("{base}[{i}]"), "authorization is empty"));
            continue;
        };
        if let Some(message) = invalid_values(authorization.required_scopes.as_deref(), "scope") {
            failures.push(Failure::new(format!("{base}[{i}].requiredScopes"), message));
        }
        if let Some(message) = invalid_values(authorization.audiences.as_deref(), "audience") {
            failures.push(Failure::new(format!("{base}[{i}].audiences"), message));
        }
    }
    failures
}

/// An optional list, when given, must be non-empty without empty entries
fn invalid_values(values: Option<&[String]>, what: &str) -> Option<String> {
    let values = values?;
    if values.is_empty() {
        Some("value is empty".to_string())
    } else if values.iter().any(|v| v.is_empty()) {
        Some(format!("{what} value is empty"))
    } else {
        None
    }
}

fn validate_authentications(path: &str, config: &IstioJwtConfig) -> Vec<Failure> {
    if config.authentications.is_empty() {
        return vec![Failure::new(
            path,
            "Authentications are required when using JWT access handler",
        )];
    }

    let mut failures = Vec::new();
    let (mut seen_headers, mut seen_params) = (false, false);

    for (i, auth) in config.authentications.iter().enumerate() {
        let base = format!("{path}.config.authentications[{i}]");

        failures.extend(url_failures(&format!("{base}.issuer"), &auth.issuer));
        failures.extend(url_failures(&format!("{base}.jwksUri"), &auth.jwks_uri));

        if !auth.from_headers.is_empty() {
            if seen_params {
                failures.push(Failure::new(
                    format!("{base}.fromHeaders"),
                    "mixture of multiple fromHeaders and fromParams is not supported",
                ));
            }
            seen_headers = true;
        }
        if !auth.from_params.is_empty() {
            if seen_headers {
                failures.push(Failure::new(
                    format!("{base}.fromParams"),
                    "mixture of multiple fromHeaders and fromParams is not supported",
                ));
            }
            seen_params = true;
        }
        if auth.from_headers.len() > 1 {
            failures.push(Failure::new(
                format!("{base}.fromHeaders"),
                "multiple fromHeaders are not supported",
            ));
        }
        if auth.from_params.len() > 1 {
            failures.push(Failure::new(
                format!("{base}.fromParams"),
                "multiple fromParams are not supported",
            ));
        }
    }
    failures
}

// =============================================================================
// Proxy mode
// =============================================================================

pub(super) fn validate_ory(path: &str, handler: &Handler, config: &OryJwtConfig) -> Vec<Failure> {
    let mut failures = Vec::new();

    if has_key(handler, "authentications") {
        failures.push(Failure::new(
            format!("{path}.config.authentications"),
            "Configuration for authentications is not supported with Ory handler",
        ));
    }

    for (key, urls) in [
        ("trusted_issuers", &config.trusted_issuers),
        ("jwks_urls", &config.jwks_urls),
    ] {
        for (i, value) in urls.iter().enumerate() {
            failures.extend(url_failures(&format!("{path}.config.{key}[{i}]"), value));
        }
    }

    failures
}
