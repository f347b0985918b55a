//! JWT handler configuration in its two shapes
//!
//! Mesh mode expects `authentications` and `authorizations` blocks that map
//! onto RequestAuthentication and AuthorizationPolicy. Proxy mode expects
//! Oathkeeper's flat `trusted_issuers` / `jwks_urls` form.

use serde::Deserialize;

use apigw_common::crd::Handler;
use apigw_common::resources::JwtHeader;
use apigw_common::JwtHandler;

use super::DecodeError;

/// JWT configuration decoded for the active mode
#[derive(Clone, Debug, PartialEq)]
pub enum JwtConfig {
    /// Mesh mode shape
    Istio(IstioJwtConfig),
    /// Proxy mode shape
    Ory(OryJwtConfig),
}

impl JwtConfig {
    /// Decode a `jwt` handler config into the shape `mode` expects
    pub fn decode(handler: &Handler, mode: JwtHandler) -> Result<Self, DecodeError> {
        match mode {
            JwtHandler::Istio => IstioJwtConfig::from_handler(handler).map(JwtConfig::Istio),
            JwtHandler::Ory => OryJwtConfig::from_handler(handler).map(JwtConfig::Ory),
        }
    }
}

fn decode_config<T: serde::de::DeserializeOwned>(handler: &Handler) -> Result<T, DecodeError> {
    if handler.config_is_empty() {
        return Err(DecodeError::EmptyConfig);
    }
    let raw = handler.config.clone().unwrap_or_default();
    serde_json::from_value(raw).map_err(|e| DecodeError::InvalidJson(e.to_string()))
}

// =============================================================================
// Mesh mode
// =============================================================================

/// `jwt` config in mesh mode
#[derive(Clone, Debug, Default, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct IstioJwtConfig {
    /// Accepted issuers
    #[serde(default)]
    pub authentications: Vec<JwtAuthentication>,
    /// Authorization blocks; `None` when the key is absent
    #[serde(default)]
    pub authorizations: Option<Vec<Option<JwtAuthorization>>>,
}

impl IstioJwtConfig {
    /// Decode a handler's config
    pub fn from_handler(handler: &Handler) -> Result<Self, DecodeError> {
        decode_config(handler)
    }

    /// Authorization blocks in declaration order, skipping null entries
    pub fn authorization_blocks(&self) -> Vec<JwtAuthorization> {
        self.authorizations
            .iter()
            .flatten()
            .flatten()
            .cloned()
            .collect()
    }
}

/// One trusted issuer
#[derive(Clone, Debug, Default, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct JwtAuthentication {
    /// Issuer (`iss` claim)
    #[serde(default)]
    pub issuer: String,
    /// JWKS location
    #[serde(default)]
    pub jwks_uri: String,
    /// Headers carrying the token
    #[serde(default)]
    pub from_headers: Vec<JwtHeader>,
    /// Query parameters carrying the token
    #[serde(default)]
    pub from_params: Vec<String>,
}

impl JwtAuthentication {
    /// Identity of the issuer across rules
    pub fn issuer_key(&self) -> String {
        format!("{}{}", self.issuer, self.jwks_uri)
    }
}

/// One authorization block: required scopes and audiences
#[derive(Clone, Debug, Default, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct JwtAuthorization {
    /// All of these scopes are required
    #[serde(default)]
    pub required_scopes: Option<Vec<String>>,
    /// All of these audiences are required
    #[serde(default)]
    pub audiences: Option<Vec<String>>,
}

impl JwtAuthorization {
    /// Required scopes, empty when unset
    pub fn scopes(&self) -> &[String] {
        self.required_scopes.as_deref().unwrap_or_default()
    }

    /// Required audiences, empty when unset
    pub fn audience_list(&self) -> &[String] {
        self.audiences.as_deref().unwrap_or_default()
    }
}

// =============================================================================
// Proxy mode
// =============================================================================

/// `jwt` config in proxy mode, passed to Oathkeeper verbatim
#[derive(Clone, Debug, Default, Deserialize, PartialEq)]
pub struct OryJwtConfig {
    /// Accepted issuers
    #[serde(default)]
    pub trusted_issuers: Vec<String>,
    /// JWKS locations
    #[serde(default)]
    pub jwks_urls: Vec<String>,
    /// Required scopes
    #[serde(default, alias = "required_scopes")]
    pub required_scope: Vec<String>,
    /// Required audiences
    #[serde(default)]
    pub target_audience: Vec<String>,
}

impl OryJwtConfig {
    /// Decode a handler's config
    pub fn from_handler(handler: &Handler) -> Result<Self, DecodeError> {
        decode_config(handler)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn empty_config_is_reported_as_such() {
        assert_eq!(
            IstioJwtConfig::from_handler(&Handler::named("jwt")),
            Err(DecodeError::EmptyConfig)
        );
        assert_eq!(
            OryJwtConfig::from_handler(&Handler::with_config("jwt", json!({}))),
            Err(DecodeError::EmptyConfig)
        );
    }

    #[test]
    fn wrong_shape_is_invalid_json() {
        let handler = Handler::with_config("jwt", json!({"authentications": "nope"}));
        assert!(matches!(
            IstioJwtConfig::from_handler(&handler),
            Err(DecodeError::InvalidJson(_))
        ));
    }

    #[test]
    fn authorizations_keep_absent_and_empty_apart() {
        let absent = IstioJwtConfig::from_handler(&Handler::with_config(
            "jwt",
            json!({"authentications": []}),
        ))
        .unwrap();
        assert_eq!(absent.authorizations, None);

        let empty = IstioJwtConfig::from_handler(&Handler::with_config(
            "jwt",
            json!({"authentications": [], "authorizations": []}),
        ))
        .unwrap();
        assert_eq!(empty.authorizations, Some(vec![]));
    }

    #[test]
    fn token_locations_decode() {
        let config = IstioJwtConfig::from_handler(&Handler::with_config(
            "jwt",
            json!({"authentications": [{
                "issuer": "https://issuer",
                "jwksUri": "https://issuer/jwks",
                "fromHeaders": [{"name": "X-JWT", "prefix": "Bearer "}]
            }]}),
        ))
        .unwrap();
        let auth = &config.authentications[0];
        assert_eq!(auth.from_headers[0].name, "X-JWT");
        assert_eq!(auth.from_headers[0].prefix, "Bearer ");
        assert_eq!(auth.issuer_key(), "https://issuerhttps://issuer/jwks");
    }

    #[test]
    fn ory_accepts_plural_scope_alias() {
        let config = OryJwtConfig::from_handler(&Handler::with_config(
            "jwt",
            json!({"required_scopes": ["read"]}),
        ))
        .unwrap();
        assert_eq!(config.required_scope, vec!["read"]);
    }
}
