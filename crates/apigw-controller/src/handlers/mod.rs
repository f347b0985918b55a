//! Access strategy and mutator handlers
//!
//! APIRules carry handlers as `{handler: <name>, config: <json>}`. This module
//! turns them into closed enums with typed configuration so validators and
//! builders never match on raw strings:
//!
//! - [`StrategyKind`]: the known authenticator names and their properties
//! - [`AccessStrategy`]: an authenticator decoded with its configuration
//! - [`MutatorKind`]: the known mutator names

mod jwt;
mod mutators;

pub use jwt::{IstioJwtConfig, JwtAuthentication, JwtAuthorization, JwtConfig, OryJwtConfig};
pub use mutators::{CookieMutatorConfig, HeaderMutatorConfig, MutatorKind, RequestMutations};

use apigw_common::crd::{Handler, Rule};
use apigw_common::JwtHandler;

// =============================================================================
// Strategy kinds
// =============================================================================

/// Known access strategy names
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum StrategyKind {
    /// Oathkeeper `noop`: forwards without authentication
    Noop,
    /// Exposes the path without any check
    Allow,
    /// Exposes the path for the declared methods only
    NoAuth,
    /// Exposes the path for the declared methods only
    AllowMethods,
    /// JWT validation
    Jwt,
    /// OAuth2 token introspection
    Oauth2Introspection,
    /// OAuth2 client credentials
    Oauth2ClientCredentials,
    /// Oathkeeper cookie session
    CookieSession,
    /// Oathkeeper `unauthorized`: rejects everything
    Unauthorized,
    /// Oathkeeper `anonymous`
    Anonymous,
}

impl StrategyKind {
    /// All known strategies
    pub const ALL: [StrategyKind; 10] = [
        StrategyKind::Noop,
        StrategyKind::Allow,
        StrategyKind::NoAuth,
        StrategyKind::AllowMethods,
        StrategyKind::Jwt,
        StrategyKind::Oauth2Introspection,
        StrategyKind::Oauth2ClientCredentials,
        StrategyKind::CookieSession,
        StrategyKind::Unauthorized,
        StrategyKind::Anonymous,
    ];

    /// Look up a strategy by its handler name
    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|k| k.name() == name)
    }

    /// Handler name as written in APIRules
    pub fn name(&self) -> &'static str {
        match self {
            StrategyKind::Noop => "noop",
            StrategyKind::Allow => "allow",
            StrategyKind::NoAuth => "no_auth",
            StrategyKind::AllowMethods => "allow_methods",
            StrategyKind::Jwt => "jwt",
            StrategyKind::Oauth2Introspection => "oauth2_introspection",
            StrategyKind::Oauth2ClientCredentials => "oauth2_client_credentials",
            StrategyKind::CookieSession => "cookie_session",
            StrategyKind::Unauthorized => "unauthorized",
            StrategyKind::Anonymous => "anonymous",
        }
    }

    /// Strategies that authenticate the caller
    pub fn is_secure(&self) -> bool {
        matches!(
            self,
            StrategyKind::Jwt
                | StrategyKind::Oauth2Introspection
                | StrategyKind::Oauth2ClientCredentials
                | StrategyKind::CookieSession
        )
    }

    /// Strategies that let callers through unauthenticated
    pub fn is_insecure(&self) -> bool {
        matches!(
            self,
            StrategyKind::Noop
                | StrategyKind::Allow
                | StrategyKind::NoAuth
                | StrategyKind::Unauthorized
                | StrategyKind::Anonymous
        )
    }

    /// Whether a configuration block is meaningful for this strategy
    pub fn takes_config(&self) -> bool {
        matches!(
            self,
            StrategyKind::Jwt
                | StrategyKind::Oauth2Introspection
                | StrategyKind::Oauth2ClientCredentials
                | StrategyKind::AllowMethods
        )
    }

    /// Strategies handled without the Oathkeeper proxy
    pub fn bypasses_proxy(&self) -> bool {
        matches!(
            self,
            StrategyKind::Allow | StrategyKind::NoAuth | StrategyKind::AllowMethods
        )
    }

    /// Whether the mode can enforce this strategy
    pub fn supported_in(&self, mode: JwtHandler) -> bool {
        match mode {
            JwtHandler::Ory => true,
            JwtHandler::Istio => matches!(
                self,
                StrategyKind::Noop
                    | StrategyKind::Allow
                    | StrategyKind::NoAuth
                    | StrategyKind::AllowMethods
                    | StrategyKind::Jwt
                    | StrategyKind::Oauth2Introspection
            ),
        }
    }

    /// Whether this strategy may not share a rule with other strategies
    pub fn is_exclusive_in(&self, mode: JwtHandler) -> bool {
        match self {
            StrategyKind::Allow | StrategyKind::NoAuth | StrategyKind::AllowMethods => true,
            StrategyKind::Jwt => mode == JwtHandler::Istio,
            _ => false,
        }
    }
}

impl std::fmt::Display for StrategyKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

// =============================================================================
// Decoded access strategies
// =============================================================================

/// An access strategy with its configuration decoded
#[derive(Clone, Debug, PartialEq)]
pub enum AccessStrategy {
    /// `noop`
    Noop,
    /// `allow`
    Allow,
    /// `no_auth`
    NoAuth,
    /// `allow_methods`
    AllowMethods,
    /// `jwt` with the configuration shape of the active mode
    Jwt(JwtConfig),
    /// `oauth2_introspection`, configuration passed through to Oathkeeper
    Oauth2Introspection(Option<serde_json::Value>),
    /// `oauth2_client_credentials`, configuration passed through to Oathkeeper
    Oauth2ClientCredentials(Option<serde_json::Value>),
    /// `cookie_session`
    CookieSession,
    /// `unauthorized`
    Unauthorized,
    /// `anonymous`
    Anonymous,
    /// Any other handler name
    Unsupported(String),
}

/// Why a handler's configuration could not be decoded
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum DecodeError {
    /// Config absent or `{}` where one is required
    EmptyConfig,
    /// Config present where the strategy takes none
    UnexpectedConfig(StrategyKind),
    /// Config does not have the expected shape
    InvalidJson(String),
}

impl std::fmt::Display for DecodeError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DecodeError::EmptyConfig => f.write_str("supplied config cannot be empty"),
            DecodeError::UnexpectedConfig(kind) => {
                write!(f, "strategy: {kind} does not support configuration")
            }
            DecodeError::InvalidJson(e) => write!(f, "Can't read json: {e}"),
        }
    }
}

impl AccessStrategy {
    /// Decode a handler for the given mode
    pub fn decode(handler: &Handler, mode: JwtHandler) -> Result<Self, DecodeError> {
        let Some(kind) = StrategyKind::from_name(&handler.name) else {
            return Ok(AccessStrategy::Unsupported(handler.name.clone()));
        };

        if !kind.takes_config() && !handler.config_is_empty() {
            return Err(DecodeError::UnexpectedConfig(kind));
        }

        Ok(match kind {
            StrategyKind::Noop => AccessStrategy::Noop,
            StrategyKind::Allow => AccessStrategy::Allow,
            StrategyKind::NoAuth => AccessStrategy::NoAuth,
            StrategyKind::AllowMethods => AccessStrategy::AllowMethods,
            StrategyKind::Jwt => AccessStrategy::Jwt(JwtConfig::decode(handler, mode)?),
            StrategyKind::Oauth2Introspection => {
                AccessStrategy::Oauth2Introspection(handler.config.clone())
            }
            StrategyKind::Oauth2ClientCredentials => {
                AccessStrategy::Oauth2ClientCredentials(handler.config.clone())
            }
            StrategyKind::CookieSession => AccessStrategy::CookieSession,
            StrategyKind::Unauthorized => AccessStrategy::Unauthorized,
            StrategyKind::Anonymous => AccessStrategy::Anonymous,
        })
    }

    /// Kind of a recognised strategy
    pub fn kind(&self) -> Option<StrategyKind> {
        Some(match self {
            AccessStrategy::Noop => StrategyKind::Noop,
            AccessStrategy::Allow => StrategyKind::Allow,
            AccessStrategy::NoAuth => StrategyKind::NoAuth,
            AccessStrategy::AllowMethods => StrategyKind::AllowMethods,
            AccessStrategy::Jwt(_) => StrategyKind::Jwt,
            AccessStrategy::Oauth2Introspection(_) => StrategyKind::Oauth2Introspection,
            AccessStrategy::Oauth2ClientCredentials(_) => StrategyKind::Oauth2ClientCredentials,
            AccessStrategy::CookieSession => StrategyKind::CookieSession,
            AccessStrategy::Unauthorized => StrategyKind::Unauthorized,
            AccessStrategy::Anonymous => StrategyKind::Anonymous,
            AccessStrategy::Unsupported(_) => return None,
        })
    }
}

// =============================================================================
// Rule-level queries
// =============================================================================

/// Kinds of the recognised strategies of a rule, in order
pub fn strategy_kinds(rule: &Rule) -> impl Iterator<Item = StrategyKind> + '_ {
    rule.access_strategies
        .iter()
        .filter_map(|s| StrategyKind::from_name(&s.name))
}

/// Whether a rule uses the given strategy
pub fn has_strategy(rule: &Rule, kind: StrategyKind) -> bool {
    strategy_kinds(rule).any(|k| k == kind)
}

/// Whether a rule is protected by JWT
pub fn is_jwt_secured(rule: &Rule) -> bool {
    has_strategy(rule, StrategyKind::Jwt)
}

/// Whether a rule has to pass through the Oathkeeper proxy in `mode`
pub fn requires_proxy(rule: &Rule, mode: JwtHandler) -> bool {
    match mode {
        JwtHandler::Istio => false,
        JwtHandler::Ory => {
            !rule.mutators.is_empty()
                || rule.access_strategies.iter().any(|s| {
                    StrategyKind::from_name(&s.name).map_or(true, |k| !k.bypasses_proxy())
                })
        }
    }
}

/// Istio JWT configurations of a rule's `jwt` strategies
pub fn istio_jwt_configs(rule: &Rule) -> Vec<IstioJwtConfig> {
    rule.access_strategies
        .iter()
        .filter(|s| s.name == StrategyKind::Jwt.name())
        .filter_map(|s| IstioJwtConfig::from_handler(s).ok())
        .collect()
}
