use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::principal::Principal;

/// Metadata key recording which handler produced the authentication.
pub const AUTHENTICATION_METHOD: &str = "authenticationMethod";
/// Metadata key set when the user asked for a long-term ("remember me") session.
pub const REMEMBER_ME: &str = "rememberMe";

/// Outcome of one successful primary or delegated login.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Authentication {
    pub principal: Principal,
    pub authenticated_at: DateTime<Utc>,
    #[serde(default)]
    pub metadata: BTreeMap<String, Vec<String>>,
    /// Names of the handlers that accepted the credential.
    #[serde(default)]
    pub successful_handlers: Vec<String>,
    #[serde(default)]
    pub long_term: bool,
}

impl Authentication {
    pub fn new(principal: Principal, authenticated_at: DateTime<Utc>) -> Self {
        Self { principal, authenticated_at, metadata: BTreeMap::new(), successful_handlers: Vec::new(), long_term: false }
    }

    pub fn with_handler<S: Into<String>>(mut self, handler: S) -> Self {
        let handler = handler.into();
        self.metadata.entry(AUTHENTICATION_METHOD.to_string()).or_default().push(handler.clone());
        self.successful_handlers.push(handler);
        self
    }

    pub fn with_metadata<S: Into<String>>(mut self, key: S, value: S) -> Self {
        self.metadata.entry(key.into()).or_default().push(value.into());
        self
    }

    pub fn long_term(mut self, long_term: bool) -> Self {
        self.long_term = long_term;
        if long_term {
            self.metadata.insert(REMEMBER_ME.to_string(), vec!["true".into()]);
        }
        self
    }

    /// Copy of this authentication presented under a different principal.
    /// Used when an assertion rewrites the id and released attributes for a service.
    pub fn with_principal(&self, principal: Principal) -> Self {
        Self { principal, ..self.clone() }
    }

    pub fn principal_id(&self) -> &str { &self.principal.id }
}
