use std::collections::HashMap;

use argon2::{Argon2, PasswordHasher, PasswordVerifier};
use password_hash::{PasswordHash, SaltString};
use tracing::debug;

use crate::error::{CasError, CasResult};
use super::credential::Credential;

/// What a handler vouches for after accepting a credential.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HandlerResult {
    pub handler_name: String,
    pub credential_id: String,
}

pub trait AuthenticationHandler: Send + Sync {
    fn name(&self) -> &str;
    fn supports(&self, credential: &Credential) -> bool;
    fn authenticate(&self, credential: &Credential) -> CasResult<HandlerResult>;
}

/// Accepts any username/password pair whose two halves are equal.
/// Only meant for tests and demos.
#[derive(Debug, Clone, Default)]
pub struct SimpleTestUsernamePasswordHandler;

impl AuthenticationHandler for SimpleTestUsernamePasswordHandler {
    fn name(&self) -> &str { "SimpleTestUsernamePasswordHandler" }

    fn supports(&self, credential: &Credential) -> bool {
        matches!(credential, Credential::UsernamePassword(_))
    }

    fn authenticate(&self, credential: &Credential) -> CasResult<HandlerResult> {
        let Credential::UsernamePassword(c) = credential else {
            return Err(CasError::authentication("unsupported credential"));
        };
        if c.username.is_empty() || c.username != c.password {
            return Err(CasError::authentication("invalid_credentials"));
        }
        Ok(HandlerResult { handler_name: self.name().to_string(), credential_id: c.username.clone() })
    }
}

/// Username/password handler over a fixed user table of argon2 PHC hashes.
#[derive(Debug, Clone, Default)]
pub struct AcceptUsersHandler {
    users: HashMap<String, String>,
}

impl AcceptUsersHandler {
    pub fn new() -> Self { Self::default() }

    /// Store a user with an already-hashed PHC string.
    pub fn with_hash<S: Into<String>>(mut self, username: S, phc: S) -> Self {
        self.users.insert(username.into(), phc.into());
        self
    }

    /// Hash and store a plaintext password.
    pub fn with_password(mut self, username: &str, password: &str) -> CasResult<Self> {
        let phc = hash_password(password)?;
        self.users.insert(username.to_string(), phc);
        Ok(self)
    }
}

pub fn hash_password(password: &str) -> CasResult<String> {
    let mut salt_bytes = [0u8; 16];
    getrandom::getrandom(&mut salt_bytes).map_err(|e| CasError::authentication(e.to_string()))?;
    let salt = SaltString::encode_b64(&salt_bytes).map_err(|e| CasError::authentication(e.to_string()))?;
    let argon2 = Argon2::default();
    let phc = argon2
        .hash_password(password.as_bytes(), &salt)
        .map_err(|e| CasError::authentication(e.to_string()))?
        .to_string();
    Ok(phc)
}

pub fn verify_password(hash: &str, password: &str) -> bool {
    if let Ok(parsed) = PasswordHash::new(hash) {
        Argon2::default().verify_password(password.as_bytes(), &parsed).is_ok()
    } else { false }
}

impl AuthenticationHandler for AcceptUsersHandler {
    fn name(&self) -> &str { "AcceptUsersHandler" }

    fn supports(&self, credential: &Credential) -> bool {
        matches!(credential, Credential::UsernamePassword(_))
    }

    fn authenticate(&self, credential: &Credential) -> CasResult<HandlerResult> {
        let Credential::UsernamePassword(c) = credential else {
            return Err(CasError::authentication("unsupported credential"));
        };
        let Some(phc) = self.users.get(&c.username) else {
            debug!(target: "tessera::auth", "unknown user '{}'", c.username);
            return Err(CasError::authentication("invalid_credentials"));
        };
        if !verify_password(phc, &c.password) {
            return Err(CasError::authentication("invalid_credentials"));
        }
        Ok(HandlerResult { handler_name: self.name().to_string(), credential_id: c.username.clone() })
    }
}

/// Accepts a proxy callback credential when the callback is an https URL.
/// Contacting the callback is left to the protocol layer.
#[derive(Debug, Clone)]
pub struct HttpBasedServiceCredentialsHandler {
    pub require_secure: bool,
}

impl Default for HttpBasedServiceCredentialsHandler {
    fn default() -> Self { Self { require_secure: true } }
}

impl AuthenticationHandler for HttpBasedServiceCredentialsHandler {
    fn name(&self) -> &str { "HttpBasedServiceCredentialsHandler" }

    fn supports(&self, credential: &Credential) -> bool {
        matches!(credential, Credential::HttpBasedService(_))
    }

    fn authenticate(&self, credential: &Credential) -> CasResult<HandlerResult> {
        let Credential::HttpBasedService(c) = credential else {
            return Err(CasError::authentication("unsupported credential"));
        };
        let lower = c.callback_url.to_ascii_lowercase();
        let ok = if self.require_secure {
            lower.starts_with("https://")
        } else {
            lower.starts_with("https://") || lower.starts_with("http://")
        };
        if !ok || c.callback_url.len() <= "https://".len() {
            return Err(CasError::authentication(format!("callback url '{}' is not acceptable", c.callback_url)));
        }
        Ok(HandlerResult { handler_name: self.name().to_string(), credential_id: c.callback_url.clone() })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn simple_handler_requires_matching_halves() {
        let h = SimpleTestUsernamePasswordHandler;
        assert!(h.authenticate(&Credential::username_password("alice", "alice")).is_ok());
        assert!(h.authenticate(&Credential::username_password("alice", "bob")).is_err());
        assert!(!h.supports(&Credential::http_service("https://proxy.example/cb")));
    }

    #[test]
    fn accept_users_checks_argon2_hash() {
        let h = AcceptUsersHandler::new().with_password("carol", "pa55").unwrap();
        assert!(h.authenticate(&Credential::username_password("carol", "pa55")).is_ok());
        assert!(h.authenticate(&Credential::username_password("carol", "nope")).is_err());
        assert!(h.authenticate(&Credential::username_password("dave", "pa55")).is_err());
    }

    #[test]
    fn http_handler_wants_https() {
        let h = HttpBasedServiceCredentialsHandler::default();
        assert!(h.authenticate(&Credential::http_service("https://proxy.example/cb")).is_ok());
        assert!(h.authenticate(&Credential::http_service("http://proxy.example/cb")).is_err());
        assert!(h.authenticate(&Credential::http_service("duh")).is_err());
        let lax = HttpBasedServiceCredentialsHandler { require_secure: false };
        assert!(lax.authenticate(&Credential::http_service("http://proxy.example/cb")).is_ok());
    }
}
