use std::sync::Arc;

use tracing::{debug, info};

use crate::clock::{Clock, SystemClock};
use crate::error::{CasError, CasResult};
use crate::tprintln;
use super::authentication::Authentication;
use super::credential::Credential;
use super::handlers::AuthenticationHandler;
use super::principal::Principal;
use super::resolver::PrincipalResolver;

/// Authenticates a credential and resolves its principal. Implementations may do
/// network I/O; callers treat them as opaque and fail-fast.
pub trait AuthenticationManager: Send + Sync {
    fn authenticate(&self, credential: &Credential) -> CasResult<Authentication>;
}

struct HandlerEntry {
    handler: Arc<dyn AuthenticationHandler>,
    resolver: Option<Arc<dyn PrincipalResolver>>,
}

/// Tries each supporting handler in registration order; the first success wins
/// and its paired resolver (if any) builds the principal.
pub struct PolicyBasedAuthenticationManager {
    entries: Vec<HandlerEntry>,
    clock: Arc<dyn Clock>,
}

impl Default for PolicyBasedAuthenticationManager {
    fn default() -> Self { Self::new() }
}

impl PolicyBasedAuthenticationManager {
    pub fn new() -> Self { Self { entries: Vec::new(), clock: Arc::new(SystemClock) } }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn with_handler(mut self, handler: Arc<dyn AuthenticationHandler>, resolver: Option<Arc<dyn PrincipalResolver>>) -> Self {
        self.entries.push(HandlerEntry { handler, resolver });
        self
    }
}

impl AuthenticationManager for PolicyBasedAuthenticationManager {
    fn authenticate(&self, credential: &Credential) -> CasResult<Authentication> {
        let mut last_err: Option<CasError> = None;
        for entry in self.entries.iter().filter(|e| e.handler.supports(credential)) {
            match entry.handler.authenticate(credential) {
                Ok(result) => {
                    let principal = match entry.resolver.as_ref() {
                        Some(r) if r.supports(credential) => r.resolve(credential),
                        _ => None,
                    }
                    .unwrap_or_else(|| Principal::new(result.credential_id.clone()));
                    let auth = Authentication::new(principal, self.clock.now())
                        .with_handler(result.handler_name.as_str())
                        .long_term(credential.wants_long_term());
                    info!(target: "tessera::auth", "authenticated principal='{}' handler='{}'", auth.principal.id, result.handler_name);
                    tprintln!("auth.ok principal={} handler={}", auth.principal.id, result.handler_name);
                    return Ok(auth);
                }
                Err(e) => {
                    debug!(target: "tessera::auth", "handler '{}' rejected credential: {}", entry.handler.name(), e);
                    last_err = Some(e);
                }
            }
        }
        Err(last_err.unwrap_or_else(|| CasError::authentication("no authentication handler supports the presented credential")))
    }
}
