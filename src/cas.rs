//!
//! tessera central authentication service
//! --------------------------------------
//! Issues, delegates, validates and destroys tickets. Holds no ticket state of its
//! own: every operation reads from the registry, mutates a copy and writes it back,
//! so concurrent callers only ever contend inside the registry.
//!
//! Granting tickets are checked together with their ancestors. A proxy-granting
//! ticket whose parent session is gone or expired is itself dead, and a service
//! ticket is dead when any granting ticket above it is.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::{debug, info, warn};

use crate::clock::{Clock, SystemClock};
use crate::error::{CasError, CasResult};
use crate::identity::{AuthenticationManager, Credential, Principal};
use crate::logout::{DefaultLogoutManager, LogoutManager, LogoutRequest};
use crate::registry::{destroy_granting_tree, purge, RegistryCleaner, TicketRegistry};
use crate::services::{RegisteredService, ServicesManager};
use crate::ticket::{
    log_id, DefaultUniqueTicketIdGenerator, ExpirationPolicy, Service, ServiceTicket, Ticket,
    TicketGrantingTicket, TicketKind, UniqueTicketIdGenerator, PROXY_GRANTING_TICKET_PREFIX,
    PROXY_TICKET_PREFIX, SERVICE_TICKET_PREFIX, TICKET_GRANTING_TICKET_PREFIX,
};
use crate::tprintln;
use crate::validation::{Assertion, ChainedAuthentication};

/// Deepest proxy chain followed before giving up on a ticket.
pub const MAX_PROXY_CHAIN_DEPTH: usize = 32;

/// Times a validation re-reads a multi-use ticket after losing a use to a
/// concurrent validation.
const MAX_CONSUME_ATTEMPTS: usize = 16;

pub struct CentralAuthenticationService {
    registry: Arc<dyn TicketRegistry>,
    authentication_manager: Arc<dyn AuthenticationManager>,
    services_manager: Arc<dyn ServicesManager>,
    logout_manager: Arc<dyn LogoutManager>,
    tgt_id_generator: Arc<dyn UniqueTicketIdGenerator>,
    st_id_generator: Arc<dyn UniqueTicketIdGenerator>,
    tgt_policy: ExpirationPolicy,
    st_policy: ExpirationPolicy,
    pgt_policy: ExpirationPolicy,
    clock: Arc<dyn Clock>,
    only_track_most_recent_session: bool,
}

impl CentralAuthenticationService {
    pub fn new(
        registry: Arc<dyn TicketRegistry>,
        authentication_manager: Arc<dyn AuthenticationManager>,
        services_manager: Arc<dyn ServicesManager>,
    ) -> Self {
        let tgt_policy = ExpirationPolicy::ticket_granting(8 * 3600 * 1000, 2 * 3600 * 1000);
        Self {
            registry,
            authentication_manager,
            services_manager,
            logout_manager: Arc::new(DefaultLogoutManager::default()),
            tgt_id_generator: Arc::new(DefaultUniqueTicketIdGenerator::default()),
            st_id_generator: Arc::new(DefaultUniqueTicketIdGenerator::default()),
            pgt_policy: tgt_policy.clone(),
            tgt_policy,
            st_policy: ExpirationPolicy::single_use(10_000),
            clock: Arc::new(SystemClock),
            only_track_most_recent_session: true,
        }
    }

    pub fn with_logout_manager(mut self, logout_manager: Arc<dyn LogoutManager>) -> Self {
        self.logout_manager = logout_manager;
        self
    }

    pub fn with_id_generators(mut self, tgt: Arc<dyn UniqueTicketIdGenerator>, st: Arc<dyn UniqueTicketIdGenerator>) -> Self {
        self.tgt_id_generator = tgt;
        self.st_id_generator = st;
        self
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn with_ticket_granting_policy(mut self, policy: ExpirationPolicy) -> Self {
        self.tgt_policy = policy;
        self
    }

    pub fn with_service_ticket_policy(mut self, policy: ExpirationPolicy) -> Self {
        self.st_policy = policy;
        self
    }

    pub fn with_proxy_granting_policy(mut self, policy: ExpirationPolicy) -> Self {
        self.pgt_policy = policy;
        self
    }

    pub fn with_only_track_most_recent_session(mut self, only_most_recent: bool) -> Self {
        self.only_track_most_recent_session = only_most_recent;
        self
    }

    /// Applies to tickets granted from now on; tickets already issued keep theirs.
    pub fn set_service_ticket_policy(&mut self, policy: ExpirationPolicy) { self.st_policy = policy; }

    pub fn registry(&self) -> &Arc<dyn TicketRegistry> { &self.registry }

    pub fn clock(&self) -> &Arc<dyn Clock> { &self.clock }

    /// Cleaner sweeping this service's registry with its logout manager and clock.
    pub fn cleaner(&self) -> RegistryCleaner {
        RegistryCleaner::new(self.registry.clone(), self.logout_manager.clone(), self.clock.clone())
    }

    /// Authenticate `credential` and open a new SSO session.
    pub fn create_ticket_granting_ticket(&self, credential: &Credential) -> CasResult<TicketGrantingTicket> {
        let authentication = self.authentication_manager.authenticate(credential)?;
        let id = self.tgt_id_generator.new_ticket_id(TICKET_GRANTING_TICKET_PREFIX);
        let tgt = TicketGrantingTicket::new(id, authentication, self.tgt_policy.clone(), self.clock.now());
        self.registry.add_ticket(tgt.clone().into())?;
        info!(
            target: "tessera::cas",
            "granted {} to principal='{}'",
            log_id(&tgt.id), tgt.authentication().principal.id
        );
        Ok(tgt)
    }

    /// Issue a service ticket (a proxy ticket when `tgt_id` is proxy-granting).
    ///
    /// Presenting `credential` is the renew path: it must resolve to the session's
    /// principal, is recorded as a supplemental authentication and marks the ticket
    /// as coming from a new login.
    pub fn grant_service_ticket(
        &self,
        tgt_id: &str,
        service: &Service,
        credential: Option<&Credential>,
    ) -> CasResult<ServiceTicket> {
        let now = self.clock.now();
        let mut chain = self.live_chain(tgt_id, now)?;
        let registered = self.registered_service(service)?;
        let root_handlers = chain.last().map(|t| t.authentication().successful_handlers.clone()).unwrap_or_default();
        if let Some(missing) = registered.required_handlers.iter().find(|h| !root_handlers.contains(h)) {
            return Err(CasError::unauthorized_service(format!(
                "service '{}' requires authentication by '{}'",
                service.id, missing
            )));
        }

        let mut tgt = chain.swap_remove(0);
        if let Some(credential) = credential {
            let current = self.authentication_manager.authenticate(credential)?;
            if !current.principal.same_identity(&tgt.authentication().principal) {
                warn!(
                    target: "tessera::cas",
                    "renew for {} resolved to '{}' instead of '{}'",
                    log_id(tgt_id), current.principal.id, tgt.authentication().principal.id
                );
                return Err(CasError::MixedPrincipal {
                    current: current.principal.id,
                    original: tgt.authentication().principal.id.clone(),
                });
            }
            tgt.add_supplemental_authentication(current);
        }

        if !registered.sso_enabled && credential.is_none() && tgt.stats.use_count > 0 {
            return Err(CasError::UnauthorizedSsoService { service: service.id.clone() });
        }

        let prefix = if tgt.is_proxy_granting() { PROXY_TICKET_PREFIX } else { SERVICE_TICKET_PREFIX };
        let id = self.st_id_generator.new_ticket_id(prefix);
        let st = tgt.grant_service_ticket(
            id,
            service,
            self.st_policy.clone(),
            credential.is_some(),
            self.only_track_most_recent_session,
            now,
        );
        self.registry.add_ticket(st.clone().into())?;
        if let Err(e) = self.registry.update_ticket(&Ticket::Granting(tgt)) {
            // Session went away while granting; do not leave an orphan behind.
            self.registry.delete_ticket(&st.id)?;
            return Err(e);
        }
        info!(
            target: "tessera::cas",
            "granted {} for service='{}' from {} new_login={}",
            log_id(&st.id), service.id, log_id(tgt_id), st.from_new_login
        );
        tprintln!("cas.grant st={} service={}", log_id(&st.id), service.id);
        Ok(st)
    }

    /// Exchange a service ticket for a proxy-granting ticket bound to the
    /// authentication of `credential` (normally the service's callback url).
    pub fn delegate_ticket_granting_ticket(&self, st_id: &str, credential: &Credential) -> CasResult<TicketGrantingTicket> {
        let now = self.clock.now();
        let (mut st, chain) = self.live_service_ticket(st_id, now)?;
        let registered = self.registered_service(&st.service)?;
        if !registered.proxy_policy.is_allowed_to_proxy() {
            return Err(CasError::ProxyingUnauthorized { service: st.service.id.clone() });
        }
        let callback = Service::new(credential.id());
        if !registered.is_allowed_to_proxy(&callback) {
            warn!(
                target: "tessera::cas",
                "proxy callback '{}' refused for service='{}'",
                callback.id, st.service.id
            );
            return Err(CasError::ProxyingUnauthorized { service: st.service.id.clone() });
        }

        let authentication = self.authentication_manager.authenticate(credential)?;
        let pgt_id = self.tgt_id_generator.new_ticket_id(PROXY_GRANTING_TICKET_PREFIX);
        let pgt = st.grant_proxy_granting_ticket(pgt_id, authentication, self.pgt_policy.clone(), now)?;
        self.registry.add_ticket(pgt.clone().into())?;
        if let Err(e) = self.record_delegation(&st, &pgt, &chain) {
            self.registry.delete_ticket(&pgt.id)?;
            return Err(e);
        }
        info!(
            target: "tessera::cas",
            "delegated {} from {} to callback='{}'",
            log_id(&pgt.id), log_id(st_id), callback.id
        );
        Ok(pgt)
    }

    fn record_delegation(&self, st: &ServiceTicket, pgt: &TicketGrantingTicket, chain: &[TicketGrantingTicket]) -> CasResult<()> {
        // A use recorded since `st` was read must not be overwritten.
        if !self.registry.update_ticket_if(&Ticket::Service(st.clone()), st.stats.use_count)? {
            return Err(CasError::creation(format!("{} was used while delegating", log_id(&st.id))));
        }
        // Re-read the parent so bookkeeping from concurrent grants is kept.
        let mut parent = match self.registry.fetch_ticket(&st.granting_ticket_id)? {
            Some(Ticket::Granting(t)) => t,
            _ => match chain.first() {
                Some(t) => t.clone(),
                None => return Err(CasError::not_found(&st.granting_ticket_id)),
            },
        };
        parent.record_descendant(&pgt.id);
        self.registry.update_ticket(&Ticket::Granting(parent))
    }

    /// Validate and consume a service or proxy ticket presented by `service`.
    pub fn validate_service_ticket(&self, st_id: &str, service: &Service) -> CasResult<Assertion> {
        let now = self.clock.now();
        for _ in 0..MAX_CONSUME_ATTEMPTS {
            let (st, chain) = self.live_service_ticket(st_id, now)?;
            let registered = self.registered_service(service)?;
            if let Some(assertion) = self.consume(st, chain, service, &registered, now)? {
                return Ok(assertion);
            }
            debug!(target: "tessera::cas", "use of {} raced a concurrent validation, re-reading", log_id(st_id));
        }
        Err(CasError::registry(format!("gave up validating {} under contention", log_id(st_id))))
    }

    /// Validation that also hands the service a proxy-granting ticket for
    /// `callback`. A rejected callback only means no proxy-granting ticket; any
    /// other delegation failure fails the validation.
    pub fn validate_service_ticket_with_proxy(&self, st_id: &str, service: &Service, callback: &Credential) -> CasResult<Assertion> {
        let (st, _) = self.live_service_ticket(st_id, self.clock.now())?;
        if !st.service.matches(service) || self.registered_service(service).is_err() {
            // Burns the ticket and reports the mismatch without delegating.
            return self.validate_service_ticket(st_id, service);
        }
        let pgt = match self.delegate_ticket_granting_ticket(st_id, callback) {
            Ok(pgt) => Some(pgt),
            Err(CasError::Authentication { message }) => {
                info!(target: "tessera::cas", "proxy callback not accepted for {}: {}", log_id(st_id), message);
                None
            }
            Err(e) => return Err(e),
        };
        match self.validate_service_ticket(st_id, service) {
            Ok(mut assertion) => {
                assertion.proxy_granting_ticket = pgt.map(|p| p.id);
                Ok(assertion)
            }
            Err(e) => {
                // Nobody was handed the proxy-granting ticket; it must not outlive the failure.
                if let Some(pgt) = pgt {
                    self.destroy_quietly(pgt);
                }
                Err(e)
            }
        }
    }

    /// End a session and everything issued under it. Unknown ids and ids of
    /// non-granting tickets are ignored.
    pub fn destroy_ticket_granting_ticket(&self, tgt_id: &str) -> CasResult<Vec<LogoutRequest>> {
        let tgt = match self.registry.fetch_ticket(tgt_id)? {
            Some(Ticket::Granting(t)) => t,
            Some(Ticket::Service(_)) => {
                debug!(target: "tessera::cas", "ignoring destroy of non-granting ticket {}", log_id(tgt_id));
                return Ok(Vec::new());
            }
            None => {
                debug!(target: "tessera::cas", "ignoring destroy of unknown ticket {}", log_id(tgt_id));
                return Ok(Vec::new());
            }
        };
        info!(target: "tessera::cas", "destroying {} principal='{}'", log_id(tgt_id), tgt.authentication().principal.id);
        destroy_granting_tree(self.registry.as_ref(), self.logout_manager.as_ref(), tgt)
    }

    /// Kind-checked lookup with expiry handling; granting tickets are checked
    /// together with their ancestors.
    pub fn get_ticket(&self, id: &str, expected: TicketKind) -> CasResult<Ticket> {
        let now = self.clock.now();
        if expected.is_granting() {
            let mut chain = self.live_chain(id, now)?;
            return Ok(Ticket::Granting(chain.swap_remove(0)));
        }
        self.live_service_ticket(id, now).map(|(st, _)| Ticket::Service(st))
    }

    /// Live root sessions of `principal_id`.
    pub fn sessions_for(&self, principal_id: &str) -> CasResult<Vec<TicketGrantingTicket>> {
        Ok(self
            .registry
            .sessions_at(self.clock.now())?
            .into_iter()
            .filter(|t| t.authentication().principal.id == principal_id)
            .collect())
    }

    pub fn session_count(&self) -> CasResult<usize> { self.registry.session_count_at(self.clock.now()) }

    fn registered_service(&self, service: &Service) -> CasResult<RegisteredService> {
        match self.services_manager.find_service_by(service) {
            Some(r) if r.enabled => Ok(r),
            Some(r) => {
                warn!(target: "tessera::cas", "service '{}' matched disabled registration '{}'", service.id, r.name);
                Err(CasError::unauthorized_service(format!("service '{}' is not enabled", service.id)))
            }
            None => {
                warn!(target: "tessera::cas", "service '{}' is not registered", service.id);
                Err(CasError::unauthorized_service(format!("service '{}' is not registered", service.id)))
            }
        }
    }

    /// Live granting ticket `id` followed by its live ancestors, root last.
    fn live_chain(&self, id: &str, now: DateTime<Utc>) -> CasResult<Vec<TicketGrantingTicket>> {
        let mut chain = vec![self.live_granting_ticket(id, now)?];
        loop {
            let Some(parent_id) = chain.last().and_then(|t| t.parent_id.clone()) else {
                return Ok(chain);
            };
            if chain.len() >= MAX_PROXY_CHAIN_DEPTH {
                return Err(CasError::creation(format!("proxy chain above {} is too deep", log_id(id))));
            }
            match self.live_granting_ticket(&parent_id, now) {
                Ok(parent) => chain.push(parent),
                Err(CasError::TicketNotFound { .. }) | Err(CasError::TicketExpired { .. }) => {
                    // The topmost surviving ticket lost its parent; its whole tree goes,
                    // unless an expired parent already took it down.
                    if let Some(top) = chain.pop() {
                        if let Some(Ticket::Granting(current)) = self.registry.fetch_ticket(&top.id)? {
                            debug!(target: "tessera::cas", "{} outlived its parent, destroying", log_id(&current.id));
                            self.destroy_quietly(current);
                        }
                    }
                    return Err(CasError::expired(id));
                }
                Err(e) => return Err(e),
            }
        }
    }

    fn live_granting_ticket(&self, id: &str, now: DateTime<Utc>) -> CasResult<TicketGrantingTicket> {
        let tgt = match self.registry.fetch_ticket(id)? {
            Some(Ticket::Granting(t)) => t,
            Some(other) => {
                return Err(CasError::WrongTicketKind {
                    id: id.to_string(),
                    expected: TicketKind::TicketGranting,
                    actual: other.kind(),
                })
            }
            None => return Err(CasError::not_found(id)),
        };
        if tgt.is_expired_at(now) {
            debug!(target: "tessera::cas", "{} expired", log_id(id));
            self.destroy_quietly(tgt);
            return Err(CasError::expired(id));
        }
        Ok(tgt)
    }

    fn destroy_quietly(&self, tgt: TicketGrantingTicket) {
        let id = tgt.id.clone();
        if let Err(e) = destroy_granting_tree(self.registry.as_ref(), self.logout_manager.as_ref(), tgt) {
            warn!(target: "tessera::cas", "cleanup of {} failed: {}", log_id(&id), e);
        }
    }

    /// Live service ticket and the live granting chain above it.
    fn live_service_ticket(&self, st_id: &str, now: DateTime<Utc>) -> CasResult<(ServiceTicket, Vec<TicketGrantingTicket>)> {
        let ticket = self.registry.get_ticket_at(st_id, TicketKind::Service, now)?;
        let actual = ticket.kind();
        let Some(st) = ticket.into_service() else {
            return Err(CasError::WrongTicketKind { id: st_id.to_string(), expected: TicketKind::Service, actual });
        };
        match self.live_chain(&st.granting_ticket_id, now) {
            Ok(chain) => Ok((st, chain)),
            Err(CasError::TicketNotFound { .. }) | Err(CasError::TicketExpired { .. }) => {
                let mut dead = Ticket::Service(st);
                dead.mark_expired();
                purge(self.registry.as_ref(), &dead)?;
                Err(CasError::expired(st_id))
            }
            Err(e) => Err(e),
        }
    }

    /// Record one use of `st` and build the assertion. `None` means a
    /// concurrent validation recorded a use first and `st` is stale.
    fn consume(
        &self,
        mut st: ServiceTicket,
        chain: Vec<TicketGrantingTicket>,
        service: &Service,
        registered: &RegisteredService,
        now: DateTime<Utc>,
    ) -> CasResult<Option<Assertion>> {
        let read_uses = st.stats.use_count;
        let matched = st.is_valid_for(service, now);
        if st.is_expired_at(now) {
            let mut used = Ticket::Service(st.clone());
            used.mark_expired();
            // Whoever removes a used-up ticket owns this validation.
            if !purge(self.registry.as_ref(), &used)? {
                return Err(CasError::expired(&st.id));
            }
        } else {
            match self.registry.update_ticket_if(&Ticket::Service(st.clone()), read_uses) {
                Ok(true) => {}
                Ok(false) => return Ok(None),
                Err(CasError::TicketNotFound { .. }) => return Err(CasError::expired(&st.id)),
                Err(e) => return Err(e),
            }
        }
        if !matched {
            warn!(
                target: "tessera::cas",
                "{} was issued for '{}' but presented by '{}'",
                log_id(&st.id), st.service.id, service.id
            );
            return Err(CasError::unauthorized_service(format!(
                "ticket was not issued for service '{}'",
                service.id
            )));
        }

        let Some(root) = chain.last() else {
            return Err(CasError::not_found(&st.granting_ticket_id));
        };
        let root_principal = &root.authentication().principal;
        let released = Principal::with_attributes(
            registered.resolve_username(root_principal, service),
            registered.released_attributes(root_principal),
        );
        let primary = root.authentication().with_principal(released);
        let hops = chain
            .iter()
            .map(|t| ChainedAuthentication {
                ticket_kind: t.kind,
                proxied_by: t.proxied_by.clone(),
                authentication: if t.is_root() { primary.clone() } else { t.authentication().clone() },
            })
            .collect();
        info!(
            target: "tessera::cas",
            "validated {} for service='{}' principal='{}' hops={}",
            log_id(&st.id), service.id, primary.principal.id, chain.len()
        );
        Ok(Some(Assertion {
            primary_authentication: primary,
            chain: hops,
            service: st.service,
            from_new_login: st.from_new_login,
            proxy_granting_ticket: None,
        }))
    }
}

#[cfg(test)]
#[path = "cas_tests.rs"]
mod cas_tests;
