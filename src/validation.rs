//! Validation results and the predicates protocol endpoints apply to them.

use serde::{Deserialize, Serialize};

use crate::identity::{Attrs, Authentication};
use crate::ticket::{Service, TicketKind};

/// One hop of an authentication chain.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChainedAuthentication {
    /// Kind of the granting ticket the authentication is bound to.
    pub ticket_kind: TicketKind,
    /// Service that delegated this hop; `None` for the root session.
    pub proxied_by: Option<Service>,
    pub authentication: Authentication,
}

/// What a successful service ticket validation hands back to the service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Assertion {
    /// Root session's authentication, with the principal id and attributes as
    /// released to this service.
    pub primary_authentication: Authentication,
    /// Most recent hop first, the root session last. Never includes
    /// authentications recorded by renew.
    pub chain: Vec<ChainedAuthentication>,
    pub service: Service,
    pub from_new_login: bool,
    /// Proxy-granting ticket handed to the service during this validation.
    pub proxy_granting_ticket: Option<String>,
}

impl Assertion {
    pub fn principal_id(&self) -> &str { &self.primary_authentication.principal.id }

    pub fn attributes(&self) -> &Attrs { &self.primary_authentication.principal.attributes }

    pub fn chained_authentications(&self) -> impl Iterator<Item = &Authentication> {
        self.chain.iter().map(|c| &c.authentication)
    }

    pub fn chain_len(&self) -> usize { self.chain.len() }

    pub fn is_proxied(&self) -> bool { self.chain.len() > 1 }

    /// Services the ticket passed through, most recent first.
    pub fn proxies(&self) -> Vec<&Service> {
        self.chain.iter().filter_map(|c| c.proxied_by.as_ref()).collect()
    }
}

pub trait ValidationSpecification: Send + Sync {
    fn is_satisfied_by(&self, assertion: &Assertion) -> bool;
}

fn renew_satisfied(renew: bool, assertion: &Assertion) -> bool {
    !renew || (assertion.from_new_login && assertion.chain_len() == 1)
}

/// Service tickets only; proxy tickets never validate.
#[derive(Debug, Clone, Copy, Default)]
pub struct Cas10ProtocolValidationSpecification {
    pub renew: bool,
}

impl ValidationSpecification for Cas10ProtocolValidationSpecification {
    fn is_satisfied_by(&self, assertion: &Assertion) -> bool {
        assertion.chain_len() == 1 && renew_satisfied(self.renew, assertion)
    }
}

/// Accepts service and proxy tickets alike.
#[derive(Debug, Clone, Copy, Default)]
pub struct Cas20ProtocolValidationSpecification {
    pub renew: bool,
}

impl ValidationSpecification for Cas20ProtocolValidationSpecification {
    fn is_satisfied_by(&self, assertion: &Assertion) -> bool { renew_satisfied(self.renew, assertion) }
}

/// Rejects any assertion that went through a proxy hop.
#[derive(Debug, Clone, Copy, Default)]
pub struct Cas20WithoutProxyingValidationSpecification {
    pub renew: bool,
}

impl ValidationSpecification for Cas20WithoutProxyingValidationSpecification {
    fn is_satisfied_by(&self, assertion: &Assertion) -> bool {
        !assertion.is_proxied() && renew_satisfied(self.renew, assertion)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use crate::identity::Principal;

    fn hop(kind: TicketKind, id: &str, proxied_by: Option<&str>) -> ChainedAuthentication {
        ChainedAuthentication {
            ticket_kind: kind,
            proxied_by: proxied_by.map(Service::new),
            authentication: Authentication::new(Principal::new(id), Utc::now()),
        }
    }

    fn assertion(chain: Vec<ChainedAuthentication>, from_new_login: bool) -> Assertion {
        Assertion {
            primary_authentication: Authentication::new(Principal::new("alice"), Utc::now()),
            chain,
            service: Service::new("https://a.example"),
            from_new_login,
            proxy_granting_ticket: None,
        }
    }

    #[test]
    fn direct_assertion_satisfies_every_spec() {
        let a = assertion(vec![hop(TicketKind::TicketGranting, "alice", None)], false);
        assert!(Cas10ProtocolValidationSpecification::default().is_satisfied_by(&a));
        assert!(Cas20ProtocolValidationSpecification::default().is_satisfied_by(&a));
        assert!(Cas20WithoutProxyingValidationSpecification::default().is_satisfied_by(&a));
        assert!(!a.is_proxied());
    }

    #[test]
    fn proxied_assertion_needs_cas20() {
        let a = assertion(
            vec![
                hop(TicketKind::ProxyGranting, "https://proxy.example/cb", Some("https://proxy.example")),
                hop(TicketKind::TicketGranting, "alice", None),
            ],
            false,
        );
        assert!(Cas20ProtocolValidationSpecification::default().is_satisfied_by(&a));
        assert!(!Cas20WithoutProxyingValidationSpecification::default().is_satisfied_by(&a));
        assert!(!Cas10ProtocolValidationSpecification::default().is_satisfied_by(&a));
        assert_eq!(a.proxies(), vec![&Service::new("https://proxy.example")]);
    }

    #[test]
    fn renew_requires_fresh_direct_login() {
        let spec = Cas20ProtocolValidationSpecification { renew: true };
        assert!(!spec.is_satisfied_by(&assertion(vec![hop(TicketKind::TicketGranting, "alice", None)], false)));
        assert!(spec.is_satisfied_by(&assertion(vec![hop(TicketKind::TicketGranting, "alice", None)], true)));
    }
}
