use std::collections::{BTreeMap, BTreeSet};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::identity::Authentication;
use super::{ExpirationPolicy, Service, ServiceTicket, TicketKind, TicketState, UsageStats};

/// Root of an SSO session, or (when `parent_id` is set) a proxy-granting ticket
/// delegated to a service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TicketGrantingTicket {
    pub id: String,
    pub kind: TicketKind,
    pub stats: UsageStats,
    authentication: Authentication,
    /// Authentications produced by renew against this session. Never part of the chain.
    supplemental_authentications: Vec<Authentication>,
    pub expiration_policy: ExpirationPolicy,
    pub expired: bool,
    /// Granting ticket this one was delegated under.
    pub parent_id: Option<String>,
    /// Service whose ticket was exchanged for this proxy-granting ticket.
    pub proxied_by: Option<Service>,
    /// Service ticket id -> service, kept for single logout.
    pub services: BTreeMap<String, Service>,
    /// Ids of every service ticket and proxy-granting ticket created directly under this one.
    pub descendants: BTreeSet<String>,
}

impl TicketGrantingTicket {
    pub fn new(id: String, authentication: Authentication, expiration_policy: ExpirationPolicy, now: DateTime<Utc>) -> Self {
        Self {
            id,
            kind: TicketKind::TicketGranting,
            stats: UsageStats::new(now),
            authentication,
            supplemental_authentications: Vec::new(),
            expiration_policy,
            expired: false,
            parent_id: None,
            proxied_by: None,
            services: BTreeMap::new(),
            descendants: BTreeSet::new(),
        }
    }

    pub(crate) fn new_proxy_granting(
        id: String,
        authentication: Authentication,
        expiration_policy: ExpirationPolicy,
        parent_id: String,
        proxied_by: Service,
        now: DateTime<Utc>,
    ) -> Self {
        let mut t = Self::new(id, authentication, expiration_policy, now);
        t.kind = TicketKind::ProxyGranting;
        t.parent_id = Some(parent_id);
        t.proxied_by = Some(proxied_by);
        t
    }

    /// The one authentication bound at creation. There is no setter.
    pub fn authentication(&self) -> &Authentication { &self.authentication }

    pub fn supplemental_authentications(&self) -> &[Authentication] { &self.supplemental_authentications }

    pub fn add_supplemental_authentication(&mut self, authentication: Authentication) {
        self.supplemental_authentications.push(authentication);
    }

    pub fn is_root(&self) -> bool { self.parent_id.is_none() }

    pub fn is_proxy_granting(&self) -> bool { self.kind == TicketKind::ProxyGranting }

    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        self.expired || self.expiration_policy.is_expired(self, now)
    }

    pub fn mark_expired(&mut self) { self.expired = true; }

    /// Record the delegation of a proxy-granting ticket under this one.
    pub fn record_descendant(&mut self, id: &str) { self.descendants.insert(id.to_string()); }

    /// Issue a service ticket for `service`. The first ticket after login counts as
    /// a new login, as does any ticket granted with freshly presented credentials.
    pub fn grant_service_ticket(
        &mut self,
        id: String,
        service: &Service,
        expiration_policy: ExpirationPolicy,
        credentials_provided: bool,
        only_track_most_recent_session: bool,
        now: DateTime<Utc>,
    ) -> ServiceTicket {
        let from_new_login = credentials_provided || self.stats.use_count == 0;
        let kind = if self.is_proxy_granting() { TicketKind::Proxy } else { TicketKind::Service };
        let st = ServiceTicket::new(id, kind, self.id.clone(), service.clone(), from_new_login, expiration_policy, now);
        self.stats.touch(now);
        if only_track_most_recent_session {
            self.services.retain(|_, s| !s.matches(service));
        }
        self.services.insert(st.id.clone(), service.clone());
        self.descendants.insert(st.id.clone());
        st
    }
}

impl TicketState for TicketGrantingTicket {
    fn created_at(&self) -> DateTime<Utc> { self.stats.created_at }
    fn last_used_at(&self) -> DateTime<Utc> { self.stats.last_used_at }
    fn use_count(&self) -> u32 { self.stats.use_count }
    fn authentication(&self) -> Option<&Authentication> { Some(&self.authentication) }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::identity::Principal;

    fn tgt(now: DateTime<Utc>) -> TicketGrantingTicket {
        TicketGrantingTicket::new("TGT-1-x".into(), Authentication::new(Principal::new("alice"), now), ExpirationPolicy::NeverExpires, now)
    }

    #[test]
    fn first_grant_is_new_login_then_sso() {
        let now = Utc::now();
        let mut t = tgt(now);
        let svc = Service::new("https://a.example");
        let st1 = t.grant_service_ticket("ST-1-a".into(), &svc, ExpirationPolicy::single_use(10_000), false, true, now);
        let st2 = t.grant_service_ticket("ST-2-b".into(), &svc, ExpirationPolicy::single_use(10_000), false, true, now);
        assert!(st1.from_new_login);
        assert!(!st2.from_new_login);
        assert_eq!(st2.kind, TicketKind::Service);
        assert_eq!(t.stats.use_count, 2);
        assert!(t.descendants.contains("ST-1-a") && t.descendants.contains("ST-2-b"));
        // only the newest session per service is tracked for logout
        assert_eq!(t.services.len(), 1);
        assert!(t.services.contains_key("ST-2-b"));
    }

    #[test]
    fn proxy_granting_tickets_issue_proxy_tickets() {
        let now = Utc::now();
        let mut pgt = TicketGrantingTicket::new_proxy_granting(
            "PGT-1-x".into(),
            Authentication::new(Principal::new("https://proxy.example/cb"), now),
            ExpirationPolicy::NeverExpires,
            "TGT-1-x".into(),
            Service::new("https://proxy.example"),
            now,
        );
        let pt = pgt.grant_service_ticket("PT-1-y".into(), &Service::new("https://b.example"), ExpirationPolicy::NeverExpires, false, false, now);
        assert_eq!(pt.kind, TicketKind::Proxy);
        assert!(!pgt.is_root());
    }

    #[test]
    fn explicit_mark_wins_over_policy() {
        let now = Utc::now();
        let mut t = tgt(now);
        assert!(!t.is_expired_at(now));
        t.mark_expired();
        assert!(t.is_expired_at(now));
    }
}
