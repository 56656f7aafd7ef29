use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{CasError, CasResult};
use crate::identity::Authentication;
use super::{ExpirationPolicy, Service, TicketGrantingTicket, TicketKind, TicketState, UsageStats};

/// Bearer ticket scoped to one service, owned by exactly one granting ticket.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceTicket {
    pub id: String,
    pub kind: TicketKind,
    pub stats: UsageStats,
    pub granting_ticket_id: String,
    pub service: Service,
    pub from_new_login: bool,
    pub expiration_policy: ExpirationPolicy,
    pub expired: bool,
    /// Id of the proxy-granting ticket this ticket was exchanged for, if any.
    pub proxy_granting_ticket_id: Option<String>,
}

impl ServiceTicket {
    pub(crate) fn new(
        id: String,
        kind: TicketKind,
        granting_ticket_id: String,
        service: Service,
        from_new_login: bool,
        expiration_policy: ExpirationPolicy,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id,
            kind,
            stats: UsageStats::new(now),
            granting_ticket_id,
            service,
            from_new_login,
            expiration_policy,
            expired: false,
            proxy_granting_ticket_id: None,
        }
    }

    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        self.expired || self.expiration_policy.is_expired(self, now)
    }

    pub fn mark_expired(&mut self) { self.expired = true; }

    /// Counts as a use whether or not the service matches, so a ticket presented
    /// to the wrong service is consumed all the same.
    pub fn is_valid_for(&mut self, service: &Service, now: DateTime<Utc>) -> bool {
        self.stats.touch(now);
        self.service.matches(service)
    }

    /// Exchange this ticket for a proxy-granting ticket. At most once per ticket.
    pub fn grant_proxy_granting_ticket(
        &mut self,
        id: String,
        authentication: Authentication,
        expiration_policy: ExpirationPolicy,
        now: DateTime<Utc>,
    ) -> CasResult<TicketGrantingTicket> {
        if self.proxy_granting_ticket_id.is_some() {
            return Err(CasError::creation(format!(
                "a proxy-granting ticket was already issued for {}",
                super::log_id(&self.id)
            )));
        }
        self.proxy_granting_ticket_id = Some(id.clone());
        Ok(TicketGrantingTicket::new_proxy_granting(
            id,
            authentication,
            expiration_policy,
            self.granting_ticket_id.clone(),
            self.service.clone(),
            now,
        ))
    }
}

impl TicketState for ServiceTicket {
    fn created_at(&self) -> DateTime<Utc> { self.stats.created_at }
    fn last_used_at(&self) -> DateTime<Utc> { self.stats.last_used_at }
    fn use_count(&self) -> u32 { self.stats.use_count }
}
