//! Ticket model: kinds, identifiers, expiration policies and the two ticket
//! shapes (granting and service) kept in the registry.
//!
//! Tickets never hold references to each other. A granting ticket records the
//! ids of the tickets created under it and, when it was delegated, the id of its
//! parent; every traversal goes back through the registry by id.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::identity::Authentication;

mod id;
mod expiration;
mod service;
mod granting;
mod service_ticket;

pub use id::{UniqueTicketIdGenerator, DefaultUniqueTicketIdGenerator};
pub use expiration::ExpirationPolicy;
pub use service::Service;
pub use granting::TicketGrantingTicket;
pub use service_ticket::ServiceTicket;

pub const TICKET_GRANTING_TICKET_PREFIX: &str = "TGT";
pub const PROXY_GRANTING_TICKET_PREFIX: &str = "PGT";
pub const SERVICE_TICKET_PREFIX: &str = "ST";
pub const PROXY_TICKET_PREFIX: &str = "PT";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TicketKind {
    TicketGranting,
    ProxyGranting,
    Service,
    Proxy,
}

impl TicketKind {
    pub fn prefix(self) -> &'static str {
        match self {
            TicketKind::TicketGranting => TICKET_GRANTING_TICKET_PREFIX,
            TicketKind::ProxyGranting => PROXY_GRANTING_TICKET_PREFIX,
            TicketKind::Service => SERVICE_TICKET_PREFIX,
            TicketKind::Proxy => PROXY_TICKET_PREFIX,
        }
    }

    /// Kind implied by an id's prefix (text before the first '-').
    pub fn from_id(id: &str) -> Option<TicketKind> {
        match id.split('-').next()? {
            TICKET_GRANTING_TICKET_PREFIX => Some(TicketKind::TicketGranting),
            PROXY_GRANTING_TICKET_PREFIX => Some(TicketKind::ProxyGranting),
            SERVICE_TICKET_PREFIX => Some(TicketKind::Service),
            PROXY_TICKET_PREFIX => Some(TicketKind::Proxy),
            _ => None,
        }
    }

    pub fn is_granting(self) -> bool {
        matches!(self, TicketKind::TicketGranting | TicketKind::ProxyGranting)
    }

    /// Granting tickets and proxy-granting tickets are interchangeable where a
    /// granting ticket is expected; likewise service and proxy tickets.
    pub fn same_family(self, other: TicketKind) -> bool { self.is_granting() == other.is_granting() }
}

impl fmt::Display for TicketKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            TicketKind::TicketGranting => "ticket-granting",
            TicketKind::ProxyGranting => "proxy-granting",
            TicketKind::Service => "service",
            TicketKind::Proxy => "proxy",
        };
        f.write_str(s)
    }
}

/// Per-ticket mutable state read by expiration policies.
pub trait TicketState {
    fn created_at(&self) -> DateTime<Utc>;
    fn last_used_at(&self) -> DateTime<Utc>;
    fn use_count(&self) -> u32;
    /// Authentication bound to the ticket, when the ticket carries one.
    fn authentication(&self) -> Option<&Authentication> { None }
}

/// Usage bookkeeping shared by both ticket shapes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UsageStats {
    pub created_at: DateTime<Utc>,
    pub last_used_at: DateTime<Utc>,
    pub use_count: u32,
}

impl UsageStats {
    pub fn new(now: DateTime<Utc>) -> Self {
        Self { created_at: now, last_used_at: now, use_count: 0 }
    }

    pub fn touch(&mut self, now: DateTime<Utc>) {
        self.last_used_at = now;
        self.use_count = self.use_count.saturating_add(1);
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Ticket {
    Granting(TicketGrantingTicket),
    Service(ServiceTicket),
}

impl Ticket {
    pub fn id(&self) -> &str {
        match self {
            Ticket::Granting(t) => &t.id,
            Ticket::Service(t) => &t.id,
        }
    }

    pub fn kind(&self) -> TicketKind {
        match self {
            Ticket::Granting(t) => t.kind,
            Ticket::Service(t) => t.kind,
        }
    }

    pub fn use_count(&self) -> u32 {
        match self {
            Ticket::Granting(t) => t.stats.use_count,
            Ticket::Service(t) => t.stats.use_count,
        }
    }

    /// Own policy or explicit mark. Ancestor state is checked by the orchestrator.
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        match self {
            Ticket::Granting(t) => t.is_expired_at(now),
            Ticket::Service(t) => t.is_expired_at(now),
        }
    }

    pub fn mark_expired(&mut self) {
        match self {
            Ticket::Granting(t) => t.mark_expired(),
            Ticket::Service(t) => t.mark_expired(),
        }
    }

    pub fn into_granting(self) -> Option<TicketGrantingTicket> {
        match self {
            Ticket::Granting(t) => Some(t),
            Ticket::Service(_) => None,
        }
    }

    pub fn into_service(self) -> Option<ServiceTicket> {
        match self {
            Ticket::Service(t) => Some(t),
            Ticket::Granting(_) => None,
        }
    }
}

impl From<TicketGrantingTicket> for Ticket {
    fn from(t: TicketGrantingTicket) -> Self { Ticket::Granting(t) }
}

impl From<ServiceTicket> for Ticket {
    fn from(t: ServiceTicket) -> Self { Ticket::Service(t) }
}

/// Log-safe rendering of a ticket id: the prefix and a short tail only.
pub fn log_id(id: &str) -> String {
    let tail: String = id.chars().rev().take(4).collect::<Vec<_>>().into_iter().rev().collect();
    match id.split_once('-') {
        Some((prefix, _)) if id.len() > 8 => format!("{}-…{}", prefix, tail),
        _ => "<short-id>".to_string(),
    }
}
