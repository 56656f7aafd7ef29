//!
//! tessera ticket registry
//! -----------------------
//! The registry is the only shared mutable state in the broker. The orchestrator
//! holds no locks of its own and performs every change as read, mutate, then
//! `update_ticket`, so any backend honouring the contract below can be swapped
//! in without touching orchestration logic.
//!
//! Contract:
//! - each call is atomic for the id it touches; distinct ids never interfere;
//! - `get_ticket*` never hands out a ticket that was already deleted;
//! - `update_ticket` on a missing id fails with `TicketNotFound` rather than
//!   re-creating it;
//! - `update_ticket_if` only writes while the stored use count is the one the
//!   caller read, which is how concurrent consumers of a multi-use ticket keep
//!   every use counted;
//! - `delete_ticket` reports whether something was removed, which is how
//!   concurrent consumers of a single-use ticket learn who won.

use chrono::{DateTime, Utc};
use tracing::debug;

use crate::error::{CasError, CasResult};
use crate::ticket::{log_id, Ticket, TicketGrantingTicket, TicketKind};

mod memory;
mod encoded;
mod cascade;
mod cleaner;

pub use memory::DefaultTicketRegistry;
pub use encoded::EncodedTicketRegistry;
pub use cascade::destroy_granting_tree;
pub use cleaner::{RegistryCleaner, CleanerHandle};

pub trait TicketRegistry: Send + Sync {
    /// Store a new ticket. Re-using an id is a creation failure.
    fn add_ticket(&self, ticket: Ticket) -> CasResult<()>;

    /// Raw lookup with no kind or expiry checks.
    fn fetch_ticket(&self, id: &str) -> CasResult<Option<Ticket>>;

    /// Persist an in-place mutation. Required after every change.
    fn update_ticket(&self, ticket: &Ticket) -> CasResult<()>;

    /// Like `update_ticket`, but only while the stored copy still has
    /// `expected_use_count` uses. `Ok(false)` means someone else wrote first.
    fn update_ticket_if(&self, ticket: &Ticket, expected_use_count: u32) -> CasResult<bool>;

    /// True iff something was removed.
    fn delete_ticket(&self, id: &str) -> CasResult<bool>;

    /// Snapshot of every stored ticket, for sweeps and session queries.
    fn tickets(&self) -> CasResult<Vec<Ticket>>;

    /// Lookup for an operation expecting `expected`'s family.
    ///
    /// Missing ids fail `TicketNotFound`, ids of the other family fail
    /// `WrongTicketKind`. A ticket past its policy is marked, updated, deleted and
    /// reported as `TicketExpired`.
    fn get_ticket_at(&self, id: &str, expected: TicketKind, now: DateTime<Utc>) -> CasResult<Ticket> {
        let Some(mut ticket) = self.fetch_ticket(id)? else {
            return Err(CasError::not_found(id));
        };
        if !ticket.kind().same_family(expected) {
            return Err(CasError::WrongTicketKind { id: id.to_string(), expected, actual: ticket.kind() });
        }
        if ticket.is_expired_at(now) {
            debug!(target: "tessera::registry", "purging expired ticket {}", log_id(id));
            ticket.mark_expired();
            purge(self, &ticket)?;
            return Err(CasError::expired(id));
        }
        Ok(ticket)
    }

    fn get_ticket(&self, id: &str, expected: TicketKind) -> CasResult<Ticket> {
        self.get_ticket_at(id, expected, Utc::now())
    }

    /// Live root sessions (not proxy-granting tickets).
    fn sessions_at(&self, now: DateTime<Utc>) -> CasResult<Vec<TicketGrantingTicket>> {
        Ok(self
            .tickets()?
            .into_iter()
            .filter_map(Ticket::into_granting)
            .filter(|t| t.is_root() && !t.is_expired_at(now))
            .collect())
    }

    fn session_count_at(&self, now: DateTime<Utc>) -> CasResult<usize> {
        Ok(self.sessions_at(now)?.len())
    }
}

/// Update-then-delete for a ticket already marked expired. A concurrent delete
/// between the two steps is not an error.
pub(crate) fn purge<R: TicketRegistry + ?Sized>(registry: &R, ticket: &Ticket) -> CasResult<bool> {
    match registry.update_ticket(ticket) {
        Ok(()) | Err(CasError::TicketNotFound { .. }) => {}
        Err(e) => return Err(e),
    }
    registry.delete_ticket(ticket.id())
}

#[cfg(test)]
#[path = "registry_tests.rs"]
mod registry_tests;
