use std::collections::HashMap;

use parking_lot::RwLock;
use tracing::debug;

use crate::error::{CasError, CasResult};
use crate::ticket::{log_id, Ticket};
use super::TicketRegistry;

/// In-process registry. Tickets are stored by value; every read hands out a copy,
/// so `update_ticket` is what makes a mutation visible.
#[derive(Debug, Default)]
pub struct DefaultTicketRegistry {
    map: RwLock<HashMap<String, Ticket>>,
}

impl DefaultTicketRegistry {
    pub fn new() -> Self { Self::default() }

    pub fn len(&self) -> usize { self.map.read().len() }

    pub fn is_empty(&self) -> bool { self.map.read().is_empty() }
}

impl TicketRegistry for DefaultTicketRegistry {
    fn add_ticket(&self, ticket: Ticket) -> CasResult<()> {
        let mut m = self.map.write();
        if m.contains_key(ticket.id()) {
            return Err(CasError::creation(format!("duplicate ticket id {}", log_id(ticket.id()))));
        }
        debug!(target: "tessera::registry", "add {}", log_id(ticket.id()));
        m.insert(ticket.id().to_string(), ticket);
        Ok(())
    }

    fn fetch_ticket(&self, id: &str) -> CasResult<Option<Ticket>> {
        Ok(self.map.read().get(id).cloned())
    }

    fn update_ticket(&self, ticket: &Ticket) -> CasResult<()> {
        let mut m = self.map.write();
        match m.get_mut(ticket.id()) {
            Some(slot) => {
                *slot = ticket.clone();
                Ok(())
            }
            None => Err(CasError::not_found(ticket.id())),
        }
    }

    fn update_ticket_if(&self, ticket: &Ticket, expected_use_count: u32) -> CasResult<bool> {
        let mut m = self.map.write();
        match m.get_mut(ticket.id()) {
            Some(slot) if slot.use_count() == expected_use_count => {
                *slot = ticket.clone();
                Ok(true)
            }
            Some(_) => {
                debug!(target: "tessera::registry", "stale update refused for {}", log_id(ticket.id()));
                Ok(false)
            }
            None => Err(CasError::not_found(ticket.id())),
        }
    }

    fn delete_ticket(&self, id: &str) -> CasResult<bool> {
        let removed = self.map.write().remove(id).is_some();
        if removed {
            debug!(target: "tessera::registry", "delete {}", log_id(id));
        }
        Ok(removed)
    }

    fn tickets(&self) -> CasResult<Vec<Ticket>> {
        Ok(self.map.read().values().cloned().collect())
    }
}
