use std::collections::{HashSet, VecDeque};

use tracing::{info, warn};

use crate::error::{CasError, CasResult};
use crate::logout::{LogoutManager, LogoutRequest};
use crate::ticket::{log_id, Ticket, TicketGrantingTicket};
use super::TicketRegistry;

/// Destroy a granting ticket and everything issued under it.
///
/// Order matters for replicated backends: every ticket in the tree is marked
/// expired and updated first, the logout manager is told about all of
/// them, and only then are the tickets deleted (service tickets first, then
/// granting tickets leaves-first). Registry errors do not stop the walk; the
/// first one is returned after logout and deletion have been attempted.
pub fn destroy_granting_tree(
    registry: &dyn TicketRegistry,
    logout: &dyn LogoutManager,
    root: TicketGrantingTicket,
) -> CasResult<Vec<LogoutRequest>> {
    let root_id = root.id.clone();
    let mut first_err: Option<CasError> = None;
    let mut seen: HashSet<String> = HashSet::new();
    let mut affected: Vec<TicketGrantingTicket> = Vec::new();
    let mut service_ids: Vec<String> = Vec::new();
    let mut queue: VecDeque<TicketGrantingTicket> = VecDeque::from([root]);

    while let Some(mut tgt) = queue.pop_front() {
        if !seen.insert(tgt.id.clone()) { continue; }
        for child in tgt.descendants.iter() {
            match registry.fetch_ticket(child) {
                Ok(Some(Ticket::Granting(pgt))) => queue.push_back(pgt),
                Ok(Some(Ticket::Service(mut st))) => {
                    st.mark_expired();
                    match registry.update_ticket(&Ticket::Service(st.clone())) {
                        Ok(()) | Err(CasError::TicketNotFound { .. }) => {}
                        Err(e) => { first_err.get_or_insert(e); }
                    }
                    service_ids.push(st.id);
                }
                Ok(None) => {}
                Err(e) => { first_err.get_or_insert(e); }
            }
        }
        tgt.mark_expired();
        let marked = Ticket::Granting(tgt);
        match registry.update_ticket(&marked) {
            Ok(()) | Err(CasError::TicketNotFound { .. }) => {}
            Err(e) => { first_err.get_or_insert(e); }
        }
        if let Some(t) = marked.into_granting() { affected.push(t); }
    }

    let requests = logout.perform_logout(&affected);

    let mut deleted = 0usize;
    let ids = service_ids.iter().chain(affected.iter().rev().map(|t| &t.id));
    for id in ids {
        match registry.delete_ticket(id) {
            Ok(true) => deleted += 1,
            Ok(false) => {}
            Err(e) => {
                warn!(target: "tessera::registry", "delete failed for {}: {}", log_id(id), e);
                first_err.get_or_insert(e);
            }
        }
    }
    info!(
        target: "tessera::registry",
        "destroyed tree of {} granting_tickets={} deleted={} logout_requests={}",
        log_id(&root_id), affected.len(), deleted, requests.len()
    );
    match first_err {
        Some(e) => Err(e),
        None => Ok(requests),
    }
}
