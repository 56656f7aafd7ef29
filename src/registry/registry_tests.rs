use std::sync::Arc;

use chrono::{Duration, Utc};

use super::*;
use crate::identity::{Authentication, Principal};
use crate::logout::{DefaultLogoutManager, LogoutNotifier, NoopLogoutManager};
use crate::ticket::{ExpirationPolicy, Service};

fn tgt(id: &str, policy: ExpirationPolicy) -> TicketGrantingTicket {
    let now = Utc::now();
    TicketGrantingTicket::new(id.to_string(), Authentication::new(Principal::new("alice"), now), policy, now)
}

#[test]
fn get_ticket_distinguishes_missing_and_wrong_kind() {
    let reg = DefaultTicketRegistry::new();
    reg.add_ticket(tgt("TGT-1-abcdef", ExpirationPolicy::NeverExpires).into()).unwrap();

    assert!(matches!(reg.get_ticket("TGT-404-zzzzzz", TicketKind::TicketGranting), Err(CasError::TicketNotFound { .. })));
    match reg.get_ticket("TGT-1-abcdef", TicketKind::Service) {
        Err(CasError::WrongTicketKind { expected, actual, .. }) => {
            assert_eq!(expected, TicketKind::Service);
            assert_eq!(actual, TicketKind::TicketGranting);
        }
        other => panic!("unexpected {:?}", other),
    }
    // a proxy-granting lookup accepts a plain granting ticket
    assert!(reg.get_ticket("TGT-1-abcdef", TicketKind::ProxyGranting).is_ok());
}

#[test]
fn expired_ticket_is_purged_on_lookup() {
    let reg = DefaultTicketRegistry::new();
    reg.add_ticket(tgt("TGT-2-abcdef", ExpirationPolicy::Timeout { time_to_kill_ms: 1_000 }).into()).unwrap();
    let later = Utc::now() + Duration::seconds(5);
    assert!(matches!(reg.get_ticket_at("TGT-2-abcdef", TicketKind::TicketGranting, later), Err(CasError::TicketExpired { .. })));
    assert!(reg.fetch_ticket("TGT-2-abcdef").unwrap().is_none());
    assert!(matches!(reg.get_ticket_at("TGT-2-abcdef", TicketKind::TicketGranting, later), Err(CasError::TicketNotFound { .. })));
}

#[test]
fn delete_reports_removal_and_update_never_resurrects() {
    let reg = DefaultTicketRegistry::new();
    let t: Ticket = tgt("TGT-3-abcdef", ExpirationPolicy::NeverExpires).into();
    reg.add_ticket(t.clone()).unwrap();
    assert!(matches!(reg.add_ticket(t.clone()), Err(CasError::TicketCreation { .. })));
    assert!(reg.delete_ticket("TGT-3-abcdef").unwrap());
    assert!(!reg.delete_ticket("TGT-3-abcdef").unwrap());
    assert!(matches!(reg.update_ticket(&t), Err(CasError::TicketNotFound { .. })));
    assert!(reg.is_empty());
}

#[test]
fn sessions_are_live_roots_only() {
    let reg = DefaultTicketRegistry::new();
    let now = Utc::now();
    let mut root = tgt("TGT-4-abcdef", ExpirationPolicy::NeverExpires);
    let mut st = root.grant_service_ticket("ST-4-abcdef".into(), &Service::new("https://a.example"), ExpirationPolicy::NeverExpires, false, true, now);
    let pgt = st
        .grant_proxy_granting_ticket("PGT-4-abcdef".into(), Authentication::new(Principal::new("https://a.example/cb"), now), ExpirationPolicy::NeverExpires, now)
        .unwrap();
    let mut dead = tgt("TGT-5-abcdef", ExpirationPolicy::NeverExpires);
    dead.mark_expired();
    for t in [Ticket::from(root), st.into(), pgt.into(), dead.into()] {
        reg.add_ticket(t).unwrap();
    }
    let sessions = reg.sessions_at(now).unwrap();
    assert_eq!(sessions.len(), 1);
    assert_eq!(sessions[0].id, "TGT-4-abcdef");
    assert_eq!(reg.session_count_at(now).unwrap(), 1);
}

#[test]
fn destroy_removes_whole_tree_and_logs_out_every_session() {
    struct Quiet;
    impl LogoutNotifier for Quiet {
        fn notify(&self, _r: &crate::logout::LogoutRequest) -> CasResult<()> { Ok(()) }
    }

    let reg = DefaultTicketRegistry::new();
    let now = Utc::now();
    let mut root = tgt("TGT-6-abcdef", ExpirationPolicy::NeverExpires);
    let mut st = root.grant_service_ticket("ST-6-aaaaaa".into(), &Service::new("https://a.example"), ExpirationPolicy::NeverExpires, false, true, now);
    let mut pgt = st
        .grant_proxy_granting_ticket("PGT-6-bbbbbb".into(), Authentication::new(Principal::new("https://a.example/cb"), now), ExpirationPolicy::NeverExpires, now)
        .unwrap();
    root.record_descendant(&pgt.id);
    let pt = pgt.grant_service_ticket("PT-6-cccccc".into(), &Service::new("https://b.example"), ExpirationPolicy::NeverExpires, false, true, now);
    let unrelated = tgt("TGT-7-abcdef", ExpirationPolicy::NeverExpires);
    for t in [Ticket::from(root.clone()), st.into(), pgt.into(), pt.into(), unrelated.into()] {
        reg.add_ticket(t).unwrap();
    }

    let logout = DefaultLogoutManager::new(Arc::new(Quiet));
    let requests = destroy_granting_tree(&reg, &logout, root).unwrap();
    // one for the root's service ticket, one for the proxy ticket
    assert_eq!(requests.len(), 2);
    assert_eq!(reg.len(), 1);
    assert!(reg.fetch_ticket("TGT-7-abcdef").unwrap().is_some());
}

#[test]
fn cleaner_sweeps_expired_and_orphaned_tickets() {
    let reg = Arc::new(DefaultTicketRegistry::new());
    let now = Utc::now();
    let mut live = tgt("TGT-8-abcdef", ExpirationPolicy::NeverExpires);
    let fresh = live.grant_service_ticket("ST-8-aaaaaa".into(), &Service::new("https://a.example"), ExpirationPolicy::single_use(10_000), false, true, now);
    let mut stale = live.grant_service_ticket("ST-8-bbbbbb".into(), &Service::new("https://b.example"), ExpirationPolicy::single_use(10_000), false, false, now);
    stale.mark_expired();
    let mut gone = tgt("TGT-9-abcdef", ExpirationPolicy::NeverExpires);
    let orphan = gone.grant_service_ticket("ST-9-aaaaaa".into(), &Service::new("https://a.example"), ExpirationPolicy::NeverExpires, false, true, now);
    for t in [Ticket::from(live), fresh.into(), stale.into(), orphan.into()] {
        reg.add_ticket(t).unwrap();
    }

    let cleaner = RegistryCleaner::new(reg.clone(), Arc::new(NoopLogoutManager), Arc::new(crate::clock::SystemClock));
    assert_eq!(cleaner.clean().unwrap(), 2);
    assert!(reg.fetch_ticket("ST-8-aaaaaa").unwrap().is_some());
    assert!(reg.fetch_ticket("ST-9-aaaaaa").unwrap().is_none());
    assert_eq!(cleaner.clean().unwrap(), 0);
}

#[test]
fn conditional_update_refuses_a_stale_use_count() {
    let reg = DefaultTicketRegistry::new();
    let now = Utc::now();
    let mut root = tgt("TGT-10-abcdef", ExpirationPolicy::NeverExpires);
    let st = root.grant_service_ticket("ST-10-aaaaaa".into(), &Service::new("https://a.example"), ExpirationPolicy::NeverExpires, false, true, now);
    reg.add_ticket(st.clone().into()).unwrap();

    let mut first = st.clone();
    let mut second = st.clone();
    first.is_valid_for(&Service::new("https://a.example"), now);
    second.is_valid_for(&Service::new("https://a.example"), now);
    assert!(reg.update_ticket_if(&first.into(), 0).unwrap());
    assert!(!reg.update_ticket_if(&second.clone().into(), 0).unwrap());
    assert_eq!(reg.fetch_ticket("ST-10-aaaaaa").unwrap().unwrap().use_count(), 1);

    reg.delete_ticket("ST-10-aaaaaa").unwrap();
    assert!(matches!(reg.update_ticket_if(&second.into(), 1), Err(CasError::TicketNotFound { .. })));
}

#[test]
fn destroy_marks_every_ticket_before_deleting_it() {
    use parking_lot::Mutex;

    /// Records each write so the order a replicated store would see can be checked.
    #[derive(Default)]
    struct Journal {
        inner: DefaultTicketRegistry,
        writes: Mutex<Vec<(&'static str, String, bool)>>,
    }

    impl TicketRegistry for Journal {
        fn add_ticket(&self, ticket: Ticket) -> CasResult<()> { self.inner.add_ticket(ticket) }
        fn fetch_ticket(&self, id: &str) -> CasResult<Option<Ticket>> { self.inner.fetch_ticket(id) }
        fn update_ticket(&self, ticket: &Ticket) -> CasResult<()> {
            let expired = match ticket {
                Ticket::Granting(t) => t.expired,
                Ticket::Service(t) => t.expired,
            };
            self.writes.lock().push(("update", ticket.id().to_string(), expired));
            self.inner.update_ticket(ticket)
        }
        fn update_ticket_if(&self, ticket: &Ticket, expected_use_count: u32) -> CasResult<bool> {
            self.inner.update_ticket_if(ticket, expected_use_count)
        }
        fn delete_ticket(&self, id: &str) -> CasResult<bool> {
            self.writes.lock().push(("delete", id.to_string(), true));
            self.inner.delete_ticket(id)
        }
        fn tickets(&self) -> CasResult<Vec<Ticket>> { self.inner.tickets() }
    }

    let reg = Journal::default();
    let now = Utc::now();
    let mut root = tgt("TGT-11-abcdef", ExpirationPolicy::NeverExpires);
    let st = root.grant_service_ticket("ST-11-aaaaaa".into(), &Service::new("https://a.example"), ExpirationPolicy::NeverExpires, false, true, now);
    for t in [Ticket::from(root.clone()), st.into()] {
        reg.add_ticket(t).unwrap();
    }

    destroy_granting_tree(&reg, &NoopLogoutManager, root).unwrap();
    let writes = reg.writes.lock().clone();
    for id in ["ST-11-aaaaaa", "TGT-11-abcdef"] {
        let updated = writes.iter().position(|(op, w, expired)| *op == "update" && w == id && *expired);
        let deleted = writes.iter().position(|(op, w, _)| *op == "delete" && w == id);
        assert!(updated.is_some() && updated < deleted, "{} written out of order: {:?}", id, writes);
    }
    assert!(reg.tickets().unwrap().is_empty());
}
