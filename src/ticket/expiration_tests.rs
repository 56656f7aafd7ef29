use super::*;
use crate::identity::{Authentication, Principal};

struct State {
    created: DateTime<Utc>,
    last: DateTime<Utc>,
    uses: u32,
    auth: Option<Authentication>,
}

impl TicketState for State {
    fn created_at(&self) -> DateTime<Utc> { self.created }
    fn last_used_at(&self) -> DateTime<Utc> { self.last }
    fn use_count(&self) -> u32 { self.uses }
    fn authentication(&self) -> Option<&Authentication> { self.auth.as_ref() }
}

fn fresh(now: DateTime<Utc>) -> State { State { created: now, last: now, uses: 0, auth: None } }

fn ms(n: i64) -> Duration { Duration::milliseconds(n) }

#[test]
fn never_expires() {
    let t0 = Utc::now();
    let s = State { uses: 1_000, ..fresh(t0) };
    assert!(!ExpirationPolicy::NeverExpires.is_expired(&s, t0 + Duration::days(3650)));
}

#[test]
fn hard_timeout_ignores_usage() {
    let t0 = Utc::now();
    let p = ExpirationPolicy::HardTimeout { time_to_live_ms: 1_000 };
    let mut s = fresh(t0);
    assert!(!p.is_expired(&s, t0 + ms(1_000)));
    s.last = t0 + ms(999);
    assert!(p.is_expired(&s, t0 + ms(1_001)));
}

#[test]
fn sliding_timeout_follows_last_use() {
    let t0 = Utc::now();
    let p = ExpirationPolicy::Timeout { time_to_kill_ms: 500 };
    let mut s = fresh(t0);
    s.last = t0 + ms(400);
    assert!(!p.is_expired(&s, t0 + ms(800)));
    assert!(p.is_expired(&s, t0 + ms(901)));
}

#[test]
fn multi_use_hits_limit_or_idle_first() {
    let t0 = Utc::now();
    let p = ExpirationPolicy::single_use(1_100);
    let mut s = fresh(t0);
    assert!(!p.is_expired(&s, t0));
    s.uses = 1;
    assert!(p.is_expired(&s, t0));

    let p = ExpirationPolicy::MultiTimeUseOrTimeout { number_of_uses: 3, time_to_kill_ms: 1_100 };
    let mut s = fresh(t0);
    s.uses = 2;
    assert!(!p.is_expired(&s, t0 + ms(1_100)));
    assert!(p.is_expired(&s, t0 + ms(1_101)));
}

#[test]
fn throttled_rejects_rapid_reuse() {
    let t0 = Utc::now();
    let p = ExpirationPolicy::ThrottledUseAndTimeout { time_to_kill_ms: 10_000, time_in_between_uses_ms: 200 };
    let mut s = fresh(t0);
    assert!(!p.is_expired(&s, t0 + ms(50)));
    s.uses = 1;
    assert!(p.is_expired(&s, t0 + ms(100)));
    assert!(!p.is_expired(&s, t0 + ms(300)));
    assert!(p.is_expired(&s, t0 + ms(10_001)));
}

#[test]
fn ticket_granting_needs_both_thresholds_unexceeded() {
    let t0 = Utc::now();
    let p = ExpirationPolicy::ticket_granting(10_000, 2_000);
    let mut s = fresh(t0);
    assert!(!p.is_expired(&s, t0 + ms(1_500)));
    assert!(p.is_expired(&s, t0 + ms(2_001)));
    // kept alive by use, but hard cap still applies
    s.last = t0 + ms(9_500);
    assert!(!p.is_expired(&s, t0 + ms(9_900)));
    assert!(p.is_expired(&s, t0 + ms(10_001)));
}

#[test]
fn remember_me_switches_on_long_term_authentication() {
    let t0 = Utc::now();
    let p = ExpirationPolicy::remember_me(
        ExpirationPolicy::HardTimeout { time_to_live_ms: 100_000 },
        ExpirationPolicy::HardTimeout { time_to_live_ms: 1_000 },
    );
    let mut s = fresh(t0);
    assert!(p.is_expired(&s, t0 + ms(5_000)));
    s.auth = Some(Authentication::new(Principal::new("alice"), t0).long_term(true));
    assert!(!p.is_expired(&s, t0 + ms(5_000)));
}

#[test]
fn policies_survive_bincode() {
    let p = ExpirationPolicy::remember_me(ExpirationPolicy::NeverExpires, ExpirationPolicy::single_use(10_000));
    let bytes = bincode::serialize(&p).unwrap();
    let back: ExpirationPolicy = bincode::deserialize(&bytes).unwrap();
    assert_eq!(p, back);
}
