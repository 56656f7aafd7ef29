//! Expiration policies.
//!
//! A policy is configured once per orchestrator and evaluated against each
//! ticket's own usage state. Policies travel inside the ticket so that encoded
//! registries can restore them without a side table.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use super::TicketState;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ExpirationPolicy {
    NeverExpires,
    /// Fixed lifetime from creation, regardless of use.
    HardTimeout { time_to_live_ms: i64 },
    /// Sliding idle timeout measured from the last use.
    Timeout { time_to_kill_ms: i64 },
    /// Expires after `number_of_uses` uses or once idle longer than the timeout.
    MultiTimeUseOrTimeout { number_of_uses: u32, time_to_kill_ms: i64 },
    /// Idle timeout plus a minimum spacing between consecutive uses.
    ThrottledUseAndTimeout { time_to_kill_ms: i64, time_in_between_uses_ms: i64 },
    /// Absolute maximum lifetime AND sliding idle timeout; valid only while neither is exceeded.
    TicketGrantingTicket { max_time_to_live_ms: i64, time_to_kill_ms: i64 },
    /// Long-term ("remember me") authentications use the first policy, everything else the second.
    RememberMe { remember_me: Box<ExpirationPolicy>, session: Box<ExpirationPolicy> },
}

impl Default for ExpirationPolicy {
    fn default() -> Self { ExpirationPolicy::NeverExpires }
}

fn exceeds(now: DateTime<Utc>, since: DateTime<Utc>, limit_ms: i64) -> bool {
    now - since > Duration::milliseconds(limit_ms)
}

impl ExpirationPolicy {
    /// The standard single-use service ticket policy.
    pub fn single_use(time_to_kill_ms: i64) -> Self {
        ExpirationPolicy::MultiTimeUseOrTimeout { number_of_uses: 1, time_to_kill_ms }
    }

    pub fn ticket_granting(max_time_to_live_ms: i64, time_to_kill_ms: i64) -> Self {
        ExpirationPolicy::TicketGrantingTicket { max_time_to_live_ms, time_to_kill_ms }
    }

    pub fn remember_me(remember_me: ExpirationPolicy, session: ExpirationPolicy) -> Self {
        ExpirationPolicy::RememberMe { remember_me: Box::new(remember_me), session: Box::new(session) }
    }

    pub fn is_expired(&self, state: &dyn TicketState, now: DateTime<Utc>) -> bool {
        match self {
            ExpirationPolicy::NeverExpires => false,
            ExpirationPolicy::HardTimeout { time_to_live_ms } => exceeds(now, state.created_at(), *time_to_live_ms),
            ExpirationPolicy::Timeout { time_to_kill_ms } => exceeds(now, state.last_used_at(), *time_to_kill_ms),
            ExpirationPolicy::MultiTimeUseOrTimeout { number_of_uses, time_to_kill_ms } => {
                state.use_count() >= *number_of_uses || exceeds(now, state.last_used_at(), *time_to_kill_ms)
            }
            ExpirationPolicy::ThrottledUseAndTimeout { time_to_kill_ms, time_in_between_uses_ms } => {
                if exceeds(now, state.last_used_at(), *time_to_kill_ms) {
                    return true;
                }
                // Unused tickets are never throttled.
                if state.use_count() == 0 {
                    return false;
                }
                now - state.last_used_at() <= Duration::milliseconds(*time_in_between_uses_ms)
            }
            ExpirationPolicy::TicketGrantingTicket { max_time_to_live_ms, time_to_kill_ms } => {
                exceeds(now, state.created_at(), *max_time_to_live_ms) || exceeds(now, state.last_used_at(), *time_to_kill_ms)
            }
            ExpirationPolicy::RememberMe { remember_me, session } => {
                let long_term = state.authentication().map(|a| a.long_term).unwrap_or(false);
                if long_term { remember_me.is_expired(state, now) } else { session.is_expired(state, now) }
            }
        }
    }
}

#[cfg(test)]
#[path = "expiration_tests.rs"]
mod expiration_tests;
