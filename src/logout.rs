//! Single logout: when a session ends, every service that received a ticket from
//! it is told so. Notification is best-effort; failures are logged and never
//! reach the caller that destroyed the session.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};
use uuid::Uuid;

use crate::clock::{Clock, SystemClock};
use crate::error::CasResult;
use crate::ticket::{log_id, Service, TicketGrantingTicket};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LogoutRequestStatus {
    NotAttempted,
    Success,
    Failure,
}

/// One logout notification owed to one service session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogoutRequest {
    /// Unique request id, echoed back by services that acknowledge.
    pub request_id: String,
    pub issued_at: DateTime<Utc>,
    /// Service ticket id that opened the session at the service.
    pub session_index: String,
    pub service: Service,
    pub principal_id: String,
    pub status: LogoutRequestStatus,
}

pub trait LogoutManager: Send + Sync {
    /// Called with every granting ticket being destroyed, before any is deleted.
    fn perform_logout(&self, tickets: &[TicketGrantingTicket]) -> Vec<LogoutRequest>;
}

/// Delivers a logout request to its service. Rendering and transport belong to
/// the protocol layer.
pub trait LogoutNotifier: Send + Sync {
    fn notify(&self, request: &LogoutRequest) -> CasResult<()>;
}

/// Notifier that only records the request in the log.
#[derive(Debug, Clone, Default)]
pub struct LoggingNotifier;

impl LogoutNotifier for LoggingNotifier {
    fn notify(&self, request: &LogoutRequest) -> CasResult<()> {
        info!(
            target: "tessera::logout",
            "logout request id={} service='{}' session={}",
            request.request_id, request.service.id, log_id(&request.session_index)
        );
        Ok(())
    }
}

pub struct DefaultLogoutManager {
    notifier: Arc<dyn LogoutNotifier>,
    single_logout_enabled: bool,
    clock: Arc<dyn Clock>,
}

impl Default for DefaultLogoutManager {
    fn default() -> Self { Self::new(Arc::new(LoggingNotifier)) }
}

impl DefaultLogoutManager {
    pub fn new(notifier: Arc<dyn LogoutNotifier>) -> Self {
        Self { notifier, single_logout_enabled: true, clock: Arc::new(SystemClock) }
    }

    pub fn with_single_logout(mut self, enabled: bool) -> Self {
        self.single_logout_enabled = enabled;
        self
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }
}

impl LogoutManager for DefaultLogoutManager {
    fn perform_logout(&self, tickets: &[TicketGrantingTicket]) -> Vec<LogoutRequest> {
        if !self.single_logout_enabled {
            return Vec::new();
        }
        let now = self.clock.now();
        let mut out = Vec::new();
        for tgt in tickets {
            let principal_id = tgt.authentication().principal.id.clone();
            for (st_id, service) in tgt.services.iter() {
                let mut req = LogoutRequest {
                    request_id: format!("LR-{}", Uuid::new_v4()),
                    issued_at: now,
                    session_index: st_id.clone(),
                    service: service.clone(),
                    principal_id: principal_id.clone(),
                    status: LogoutRequestStatus::NotAttempted,
                };
                req.status = match self.notifier.notify(&req) {
                    Ok(()) => LogoutRequestStatus::Success,
                    Err(e) => {
                        warn!(target: "tessera::logout", "logout notification to '{}' failed: {}", service.id, e);
                        LogoutRequestStatus::Failure
                    }
                };
                out.push(req);
            }
        }
        out
    }
}

/// Logout manager that does nothing; for deployments without single logout.
#[derive(Debug, Clone, Default)]
pub struct NoopLogoutManager;

impl LogoutManager for NoopLogoutManager {
    fn perform_logout(&self, _tickets: &[TicketGrantingTicket]) -> Vec<LogoutRequest> { Vec::new() }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::CasError;
    use crate::identity::{Authentication, Principal};
    use crate::ticket::ExpirationPolicy;
    use parking_lot::Mutex;

    #[derive(Default)]
    struct Recording {
        seen: Mutex<Vec<String>>,
        fail_for: Option<String>,
    }

    impl LogoutNotifier for Recording {
        fn notify(&self, request: &LogoutRequest) -> CasResult<()> {
            self.seen.lock().push(request.service.id.clone());
            if self.fail_for.as_deref() == Some(request.service.id.as_str()) {
                return Err(CasError::registry("endpoint unreachable"));
            }
            Ok(())
        }
    }

    fn session() -> TicketGrantingTicket {
        let now = Utc::now();
        let mut t = TicketGrantingTicket::new("TGT-1-abcdef".into(), Authentication::new(Principal::new("alice"), now), ExpirationPolicy::NeverExpires, now);
        t.grant_service_ticket("ST-1-aaaaaa".into(), &Service::new("https://a.example"), ExpirationPolicy::NeverExpires, false, true, now);
        t.grant_service_ticket("ST-2-bbbbbb".into(), &Service::new("https://b.example"), ExpirationPolicy::NeverExpires, false, true, now);
        t
    }

    #[test]
    fn one_request_per_service_session_and_failures_are_absorbed() {
        let notifier = Arc::new(Recording { fail_for: Some("https://b.example".into()), ..Default::default() });
        let mgr = DefaultLogoutManager::new(notifier.clone());
        let reqs = mgr.perform_logout(&[session()]);
        assert_eq!(reqs.len(), 2);
        assert_eq!(notifier.seen.lock().len(), 2);
        let failed: Vec<_> = reqs.iter().filter(|r| r.status == LogoutRequestStatus::Failure).collect();
        assert_eq!(failed.len(), 1);
        assert_eq!(failed[0].service.id, "https://b.example");
        assert!(reqs.iter().all(|r| r.principal_id == "alice" && r.request_id.starts_with("LR-")));
    }

    #[test]
    fn disabled_single_logout_sends_nothing() {
        let notifier = Arc::new(Recording::default());
        let mgr = DefaultLogoutManager::new(notifier.clone()).with_single_logout(false);
        assert!(mgr.perform_logout(&[session()]).is_empty());
        assert!(notifier.seen.lock().is_empty());
    }
}
