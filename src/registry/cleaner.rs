use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use tracing::{debug, info, warn};

use crate::clock::Clock;
use crate::error::CasResult;
use crate::logout::LogoutManager;
use crate::ticket::Ticket;
use super::{destroy_granting_tree, purge, TicketRegistry};

/// Sweeps expired and orphaned tickets out of a registry.
#[derive(Clone)]
pub struct RegistryCleaner {
    registry: Arc<dyn TicketRegistry>,
    logout: Arc<dyn LogoutManager>,
    clock: Arc<dyn Clock>,
}

impl RegistryCleaner {
    pub fn new(registry: Arc<dyn TicketRegistry>, logout: Arc<dyn LogoutManager>, clock: Arc<dyn Clock>) -> Self {
        Self { registry, logout, clock }
    }

    /// One sweep. Expired granting tickets go through the same mark, logout,
    /// delete path as an explicit destroy; proxy-granting tickets whose parent is
    /// gone count as expired. Service tickets that are expired or whose granting
    /// ticket is gone are deleted. Returns how many tickets were removed.
    pub fn clean(&self) -> CasResult<usize> {
        let now = self.clock.now();
        let all = self.registry.tickets()?;
        let present: HashSet<String> = all.iter().map(|t| t.id().to_string()).collect();
        let before = all.len();

        for ticket in all {
            match ticket {
                Ticket::Granting(tgt) => {
                    let orphaned = tgt.parent_id.as_ref().map(|p| !present.contains(p)).unwrap_or(false);
                    if !(orphaned || tgt.is_expired_at(now)) { continue; }
                    // May already be gone as part of an ancestor's tree.
                    if self.registry.fetch_ticket(&tgt.id)?.is_none() { continue; }
                    if let Err(e) = destroy_granting_tree(self.registry.as_ref(), self.logout.as_ref(), tgt) {
                        warn!(target: "tessera::registry", "cleaner cascade failed: {}", e);
                    }
                }
                Ticket::Service(st) => {
                    if present.contains(&st.granting_ticket_id) && !st.is_expired_at(now) { continue; }
                    let mut t = Ticket::Service(st);
                    t.mark_expired();
                    purge(self.registry.as_ref(), &t)?;
                }
            }
        }
        let after = self.registry.tickets()?.len();
        let removed = before.saturating_sub(after);
        debug!(target: "tessera::registry", "cleaner sweep removed={} remaining={}", removed, after);
        Ok(removed)
    }

    /// Run `clean` every `interval` on a background thread until stopped.
    pub fn spawn(self, interval: Duration) -> CleanerHandle {
        let stop = Arc::new(AtomicBool::new(false));
        let flag = stop.clone();
        let join = std::thread::spawn(move || {
            info!(target: "tessera::registry", "registry cleaner started interval_ms={}", interval.as_millis());
            let tick = Duration::from_millis(50).min(interval);
            let mut waited = Duration::ZERO;
            while !flag.load(Ordering::Relaxed) {
                std::thread::sleep(tick);
                waited += tick;
                if waited < interval { continue; }
                waited = Duration::ZERO;
                if let Err(e) = self.clean() {
                    warn!(target: "tessera::registry", "registry cleaner sweep failed: {}", e);
                }
            }
            info!(target: "tessera::registry", "registry cleaner stopped");
        });
        CleanerHandle { stop, join: Some(join) }
    }
}

pub struct CleanerHandle {
    stop: Arc<AtomicBool>,
    join: Option<JoinHandle<()>>,
}

impl CleanerHandle {
    pub fn stop(mut self) {
        self.shutdown();
    }

    fn shutdown(&mut self) {
        self.stop.store(true, Ordering::Relaxed);
        if let Some(j) = self.join.take() {
            let _ = j.join();
        }
    }
}

impl Drop for CleanerHandle {
    fn drop(&mut self) { self.shutdown(); }
}
