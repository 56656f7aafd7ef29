use regex::Regex;
use parking_lot::RwLock;
use tracing::{debug, info};

use crate::error::{CasError, CasResult};
use crate::ticket::Service;
use super::{full_match_regex, RegisteredService, ServicesManager};

struct Entry {
    matcher: Regex,
    service: RegisteredService,
}

/// Registrations kept in memory, consulted in ascending `evaluation_order`.
#[derive(Default)]
pub struct InMemoryServicesManager {
    entries: RwLock<Vec<Entry>>,
}

impl InMemoryServicesManager {
    pub fn new() -> Self { Self::default() }

    /// Insert or replace a registration. A zero id is replaced by the next free id.
    pub fn save(&self, mut service: RegisteredService) -> CasResult<RegisteredService> {
        let matcher = full_match_regex(&service.service_pattern)
            .map_err(|e| CasError::unauthorized_service(format!("invalid service pattern '{}': {}", service.service_pattern, e)))?;
        let mut entries = self.entries.write();
        if service.id == 0 {
            service.id = entries.iter().map(|e| e.service.id).max().unwrap_or(0) + 1;
        }
        entries.retain(|e| e.service.id != service.id);
        entries.push(Entry { matcher, service: service.clone() });
        entries.sort_by_key(|e| (e.service.evaluation_order, e.service.id));
        info!(target: "tessera::services", "registered service id={} name='{}' pattern='{}'", service.id, service.name, service.service_pattern);
        Ok(service)
    }

    pub fn delete(&self, id: i64) -> Option<RegisteredService> {
        let mut entries = self.entries.write();
        let pos = entries.iter().position(|e| e.service.id == id)?;
        Some(entries.remove(pos).service)
    }

    pub fn find_by_id(&self, id: i64) -> Option<RegisteredService> {
        self.entries.read().iter().find(|e| e.service.id == id).map(|e| e.service.clone())
    }
}

impl ServicesManager for InMemoryServicesManager {
    fn find_service_by(&self, service: &Service) -> Option<RegisteredService> {
        let found = self.entries.read().iter().find(|e| e.matcher.is_match(&service.id)).map(|e| e.service.clone());
        if found.is_none() {
            debug!(target: "tessera::services", "no registration matches '{}'", service.id);
        }
        found
    }

    fn all_services(&self) -> Vec<RegisteredService> {
        self.entries.read().iter().map(|e| e.service.clone()).collect()
    }
}
