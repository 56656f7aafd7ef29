//! Registry that keeps tickets only in encoded form, the way a remote cache or
//! replicated store does. Every read decodes a fresh copy, nothing is shared
//! between callers, and an update for an id the store does not hold is refused.
//! Deleted ids leave a tombstone so a late update or re-add can never bring a
//! ticket back.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Duration, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::error::{CasError, CasResult};
use crate::ticket::{log_id, Ticket};
use super::TicketRegistry;

const SNAPSHOT_VERSION: u32 = 1;

#[derive(Serialize, Deserialize)]
struct SnapEntry { id: String, bytes: Vec<u8> }

#[derive(Serialize, Deserialize)]
struct Snapshot { version: u32, created_ms: i64, entries: Vec<SnapEntry> }

#[derive(Debug, Default)]
pub struct EncodedTicketRegistry {
    entries: RwLock<HashMap<String, Vec<u8>>>,
    tombstones: RwLock<HashMap<String, DateTime<Utc>>>,
    snapshot_path: Option<PathBuf>,
}

impl EncodedTicketRegistry {
    pub fn new() -> Self { Self::default() }

    pub fn with_snapshot_path<P: Into<PathBuf>>(mut self, path: P) -> Self {
        self.snapshot_path = Some(path.into());
        self
    }

    fn encode(ticket: &Ticket) -> CasResult<Vec<u8>> { Ok(bincode::serialize(ticket)?) }

    fn decode(bytes: &[u8]) -> CasResult<Ticket> { Ok(bincode::deserialize(bytes)?) }

    pub fn len(&self) -> usize { self.entries.read().len() }

    pub fn is_empty(&self) -> bool { self.entries.read().is_empty() }

    pub fn is_tombstoned(&self, id: &str) -> bool { self.tombstones.read().contains_key(id) }

    /// Drop tombstones older than `retention`; returns how many were dropped.
    /// Retention must outlive the longest ticket lifetime or ids could be reused.
    pub fn purge_tombstones(&self, now: DateTime<Utc>, retention: Duration) -> usize {
        let mut t = self.tombstones.write();
        let before = t.len();
        t.retain(|_, at| now - *at <= retention);
        before - t.len()
    }

    /// Write all entries to the snapshot path (tmp file + rename).
    pub fn save_snapshot(&self) -> CasResult<()> {
        let Some(path) = self.snapshot_path.as_ref() else { return Ok(()); };
        let entries: Vec<SnapEntry> = self
            .entries
            .read()
            .iter()
            .map(|(id, bytes)| SnapEntry { id: id.clone(), bytes: bytes.clone() })
            .collect();
        let count = entries.len();
        let snap = Snapshot { version: SNAPSHOT_VERSION, created_ms: Utc::now().timestamp_millis(), entries };
        let bytes = bincode::serialize(&snap)?;
        if let Some(dir) = path.parent() { std::fs::create_dir_all(dir)?; }
        let tmp = path.with_extension("bin.tmp");
        std::fs::write(&tmp, bytes)?;
        std::fs::rename(&tmp, path)?;
        debug!(target: "tessera::registry", "snapshot saved entries={} path='{}'", count, path.display());
        Ok(())
    }

    /// Load entries from the snapshot path, if one exists. Undecodable entries are skipped.
    pub fn load_snapshot(&self) -> CasResult<usize> {
        let Some(path) = self.snapshot_path.as_ref() else { return Ok(0); };
        load_from(self, path)
    }
}

fn load_from(reg: &EncodedTicketRegistry, path: &Path) -> CasResult<usize> {
    if !path.exists() { return Ok(0); }
    let bytes = std::fs::read(path)?;
    let snap: Snapshot = bincode::deserialize(&bytes)?;
    if snap.version != SNAPSHOT_VERSION {
        return Err(CasError::registry(format!("unsupported snapshot version {}", snap.version)));
    }
    let mut loaded = 0usize;
    let mut m = reg.entries.write();
    for e in snap.entries {
        if EncodedTicketRegistry::decode(&e.bytes).is_err() {
            warn!(target: "tessera::registry", "skipping undecodable snapshot entry {}", log_id(&e.id));
            continue;
        }
        m.insert(e.id, e.bytes);
        loaded += 1;
    }
    info!(target: "tessera::registry", "snapshot restored entries={} path='{}'", loaded, path.display());
    Ok(loaded)
}

impl TicketRegistry for EncodedTicketRegistry {
    fn add_ticket(&self, ticket: Ticket) -> CasResult<()> {
        let bytes = Self::encode(&ticket)?;
        let id = ticket.id();
        if self.is_tombstoned(id) {
            return Err(CasError::creation(format!("ticket id {} was already used", log_id(id))));
        }
        let mut m = self.entries.write();
        if m.contains_key(id) {
            return Err(CasError::creation(format!("duplicate ticket id {}", log_id(id))));
        }
        m.insert(id.to_string(), bytes);
        Ok(())
    }

    fn fetch_ticket(&self, id: &str) -> CasResult<Option<Ticket>> {
        let bytes = match self.entries.read().get(id) {
            Some(b) => b.clone(),
            None => return Ok(None),
        };
        Self::decode(&bytes).map(Some)
    }

    fn update_ticket(&self, ticket: &Ticket) -> CasResult<()> {
        let bytes = Self::encode(ticket)?;
        let mut m = self.entries.write();
        match m.get_mut(ticket.id()) {
            Some(slot) => {
                *slot = bytes;
                Ok(())
            }
            None => {
                debug!(target: "tessera::registry", "no ticket to update for {}", log_id(ticket.id()));
                Err(CasError::not_found(ticket.id()))
            }
        }
    }

    fn update_ticket_if(&self, ticket: &Ticket, expected_use_count: u32) -> CasResult<bool> {
        let bytes = Self::encode(ticket)?;
        let mut m = self.entries.write();
        let Some(slot) = m.get_mut(ticket.id()) else {
            return Err(CasError::not_found(ticket.id()));
        };
        if Self::decode(slot)?.use_count() != expected_use_count {
            debug!(target: "tessera::registry", "stale update refused for {}", log_id(ticket.id()));
            return Ok(false);
        }
        *slot = bytes;
        Ok(true)
    }

    fn delete_ticket(&self, id: &str) -> CasResult<bool> {
        // Tombstone under the entries lock so no reader sees the gap.
        let mut m = self.entries.write();
        let removed = m.remove(id).is_some();
        if removed {
            self.tombstones.write().insert(id.to_string(), Utc::now());
        }
        Ok(removed)
    }

    fn tickets(&self) -> CasResult<Vec<Ticket>> {
        let raw: Vec<Vec<u8>> = self.entries.read().values().cloned().collect();
        raw.iter().map(|b| Self::decode(b)).collect()
    }
}

#[cfg(test)]
#[path = "encoded_tests.rs"]
mod encoded_tests;
