use std::sync::atomic::{AtomicU64, Ordering};

use base64::Engine;

/// Produces ticket ids. Ids are bearer credentials: they must be unique for the
/// life of the registry and not guessable from earlier ids.
pub trait UniqueTicketIdGenerator: Send + Sync {
    fn new_ticket_id(&self, prefix: &str) -> String;
}

/// `<prefix>-<sequence>-<random base64url>[-<suffix>]`
#[derive(Debug)]
pub struct DefaultUniqueTicketIdGenerator {
    sequence: AtomicU64,
    random_bytes: usize,
    suffix: Option<String>,
}

impl Default for DefaultUniqueTicketIdGenerator {
    fn default() -> Self { Self::new(32, None) }
}

impl DefaultUniqueTicketIdGenerator {
    pub const MIN_RANDOM_BYTES: usize = 16;

    pub fn new(random_bytes: usize, suffix: Option<String>) -> Self {
        Self {
            sequence: AtomicU64::new(1),
            random_bytes: random_bytes.max(Self::MIN_RANDOM_BYTES),
            suffix: suffix.filter(|s| !s.trim().is_empty()),
        }
    }

    fn random_part(&self) -> String {
        let mut buf = vec![0u8; self.random_bytes];
        // No entropy means no safe ids at all; there is nothing to fall back to.
        if let Err(e) = getrandom::getrandom(&mut buf) {
            panic!("ticket id entropy source unavailable: {}", e);
        }
        base64::engine::general_purpose::URL_SAFE_NO_PAD.encode(buf)
    }
}

impl UniqueTicketIdGenerator for DefaultUniqueTicketIdGenerator {
    fn new_ticket_id(&self, prefix: &str) -> String {
        let seq = self.sequence.fetch_add(1, Ordering::Relaxed);
        let rnd = self.random_part();
        match &self.suffix {
            Some(sfx) => format!("{}-{}-{}-{}", prefix, seq, rnd, sfx),
            None => format!("{}-{}-{}", prefix, seq, rnd),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn ids_are_prefixed_and_unique() {
        let g = DefaultUniqueTicketIdGenerator::default();
        let mut seen = HashSet::new();
        for _ in 0..500 {
            let id = g.new_ticket_id("ST");
            assert!(id.starts_with("ST-"));
            assert!(seen.insert(id));
        }
    }

    #[test]
    fn suffix_is_appended_and_entropy_floor_applies() {
        let g = DefaultUniqueTicketIdGenerator::new(1, Some("node01".into()));
        let id = g.new_ticket_id("TGT");
        assert!(id.starts_with("TGT-1-"));
        assert!(id.ends_with("-node01"));
        // 16 bytes -> 22 base64url chars
        let body = id.trim_start_matches("TGT-1-").trim_end_matches("-node01");
        assert_eq!(body.len(), 22);
    }
}
