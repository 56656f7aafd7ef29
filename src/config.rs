//! Broker configuration: a JSON file, then `TESSERA_*` environment overrides.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::Arc;

use anyhow::{bail, Context};
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::cas::CentralAuthenticationService;
use crate::error::CasResult;
use crate::identity::{
    AcceptUsersHandler, Attrs, HttpBasedServiceCredentialsHandler, InMemoryAttributeRepository,
    PersonDirectoryPrincipalResolver, PolicyBasedAuthenticationManager, PrincipalResolver, SimpleTestUsernamePasswordHandler,
};
use crate::logout::DefaultLogoutManager;
use crate::registry::{DefaultTicketRegistry, EncodedTicketRegistry, TicketRegistry};
use crate::services::{InMemoryServicesManager, RegisteredService};
use crate::ticket::{DefaultUniqueTicketIdGenerator, ExpirationPolicy};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct GrantingTicketConfig {
    pub max_time_to_live_secs: i64,
    pub time_to_kill_secs: i64,
    /// Hard lifetime for long-term ("remember me") sessions; unset disables them.
    pub remember_me_ttl_secs: Option<i64>,
}

impl Default for GrantingTicketConfig {
    fn default() -> Self { Self { max_time_to_live_secs: 28_800, time_to_kill_secs: 7_200, remember_me_ttl_secs: None } }
}

fn secs_to_ms(secs: i64) -> i64 { secs.saturating_mul(1000) }

impl GrantingTicketConfig {
    pub fn policy(&self) -> ExpirationPolicy {
        let session = ExpirationPolicy::ticket_granting(secs_to_ms(self.max_time_to_live_secs), secs_to_ms(self.time_to_kill_secs));
        match self.remember_me_ttl_secs {
            Some(ttl) => ExpirationPolicy::remember_me(ExpirationPolicy::HardTimeout { time_to_live_ms: secs_to_ms(ttl) }, session),
            None => session,
        }
    }

    fn lifetimes_secs(&self) -> impl Iterator<Item = i64> {
        [self.max_time_to_live_secs, self.time_to_kill_secs].into_iter().chain(self.remember_me_ttl_secs)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServiceTicketConfig {
    pub number_of_uses: u32,
    pub time_to_kill_ms: i64,
}

impl Default for ServiceTicketConfig {
    fn default() -> Self { Self { number_of_uses: 1, time_to_kill_ms: 10_000 } }
}

impl ServiceTicketConfig {
    pub fn policy(&self) -> ExpirationPolicy {
        ExpirationPolicy::MultiTimeUseOrTimeout { number_of_uses: self.number_of_uses, time_to_kill_ms: self.time_to_kill_ms }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct IdConfig {
    /// Node name appended to every id, for clustered deployments.
    pub suffix: Option<String>,
    pub random_bytes: usize,
}

impl Default for IdConfig {
    fn default() -> Self { Self { suffix: None, random_bytes: 32 } }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RegistryKind {
    #[default]
    Memory,
    Encoded,
}

impl FromStr for RegistryKind {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "memory" => Ok(RegistryKind::Memory),
            "encoded" => Ok(RegistryKind::Encoded),
            other => bail!("unknown registry kind '{}'", other),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RegistryConfig {
    pub kind: RegistryKind,
    /// Encoded registry only: restored on start, written on shutdown.
    pub snapshot_path: Option<PathBuf>,
    /// Zero disables the background cleaner.
    pub cleaner_interval_secs: u64,
}

impl Default for RegistryConfig {
    fn default() -> Self { Self { kind: RegistryKind::Memory, snapshot_path: None, cleaner_interval_secs: 60 } }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AuthConfig {
    /// Username -> argon2 PHC hash.
    pub users: BTreeMap<String, String>,
    /// Accept any username equal to its password. Demo and test setups only.
    pub accept_test_credentials: bool,
    /// Principal attributes by username.
    pub attributes: BTreeMap<String, Attrs>,
    pub require_secure_callbacks: bool,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self { users: BTreeMap::new(), accept_test_credentials: false, attributes: BTreeMap::new(), require_secure_callbacks: true }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CasConfig {
    pub tgt: GrantingTicketConfig,
    pub st: ServiceTicketConfig,
    pub pgt: GrantingTicketConfig,
    pub ids: IdConfig,
    pub registry: RegistryConfig,
    pub only_track_most_recent_session: bool,
    pub single_logout: bool,
    pub auth: AuthConfig,
    pub services: Vec<RegisteredService>,
}

impl Default for CasConfig {
    fn default() -> Self {
        Self {
            tgt: GrantingTicketConfig::default(),
            st: ServiceTicketConfig::default(),
            pgt: GrantingTicketConfig::default(),
            ids: IdConfig::default(),
            registry: RegistryConfig::default(),
            only_track_most_recent_session: true,
            single_logout: true,
            auth: AuthConfig::default(),
            services: Vec::new(),
        }
    }
}

/// Registry built from configuration, keeping the concrete type for snapshots.
#[derive(Clone)]
pub enum ConfiguredRegistry {
    Memory(Arc<DefaultTicketRegistry>),
    Encoded(Arc<EncodedTicketRegistry>),
}

impl ConfiguredRegistry {
    pub fn registry(&self) -> Arc<dyn TicketRegistry> {
        match self {
            ConfiguredRegistry::Memory(r) => r.clone(),
            ConfiguredRegistry::Encoded(r) => r.clone(),
        }
    }

    pub fn save_snapshot(&self) -> CasResult<()> {
        match self {
            ConfiguredRegistry::Memory(_) => Ok(()),
            ConfiguredRegistry::Encoded(r) => r.save_snapshot(),
        }
    }
}

impl CasConfig {
    /// Read `path` when given, apply environment overrides, validate.
    pub fn load(path: Option<&Path>) -> anyhow::Result<Self> {
        let mut cfg = match path {
            Some(p) => {
                let text = std::fs::read_to_string(p).with_context(|| format!("reading config '{}'", p.display()))?;
                serde_json::from_str::<CasConfig>(&text).with_context(|| format!("parsing config '{}'", p.display()))?
            }
            None => CasConfig::default(),
        };
        cfg.apply_overrides(|name| std::env::var(name).ok())?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// Apply `TESSERA_*` overrides read through `lookup`.
    pub fn apply_overrides<F: Fn(&str) -> Option<String>>(&mut self, lookup: F) -> anyhow::Result<()> {
        fn parsed<T: FromStr, F: Fn(&str) -> Option<String>>(lookup: &F, name: &str) -> anyhow::Result<Option<T>> {
            match lookup(name) {
                None => Ok(None),
                Some(v) => match v.trim().parse::<T>() {
                    Ok(x) => Ok(Some(x)),
                    Err(_) => bail!("invalid value '{}' for {}", v, name),
                },
            }
        }
        if let Some(v) = parsed(&lookup, "TESSERA_TGT_MAX_TTL_SECS")? { self.tgt.max_time_to_live_secs = v; }
        if let Some(v) = parsed(&lookup, "TESSERA_TGT_TTK_SECS")? { self.tgt.time_to_kill_secs = v; }
        if let Some(v) = parsed(&lookup, "TESSERA_REMEMBER_ME_TTL_SECS")? { self.tgt.remember_me_ttl_secs = Some(v); }
        if let Some(v) = parsed(&lookup, "TESSERA_ST_USES")? { self.st.number_of_uses = v; }
        if let Some(v) = parsed(&lookup, "TESSERA_ST_TTK_MS")? { self.st.time_to_kill_ms = v; }
        if let Some(v) = parsed(&lookup, "TESSERA_ID_RANDOM_BYTES")? { self.ids.random_bytes = v; }
        if let Some(v) = lookup("TESSERA_ID_SUFFIX") { self.ids.suffix = Some(v); }
        if let Some(v) = parsed(&lookup, "TESSERA_REGISTRY")? { self.registry.kind = v; }
        if let Some(v) = lookup("TESSERA_SNAPSHOT_PATH") { self.registry.snapshot_path = Some(PathBuf::from(v)); }
        if let Some(v) = parsed(&lookup, "TESSERA_CLEANER_INTERVAL_SECS")? { self.registry.cleaner_interval_secs = v; }
        if let Some(v) = parsed(&lookup, "TESSERA_ONLY_TRACK_MOST_RECENT_SESSION")? { self.only_track_most_recent_session = v; }
        if let Some(v) = parsed(&lookup, "TESSERA_SINGLE_LOGOUT")? { self.single_logout = v; }
        Ok(())
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        for (name, g) in [("tgt", &self.tgt), ("pgt", &self.pgt)] {
            if g.max_time_to_live_secs <= 0 || g.time_to_kill_secs <= 0 {
                bail!("{} lifetimes must be positive", name);
            }
            if matches!(g.remember_me_ttl_secs, Some(t) if t <= 0) {
                bail!("{} remember-me lifetime must be positive", name);
            }
            if g.lifetimes_secs().any(|s| s.checked_mul(1000).is_none()) {
                bail!("{} lifetimes are out of range", name);
            }
        }
        if self.st.number_of_uses == 0 || self.st.time_to_kill_ms <= 0 {
            bail!("service ticket uses and lifetime must be positive");
        }
        if self.ids.random_bytes < DefaultUniqueTicketIdGenerator::MIN_RANDOM_BYTES {
            bail!("ids.random_bytes must be at least {}", DefaultUniqueTicketIdGenerator::MIN_RANDOM_BYTES);
        }
        if self.registry.kind == RegistryKind::Memory && self.registry.snapshot_path.is_some() {
            bail!("registry.snapshot_path needs the encoded registry");
        }
        Ok(())
    }

    pub fn build_registry(&self) -> CasResult<ConfiguredRegistry> {
        match self.registry.kind {
            RegistryKind::Memory => Ok(ConfiguredRegistry::Memory(Arc::new(DefaultTicketRegistry::new()))),
            RegistryKind::Encoded => {
                let mut reg = EncodedTicketRegistry::new();
                if let Some(p) = self.registry.snapshot_path.as_ref() {
                    reg = reg.with_snapshot_path(p);
                }
                let restored = reg.load_snapshot()?;
                info!(target: "tessera::registry", "encoded registry ready restored={}", restored);
                Ok(ConfiguredRegistry::Encoded(Arc::new(reg)))
            }
        }
    }

    pub fn build_authentication_manager(&self) -> PolicyBasedAuthenticationManager {
        let repo = InMemoryAttributeRepository::new();
        for (user, attrs) in self.auth.attributes.iter() {
            repo.insert(user.clone(), attrs.clone());
        }
        let resolver: Arc<dyn PrincipalResolver> = Arc::new(PersonDirectoryPrincipalResolver::new(repo));
        let mut mgr = PolicyBasedAuthenticationManager::new();
        if !self.auth.users.is_empty() {
            let handler = self.auth.users.iter().fold(AcceptUsersHandler::new(), |h, (u, phc)| h.with_hash(u.clone(), phc.clone()));
            mgr = mgr.with_handler(Arc::new(handler), Some(resolver.clone()));
        }
        if self.auth.accept_test_credentials {
            mgr = mgr.with_handler(Arc::new(SimpleTestUsernamePasswordHandler), Some(resolver));
        }
        mgr.with_handler(
            Arc::new(HttpBasedServiceCredentialsHandler { require_secure: self.auth.require_secure_callbacks }),
            None,
        )
    }

    pub fn build_services_manager(&self) -> CasResult<InMemoryServicesManager> {
        let mgr = InMemoryServicesManager::new();
        for s in self.services.iter() {
            mgr.save(s.clone())?;
        }
        Ok(mgr)
    }

    /// Wire a broker over `registry` with every other collaborator taken from this config.
    pub fn build_service(&self, registry: Arc<dyn TicketRegistry>) -> CasResult<CentralAuthenticationService> {
        let ids = Arc::new(DefaultUniqueTicketIdGenerator::new(self.ids.random_bytes, self.ids.suffix.clone()));
        let cas = CentralAuthenticationService::new(
            registry,
            Arc::new(self.build_authentication_manager()),
            Arc::new(self.build_services_manager()?),
        )
        .with_logout_manager(Arc::new(DefaultLogoutManager::default().with_single_logout(self.single_logout)))
        .with_id_generators(ids.clone(), ids)
        .with_ticket_granting_policy(self.tgt.policy())
        .with_service_ticket_policy(self.st.policy())
        .with_proxy_granting_policy(self.pgt.policy())
        .with_only_track_most_recent_session(self.only_track_most_recent_session);
        Ok(cas)
    }
}
