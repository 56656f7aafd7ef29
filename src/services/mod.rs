//! Registered services and the policies attached to them.
//! The orchestrator asks one question of this layer: which registration, if any,
//! covers a service url. Everything after that is a policy on the registration.

use std::collections::{BTreeMap, BTreeSet};

use base64::Engine;
use regex::Regex;
use serde::{Deserialize, Serialize};
use tracing::warn;
use xxhash_rust::xxh3::xxh3_128;

use crate::identity::{Attrs, Principal};
use crate::ticket::Service;

mod memory;

pub use memory::InMemoryServicesManager;

pub trait ServicesManager: Send + Sync {
    fn find_service_by(&self, service: &Service) -> Option<RegisteredService>;
    fn all_services(&self) -> Vec<RegisteredService>;
}

/// Whether, and to which callback urls, a service may be handed proxy-granting tickets.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum ProxyPolicy {
    #[default]
    Refuse,
    /// Callback url must fully match the pattern (case-insensitive).
    Regex(String),
}

impl ProxyPolicy {
    pub fn is_allowed_to_proxy(&self) -> bool { !matches!(self, ProxyPolicy::Refuse) }

    pub fn is_allowed_callback(&self, callback: &Service) -> bool {
        match self {
            ProxyPolicy::Refuse => false,
            ProxyPolicy::Regex(pattern) => match full_match_regex(pattern) {
                Ok(re) => re.is_match(&callback.id),
                Err(e) => {
                    warn!(target: "tessera::services", "invalid proxy callback pattern '{}': {}", pattern, e);
                    false
                }
            },
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum AttributeReleasePolicy {
    /// Release nothing.
    #[default]
    Deny,
    ReturnAll,
    ReturnAllowed(BTreeSet<String>),
    /// Release the listed attributes under new names (source -> released name).
    ReturnMapped(BTreeMap<String, String>),
}

impl AttributeReleasePolicy {
    pub fn release(&self, principal: &Principal) -> Attrs {
        match self {
            AttributeReleasePolicy::Deny => Attrs::new(),
            AttributeReleasePolicy::ReturnAll => principal.attributes.clone(),
            AttributeReleasePolicy::ReturnAllowed(allowed) => principal
                .attributes
                .iter()
                .filter(|(k, _)| allowed.contains(*k))
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect(),
            AttributeReleasePolicy::ReturnMapped(mapping) => mapping
                .iter()
                .filter_map(|(src, dst)| principal.attributes.get(src).map(|v| (dst.clone(), v.clone())))
                .collect(),
        }
    }
}

/// Which id a service sees for the principal.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum UsernameAttributeProvider {
    #[default]
    Default,
    /// First value of a principal attribute; the principal id when it is absent.
    PrincipalAttribute(String),
    /// Opaque id, stable per principal and service, unlinkable across services.
    Anonymous { salt: String },
}

impl UsernameAttributeProvider {
    pub fn resolve_username(&self, principal: &Principal, service: &Service) -> String {
        match self {
            UsernameAttributeProvider::Default => principal.id.clone(),
            UsernameAttributeProvider::PrincipalAttribute(attr) => match principal.attribute(attr) {
                Some(v) => v.to_string(),
                None => {
                    warn!(target: "tessera::services", "principal '{}' has no '{}' attribute, using principal id", principal.id, attr);
                    principal.id.clone()
                }
            },
            UsernameAttributeProvider::Anonymous { salt } => {
                let material = format!("{}!{}!{}", service.id.to_lowercase(), principal.id, salt);
                let digest = xxh3_128(material.as_bytes()).to_be_bytes();
                base64::engine::general_purpose::URL_SAFE_NO_PAD.encode(digest)
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegisteredService {
    /// Zero until saved with a services manager.
    #[serde(default)]
    pub id: i64,
    pub name: String,
    #[serde(default)]
    pub description: String,
    /// Regular expression the service url must fully match (case-insensitive).
    pub service_pattern: String,
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_true")]
    pub sso_enabled: bool,
    #[serde(default)]
    pub evaluation_order: i32,
    #[serde(default)]
    pub proxy_policy: ProxyPolicy,
    #[serde(default)]
    pub attribute_release_policy: AttributeReleasePolicy,
    #[serde(default)]
    pub username_attribute_provider: UsernameAttributeProvider,
    /// Authentication handlers that must have accepted the session's credential.
    #[serde(default)]
    pub required_handlers: BTreeSet<String>,
}

fn default_true() -> bool { true }

impl RegisteredService {
    pub fn new<S: Into<String>>(name: S, service_pattern: S) -> Self {
        Self {
            id: 0,
            name: name.into(),
            description: String::new(),
            service_pattern: service_pattern.into(),
            enabled: true,
            sso_enabled: true,
            evaluation_order: 0,
            proxy_policy: ProxyPolicy::Refuse,
            attribute_release_policy: AttributeReleasePolicy::Deny,
            username_attribute_provider: UsernameAttributeProvider::Default,
            required_handlers: BTreeSet::new(),
        }
    }

    pub fn is_allowed_to_proxy(&self, proxying_service: &Service) -> bool {
        self.proxy_policy.is_allowed_callback(proxying_service)
    }

    pub fn released_attributes(&self, principal: &Principal) -> Attrs {
        self.attribute_release_policy.release(principal)
    }

    pub fn resolve_username(&self, principal: &Principal, service: &Service) -> String {
        self.username_attribute_provider.resolve_username(principal, service)
    }
}

pub(crate) fn full_match_regex(pattern: &str) -> Result<Regex, regex::Error> {
    Regex::new(&format!("(?i)^(?:{})$", pattern))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn principal() -> Principal {
        let mut attrs = Attrs::new();
        attrs.insert("uid".into(), vec!["u-1".into()]);
        attrs.insert("eduPersonAffiliation".into(), vec!["developer".into()]);
        attrs.insert("groupMembership".into(), vec!["adopters".into()]);
        Principal::with_attributes("alice", attrs)
    }

    #[test]
    fn attribute_release_variants() {
        let p = principal();
        assert!(AttributeReleasePolicy::Deny.release(&p).is_empty());
        assert_eq!(AttributeReleasePolicy::ReturnAll.release(&p).len(), 3);
        let allowed = AttributeReleasePolicy::ReturnAllowed(["groupMembership".to_string(), "missing".to_string()].into_iter().collect());
        let out = allowed.release(&p);
        assert_eq!(out.len(), 1);
        assert_eq!(out["groupMembership"], vec!["adopters".to_string()]);
        let mapped = AttributeReleasePolicy::ReturnMapped([("uid".to_string(), "userId".to_string())].into_iter().collect());
        assert_eq!(mapped.release(&p)["userId"], vec!["u-1".to_string()]);
    }

    #[test]
    fn username_providers() {
        let p = principal();
        let svc = Service::new("https://a.example");
        assert_eq!(UsernameAttributeProvider::Default.resolve_username(&p, &svc), "alice");
        assert_eq!(UsernameAttributeProvider::PrincipalAttribute("eduPersonAffiliation".into()).resolve_username(&p, &svc), "developer");
        assert_eq!(UsernameAttributeProvider::PrincipalAttribute("nope".into()).resolve_username(&p, &svc), "alice");

        let anon = UsernameAttributeProvider::Anonymous { salt: "pepper".into() };
        let a1 = anon.resolve_username(&p, &svc);
        assert_ne!(a1, "alice");
        assert_eq!(a1, anon.resolve_username(&p, &svc));
        assert_ne!(a1, anon.resolve_username(&p, &Service::new("https://b.example")));
    }

    #[test]
    fn proxy_callbacks_must_match_pattern() {
        let policy = ProxyPolicy::Regex("https://proxy\\.example/.*".into());
        assert!(policy.is_allowed_to_proxy());
        assert!(policy.is_allowed_callback(&Service::new("https://PROXY.example/cb")));
        assert!(!policy.is_allowed_callback(&Service::new("http://www.github.com")));
        assert!(!ProxyPolicy::Refuse.is_allowed_callback(&Service::new("https://proxy.example/cb")));
        assert!(!ProxyPolicy::Regex("(".into()).is_allowed_callback(&Service::new("x")));
    }
}
