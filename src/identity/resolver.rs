use std::collections::HashMap;

use parking_lot::RwLock;

use super::credential::Credential;
use super::principal::{Attrs, Principal};

/// Source of principal attributes, typically a directory.
pub trait AttributeRepository: Send + Sync {
    fn attributes_for(&self, principal_id: &str) -> Attrs;
}

#[derive(Debug, Default)]
pub struct InMemoryAttributeRepository {
    entries: RwLock<HashMap<String, Attrs>>,
}

impl InMemoryAttributeRepository {
    pub fn new() -> Self { Self::default() }

    pub fn insert<S: Into<String>>(&self, principal_id: S, attrs: Attrs) {
        self.entries.write().insert(principal_id.into(), attrs);
    }

    /// Convenience for single-valued attributes.
    pub fn insert_pairs(&self, principal_id: &str, pairs: &[(&str, &str)]) {
        let mut attrs = Attrs::new();
        for (k, v) in pairs {
            attrs.entry(k.to_string()).or_default().push(v.to_string());
        }
        self.insert(principal_id, attrs);
    }
}

impl AttributeRepository for InMemoryAttributeRepository {
    fn attributes_for(&self, principal_id: &str) -> Attrs {
        self.entries.read().get(principal_id).cloned().unwrap_or_default()
    }
}

/// Turns an accepted credential into the principal bound to the session.
pub trait PrincipalResolver: Send + Sync {
    fn supports(&self, credential: &Credential) -> bool;
    fn resolve(&self, credential: &Credential) -> Option<Principal>;
}

/// Principal id straight from the credential, no attributes.
#[derive(Debug, Clone, Default)]
pub struct BasicPrincipalResolver;

impl PrincipalResolver for BasicPrincipalResolver {
    fn supports(&self, _credential: &Credential) -> bool { true }

    fn resolve(&self, credential: &Credential) -> Option<Principal> {
        let id = credential.id().trim();
        if id.is_empty() { None } else { Some(Principal::new(id)) }
    }
}

/// Principal id from the credential, attributes from a repository.
pub struct PersonDirectoryPrincipalResolver<R: AttributeRepository> {
    repository: R,
    /// Attribute whose first value replaces the credential id, when present.
    principal_attribute: Option<String>,
}

impl<R: AttributeRepository> PersonDirectoryPrincipalResolver<R> {
    pub fn new(repository: R) -> Self { Self { repository, principal_attribute: None } }

    pub fn with_principal_attribute<S: Into<String>>(mut self, attr: S) -> Self {
        self.principal_attribute = Some(attr.into());
        self
    }
}

impl<R: AttributeRepository> PrincipalResolver for PersonDirectoryPrincipalResolver<R> {
    fn supports(&self, credential: &Credential) -> bool {
        matches!(credential, Credential::UsernamePassword(_))
    }

    fn resolve(&self, credential: &Credential) -> Option<Principal> {
        let id = credential.id().trim();
        if id.is_empty() { return None; }
        let attrs = self.repository.attributes_for(id);
        let resolved_id = self
            .principal_attribute
            .as_ref()
            .and_then(|a| attrs.get(a))
            .and_then(|v| v.first())
            .cloned()
            .unwrap_or_else(|| id.to_string());
        Some(Principal::with_attributes(resolved_id, attrs))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn person_directory_attaches_attributes() {
        let repo = InMemoryAttributeRepository::new();
        repo.insert_pairs("alice", &[("mail", "alice@example.org"), ("uid", "a123")]);
        let r = PersonDirectoryPrincipalResolver::new(repo);
        let p = r.resolve(&Credential::username_password("alice", "alice")).unwrap();
        assert_eq!(p.id, "alice");
        assert_eq!(p.attribute("mail"), Some("alice@example.org"));

        let repo = InMemoryAttributeRepository::new();
        repo.insert_pairs("alice", &[("uid", "a123")]);
        let r = PersonDirectoryPrincipalResolver::new(repo).with_principal_attribute("uid");
        assert_eq!(r.resolve(&Credential::username_password("alice", "alice")).unwrap().id, "a123");
    }

    #[test]
    fn basic_resolver_rejects_blank_ids() {
        assert!(BasicPrincipalResolver.resolve(&Credential::username_password(" ", " ")).is_none());
    }
}
