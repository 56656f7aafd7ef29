use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Multi-valued string attributes, keyed by attribute name.
pub type Attrs = BTreeMap<String, Vec<String>>;

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct Principal {
    pub id: String,
    #[serde(default)]
    pub attributes: Attrs,
}

impl Principal {
    pub fn new<S: Into<String>>(id: S) -> Self { Self { id: id.into(), attributes: Attrs::new() } }

    pub fn with_attributes<S: Into<String>>(id: S, attributes: Attrs) -> Self {
        Self { id: id.into(), attributes }
    }

    /// Single-valued view of an attribute: the first value, if any.
    pub fn attribute(&self, name: &str) -> Option<&str> {
        self.attributes.get(name).and_then(|v| v.first()).map(|s| s.as_str())
    }

    /// Identity comparison; attributes may legitimately differ between two
    /// resolutions of the same principal.
    pub fn same_identity(&self, other: &Principal) -> bool { self.id == other.id }
}
