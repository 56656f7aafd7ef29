use serde::{Deserialize, Serialize};

/// A relying application, identified by the URL it asked tickets for.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Service {
    pub id: String,
}

impl Service {
    pub fn new<S: Into<String>>(id: S) -> Self { Self { id: id.into() } }

    /// Compares two service urls ignoring case and form/percent encoding
    /// differences, e.g. `?q=a+b` and `?Q=a%20b`.
    pub fn matches(&self, other: &Service) -> bool {
        normalize(&self.id) == normalize(&other.id)
    }
}

fn normalize(url: &str) -> String {
    let spaced = url.replace('+', " ");
    let decoded = match urlencoding::decode(&spaced) {
        Ok(d) => d.into_owned(),
        Err(_) => spaced,
    };
    decoded.to_lowercase()
}

impl From<&str> for Service {
    fn from(s: &str) -> Self { Service::new(s) }
}
