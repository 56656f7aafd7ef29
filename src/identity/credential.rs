use std::fmt;

/// Credentials presented for primary, renewed or delegated authentication.
#[derive(Clone, PartialEq, Eq)]
pub enum Credential {
    UsernamePassword(UsernamePasswordCredential),
    /// A proxying service proving control of its callback endpoint.
    HttpBasedService(HttpBasedServiceCredential),
}

#[derive(Clone, PartialEq, Eq)]
pub struct UsernamePasswordCredential {
    pub username: String,
    pub password: String,
    pub remember_me: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpBasedServiceCredential {
    pub callback_url: String,
}

impl Credential {
    pub fn username_password<S: Into<String>>(username: S, password: S) -> Self {
        Credential::UsernamePassword(UsernamePasswordCredential { username: username.into(), password: password.into(), remember_me: false })
    }

    pub fn remember_me<S: Into<String>>(username: S, password: S) -> Self {
        Credential::UsernamePassword(UsernamePasswordCredential { username: username.into(), password: password.into(), remember_me: true })
    }

    pub fn http_service<S: Into<String>>(callback_url: S) -> Self {
        Credential::HttpBasedService(HttpBasedServiceCredential { callback_url: callback_url.into() })
    }

    /// Identifier the credential claims; the default principal id.
    pub fn id(&self) -> &str {
        match self {
            Credential::UsernamePassword(c) => &c.username,
            Credential::HttpBasedService(c) => &c.callback_url,
        }
    }

    pub fn wants_long_term(&self) -> bool {
        matches!(self, Credential::UsernamePassword(c) if c.remember_me)
    }
}

// Passwords never reach logs.
impl fmt::Debug for UsernamePasswordCredential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("UsernamePasswordCredential")
            .field("username", &self.username)
            .field("password", &"***")
            .field("remember_me", &self.remember_me)
            .finish()
    }
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Credential::UsernamePassword(c) => c.fmt(f),
            Credential::HttpBasedService(c) => c.fmt(f),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn debug_masks_password() {
        let c = Credential::username_password("alice", "s3cret");
        let shown = format!("{:?}", c);
        assert!(shown.contains("alice"));
        assert!(!shown.contains("s3cret"));
    }
}
