//! Credentials, authentication handlers and principal resolution.
//! The orchestrator only sees the `AuthenticationManager` seam; everything else here
//! is a reference implementation behind it.

mod principal;
mod authentication;
mod credential;
mod handlers;
mod resolver;
mod provider;

pub use principal::{Principal, Attrs};
pub use authentication::{Authentication, AUTHENTICATION_METHOD, REMEMBER_ME};
pub use credential::{Credential, UsernamePasswordCredential, HttpBasedServiceCredential};
pub use handlers::{
    AuthenticationHandler, HandlerResult, SimpleTestUsernamePasswordHandler, AcceptUsersHandler,
    HttpBasedServiceCredentialsHandler, hash_password, verify_password,
};
pub use resolver::{AttributeRepository, InMemoryAttributeRepository, PrincipalResolver, BasicPrincipalResolver, PersonDirectoryPrincipalResolver};
pub use provider::{AuthenticationManager, PolicyBasedAuthenticationManager};
