//! Unified failure model for the ticket broker.
//! Every orchestrator operation surfaces one of these directly to the caller; the
//! protocol layer maps them onto its own wire codes with the helpers below.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::ticket::TicketKind;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Error)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum CasError {
    #[error("authentication failed: {message}")]
    Authentication { message: String },
    #[error("ticket '{id}' not recognized")]
    TicketNotFound { id: String },
    #[error("ticket '{id}' has expired")]
    TicketExpired { id: String },
    #[error("ticket '{id}' is a {actual} ticket, expected {expected}")]
    WrongTicketKind { id: String, expected: TicketKind, actual: TicketKind },
    #[error("ticket could not be created: {message}")]
    TicketCreation { message: String },
    #[error("unauthorized service: {message}")]
    UnauthorizedService { message: String },
    #[error("service '{service}' does not participate in single sign-on")]
    UnauthorizedSsoService { service: String },
    #[error("renewed credentials resolved to '{current}' but the session belongs to '{original}'")]
    MixedPrincipal { current: String, original: String },
    #[error("service '{service}' is not allowed to proxy")]
    ProxyingUnauthorized { service: String },
    #[error("ticket registry failure: {message}")]
    Registry { message: String },
}

impl CasError {
    pub fn authentication<S: Into<String>>(msg: S) -> Self { CasError::Authentication { message: msg.into() } }
    pub fn not_found<S: Into<String>>(id: S) -> Self { CasError::TicketNotFound { id: id.into() } }
    pub fn expired<S: Into<String>>(id: S) -> Self { CasError::TicketExpired { id: id.into() } }
    pub fn creation<S: Into<String>>(msg: S) -> Self { CasError::TicketCreation { message: msg.into() } }
    pub fn unauthorized_service<S: Into<String>>(msg: S) -> Self { CasError::UnauthorizedService { message: msg.into() } }
    pub fn registry<S: Into<String>>(msg: S) -> Self { CasError::Registry { message: msg.into() } }

    /// Stable snake-case code used in logs and structured responses.
    pub fn code_str(&self) -> &'static str {
        match self {
            CasError::Authentication { .. } => "authentication_failed",
            CasError::TicketNotFound { .. } => "ticket_not_found",
            CasError::TicketExpired { .. } => "ticket_expired",
            CasError::WrongTicketKind { .. } => "wrong_ticket_kind",
            CasError::TicketCreation { .. } => "ticket_creation_failed",
            CasError::UnauthorizedService { .. } => "unauthorized_service",
            CasError::UnauthorizedSsoService { .. } => "unauthorized_sso_service",
            CasError::MixedPrincipal { .. } => "mixed_principal",
            CasError::ProxyingUnauthorized { .. } => "proxying_unauthorized",
            CasError::Registry { .. } => "registry_failure",
        }
    }

    /// True for the not-found / expired / wrong-kind / creation family.
    pub fn is_ticket_exception(&self) -> bool {
        matches!(
            self,
            CasError::TicketNotFound { .. }
                | CasError::TicketExpired { .. }
                | CasError::WrongTicketKind { .. }
                | CasError::TicketCreation { .. }
        )
    }

    pub fn is_unauthorized_service(&self) -> bool {
        matches!(self, CasError::UnauthorizedService { .. } | CasError::UnauthorizedSsoService { .. })
    }

    /// Map to HTTP status code.
    pub fn http_status(&self) -> u16 {
        match self {
            CasError::Authentication { .. } => 401,
            CasError::TicketNotFound { .. } | CasError::TicketExpired { .. } => 404,
            CasError::WrongTicketKind { .. } => 400,
            CasError::TicketCreation { .. } => 409,
            CasError::UnauthorizedService { .. }
            | CasError::UnauthorizedSsoService { .. }
            | CasError::ProxyingUnauthorized { .. } => 403,
            CasError::MixedPrincipal { .. } => 409,
            CasError::Registry { .. } => 503,
        }
    }

    /// Validation-protocol failure code, e.g. the `code` attribute of an
    /// `authenticationFailure` element.
    pub fn protocol_code(&self) -> &'static str {
        match self {
            CasError::TicketNotFound { .. }
            | CasError::TicketExpired { .. }
            | CasError::WrongTicketKind { .. } => "INVALID_TICKET",
            CasError::UnauthorizedService { .. } | CasError::UnauthorizedSsoService { .. } => "INVALID_SERVICE",
            CasError::ProxyingUnauthorized { .. } => "UNAUTHORIZED_SERVICE_PROXY",
            CasError::Authentication { .. } | CasError::MixedPrincipal { .. } | CasError::TicketCreation { .. } => "INVALID_REQUEST",
            CasError::Registry { .. } => "INTERNAL_ERROR",
        }
    }
}

pub type CasResult<T> = Result<T, CasError>;

impl From<bincode::Error> for CasError {
    fn from(err: bincode::Error) -> Self {
        CasError::Registry { message: format!("ticket encoding failed: {}", err) }
    }
}

impl From<std::io::Error> for CasError {
    fn from(err: std::io::Error) -> Self {
        CasError::Registry { message: err.to_string() }
    }
}

#[cfg(test)]
#[path = "error_tests.rs"]
mod error_tests;
