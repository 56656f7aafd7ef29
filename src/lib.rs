pub mod error;
pub mod clock;
pub mod config;
pub mod identity;
pub mod ticket;
pub mod registry;
pub mod services;
pub mod logout;
pub mod validation;
pub mod cas;

pub use cas::CentralAuthenticationService;
pub use error::{CasError, CasResult};

// Test-only printing helper: expands to eprintln! during tests and debug builds and is absent otherwise.
// Usage in tests: tprintln!("debug: {}", value);
#[cfg(any(test, debug_assertions))]
#[macro_export]
macro_rules! tprintln {
    ($($arg:tt)*) => ( eprintln!($($arg)*) );
}

// In non-test builds, provide a no-op tprintln! so calls compile without effect.
#[cfg(not(any(test, debug_assertions)))]
#[macro_export]
macro_rules! tprintln {
    ($($arg:tt)*) => ({
        // Preserve formatting checks in release without producing code
        if false { let _ = format!($($arg)*); }
    });
}
