//! Domain-front injector subsystem.
//!
//! # Data Flow
//! ```text
//! Tunnel core upstream proxy (CONNECT host:port)
//!     → request.rs (read head, parse CONNECT line)
//!     → rules.rs (whitelist lookup → front domains)
//!     → server.rs (dial front or target, optional payload, relay)
//! ```

pub mod request;
pub mod rules;
pub mod server;

pub use rules::InjectionRuleSet;
pub use server::Injector;
