//! Lifecycle management subsystem.
//!
//! # Data Flow
//! ```text
//! Startup (supervisor.rs):
//!     Frontends (services.rs, readiness handshake) → core check
//!         → redirect → worker pool → Running
//!
//! Shutdown (shutdown.rs):
//!     Interrupt fired → stop redirect → stop workers → stop frontends
//!
//! Signals (signals.rs):
//!     SIGINT/SIGTERM/SIGQUIT → fire the single-shot Shutdown
//! ```
//!
//! # Design Decisions
//! - Ordered startup: frontends listen before any worker attaches
//! - Ordered shutdown: redirect stops first so live traffic is not routed
//!   into stopped workers
//! - Shutdown fires once; repeated signals are ignored

pub mod phase;
pub mod services;
pub mod shutdown;
pub mod signals;
pub mod supervisor;

pub use phase::Phase;
pub use shutdown::Shutdown;
pub use supervisor::{Collaborators, Outcome, ShutdownReport, Supervisor, SupervisorError};
