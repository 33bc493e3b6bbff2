//! Resilience helpers.
//!
//! # Data Flow
//! ```text
//! Tunnel core exits, or its quota runs out:
//!     → backoff.rs (exponential delay with jitter, capped)
//!     → worker restarts the core
//! ```
//!
//! # Design Decisions
//! - The attempt counter resets once a core reports a tunnel
//! - Jitter spreads restarts of many workers that failed together

pub mod backoff;
