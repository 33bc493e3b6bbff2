//! Network layer shared by the frontends.
//!
//! # Data Flow
//! ```text
//! Incoming TCP connection
//!     → listener.rs (accept, connection limits)
//!     → connection.rs (id, active count)
//!     → frontend handler (rotator / injector)
//!     → connection.rs relay (until EOF or cancellation)
//! ```

pub mod connection;
pub mod listener;

pub use connection::{relay, ConnectionTracker, Relayed};
pub use listener::{Listener, ListenerError};
