//! Tunnel fleet library.

pub mod cli;
pub mod config;
pub mod inject;
pub mod lifecycle;
pub mod net;
pub mod observability;
pub mod redirect;
pub mod resilience;
pub mod rotation;
pub mod tunnel;

pub use config::schema::EffectiveConfig;
pub use lifecycle::{Shutdown, Supervisor};
