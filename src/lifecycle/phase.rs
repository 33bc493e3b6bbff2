//! Supervisor phases.
//!
//! ```text
//! Initializing → StartingFrontend → CheckingCore → StartingRedirect
//!     → SpawningWorkers → Running → ShuttingDown → Terminated
//! ```
//!
//! Every transition is one-directional. `CheckingCore` may jump straight to
//! `Terminated` when the core binary is missing.

use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Phase {
    Initializing,
    StartingFrontend,
    CheckingCore,
    StartingRedirect,
    SpawningWorkers,
    Running,
    ShuttingDown,
    Terminated,
}

impl Phase {
    pub fn as_str(&self) -> &'static str {
        match self {
            Phase::Initializing => "initializing",
            Phase::StartingFrontend => "starting_frontend",
            Phase::CheckingCore => "checking_core",
            Phase::StartingRedirect => "starting_redirect",
            Phase::SpawningWorkers => "spawning_workers",
            Phase::Running => "running",
            Phase::ShuttingDown => "shutting_down",
            Phase::Terminated => "terminated",
        }
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
