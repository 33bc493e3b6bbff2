//! Tunnel worker subsystem.
//!
//! # Data Flow
//! ```text
//! Supervisor
//!     → pool.rs (one cancellable task per worker, ports base+1..=base+N)
//!     → TunnelCore::run(WorkerSpec)
//!         → worker.rs (core process, restart loop)
//!             → core_config.rs (per-worker config file)
//!             → notice.rs (core stdout/stderr notices)
//!             → quota.rs (private byte counter)
//!             → RotationPool register / deregister
//! ```

use std::sync::Arc;

use futures_util::future::BoxFuture;
use tokio_util::sync::CancellationToken;

use crate::config::TunnelCoreConfig;

pub mod core_config;
pub mod notice;
pub mod pool;
pub mod quota;
pub mod worker;

pub use pool::WorkerPool;
pub use worker::CoreLauncher;

/// Everything one worker needs to run its core.
#[derive(Debug, Clone)]
pub struct WorkerSpec {
    /// 1-based position in the pool.
    pub ordinal: u32,
    /// Local HTTP proxy port of the core, registered in the rotation pool.
    pub listen_port: u16,
    /// Injector port the core uses as its upstream proxy.
    pub egress_port: u16,
    /// Byte quota per worker core session; 0 is unlimited.
    pub quota_limit: u64,
    pub core: Arc<TunnelCoreConfig>,
}

/// The tunnel-core control surface.
pub trait TunnelCore: Send + Sync {
    /// Run one worker until `cancel` fires. The future lives as long as the worker.
    fn run(&self, spec: WorkerSpec, cancel: CancellationToken) -> BoxFuture<'static, ()>;
}
