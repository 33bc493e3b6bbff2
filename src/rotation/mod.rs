//! Proxy rotation subsystem.
//!
//! # Data Flow
//! ```text
//! Client connection on the entry port
//!     → server.rs (accept, bounded)
//!     → pool.rs (upstreams registered by connected tunnel workers)
//!     → Apply rotation strategy:
//!         - round_robin.rs (rotate through upstreams)
//!         - random.rs (uniform pick)
//!     → upstream.rs (connection slot, passive health)
//!     → relay until either side closes
//! ```
//!
//! # Design Decisions
//! - Strategies are stateless apart from their own cursor; the pool tracks connections
//! - Unhealthy upstreams are skipped until their worker registers again

use std::fmt::Debug;
use std::sync::Arc;

pub mod pool;
pub mod random;
pub mod round_robin;
pub mod server;
pub mod upstream;

pub use pool::RotationPool;
pub use server::ProxyRotator;

use upstream::Upstream;

/// Upstream selection strategy.
pub trait Selector: Send + Sync + Debug {
    /// Pick the next healthy upstream, if any.
    fn next_upstream(&self, upstreams: &[Arc<Upstream>]) -> Option<Arc<Upstream>>;
}
