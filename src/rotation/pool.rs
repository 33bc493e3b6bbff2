//! Shared rotation pool.
//!
//! # Responsibilities
//! - Hold the upstream proxies the rotator fans connections across
//! - Accept registrations from tunnel workers as their tunnels come and go
//! - Apply the rotation strategy and hand out connection guards

use std::net::SocketAddr;
use std::sync::{Arc, PoisonError, RwLock};

use crate::config::schema::{ProxyRotatorConfig, RotationStrategy};
use crate::config::validation::parse_upstream;
use crate::observability::metrics;
use crate::rotation::{
    random::Random,
    round_robin::RoundRobin,
    upstream::{Upstream, UpstreamGuard},
    Selector,
};

/// The upstream set shared by the rotator and every tunnel worker.
#[derive(Debug)]
pub struct RotationPool {
    upstreams: RwLock<Vec<Arc<Upstream>>>,
    selector: Box<dyn Selector>,
    max_upstream_connections: usize,
}

impl RotationPool {
    pub fn new(strategy: RotationStrategy, max_upstream_connections: usize) -> Self {
        let selector: Box<dyn Selector> = match strategy {
            RotationStrategy::RoundRobin => Box::new(RoundRobin::new()),
            RotationStrategy::Random => Box::new(Random),
        };
        Self {
            upstreams: RwLock::new(Vec::new()),
            selector,
            max_upstream_connections: max_upstream_connections.max(1),
        }
    }

    /// Build the pool and seed it with the configured static upstreams.
    pub fn from_config(config: &ProxyRotatorConfig) -> Self {
        let pool = Self::new(config.strategy, config.max_upstream_connections);
        for raw in &config.upstreams {
            match parse_upstream(raw) {
                Some(addr) => {
                    pool.register(addr);
                }
                None => tracing::warn!(upstream = %raw, "Invalid upstream address"),
            }
        }
        pool
    }

    /// Add `addr`, or revive it if already present. Returns `true` when added.
    pub fn register(&self, addr: SocketAddr) -> bool {
        let mut upstreams = self.upstreams.write().unwrap_or_else(PoisonError::into_inner);
        if let Some(existing) = upstreams.iter().find(|u| u.addr == addr) {
            existing.revive();
            return false;
        }
        upstreams.push(Arc::new(Upstream::new(addr, self.max_upstream_connections)));
        metrics::set_online_upstreams(upstreams.len());
        tracing::debug!(upstream = %addr, total = upstreams.len(), "Upstream registered");
        true
    }

    /// Remove `addr`. Connections already relayed through it are unaffected.
    pub fn deregister(&self, addr: SocketAddr) -> bool {
        let mut upstreams = self.upstreams.write().unwrap_or_else(PoisonError::into_inner);
        let before = upstreams.len();
        upstreams.retain(|u| u.addr != addr);
        let removed = upstreams.len() != before;
        if removed {
            metrics::set_online_upstreams(upstreams.len());
            tracing::debug!(upstream = %addr, total = upstreams.len(), "Upstream deregistered");
        }
        removed
    }

    /// Select the next upstream with a free connection slot.
    pub fn next(&self) -> Option<UpstreamGuard> {
        let snapshot = self.snapshot();
        for _ in 0..snapshot.len() {
            let upstream = self.selector.next_upstream(&snapshot)?;
            if let Some(guard) = upstream.try_create_guard() {
                return Some(guard);
            }
        }
        tracing::debug!(upstreams = snapshot.len(), "No upstream available");
        None
    }

    pub fn addrs(&self) -> Vec<SocketAddr> {
        self.snapshot().iter().map(|u| u.addr).collect()
    }

    pub fn healthy_count(&self) -> usize {
        self.snapshot().iter().filter(|u| u.is_healthy()).count()
    }

    pub fn len(&self) -> usize {
        self.upstreams.read().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn snapshot(&self) -> Vec<Arc<Upstream>> {
        self.upstreams.read().unwrap_or_else(PoisonError::into_inner).clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn addr(port: u16) -> SocketAddr {
        SocketAddr::from(([127, 0, 0, 1], port))
    }

    #[test]
    fn register_and_deregister() {
        let pool = RotationPool::new(RotationStrategy::RoundRobin, 8);
        assert!(pool.next().is_none());

        assert!(pool.register(addr(3081)));
        assert!(!pool.register(addr(3081)));
        assert!(pool.register(addr(3082)));
        assert_eq!(pool.addrs(), vec![addr(3081), addr(3082)]);

        assert!(pool.deregister(addr(3081)));
        assert!(!pool.deregister(addr(3081)));
        assert_eq!(pool.next().unwrap().addr, addr(3082));
    }

    #[test]
    fn rotates_across_registered_upstreams() {
        let pool = RotationPool::new(RotationStrategy::RoundRobin, 8);
        pool.register(addr(3081));
        pool.register(addr(3082));

        let picked: Vec<SocketAddr> = (0..4).map(|_| pool.next().unwrap().addr).collect();
        assert_eq!(picked, vec![addr(3081), addr(3082), addr(3081), addr(3082)]);
    }

    #[test]
    fn full_upstreams_are_skipped() {
        let pool = RotationPool::new(RotationStrategy::RoundRobin, 1);
        pool.register(addr(3081));
        pool.register(addr(3082));

        let g1 = pool.next().unwrap();
        let g2 = pool.next().unwrap();
        assert_ne!(g1.addr, g2.addr);
        assert!(pool.next().is_none());

        drop(g1);
        assert!(pool.next().is_some());
    }

    #[test]
    fn reregistering_revives_an_unhealthy_upstream() {
        let pool = RotationPool::new(RotationStrategy::Random, 8);
        pool.register(addr(3081));
        pool.next().unwrap().mark_failure(1);
        assert_eq!(pool.healthy_count(), 0);
        assert!(pool.next().is_none());

        pool.register(addr(3081));
        assert_eq!(pool.healthy_count(), 1);
    }

    #[test]
    fn static_upstreams_seed_the_pool() {
        let config = ProxyRotatorConfig {
            upstreams: vec!["127.0.0.1:9000".into(), "http://127.0.0.1:9001".into(), "bogus".into()],
            ..Default::default()
        };
        let pool = RotationPool::from_config(&config);
        assert_eq!(pool.addrs(), vec![addr(9000), addr(9001)]);
    }
}
