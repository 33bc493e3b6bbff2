//! Upstream proxy abstraction.
//!
//! # Responsibilities
//! - Represent a single upstream proxy (a connected tunnel worker or a static seed)
//! - Track active connections and enforce the per-upstream limit
//! - Track passive health from dial outcomes

use std::net::SocketAddr;
use std::ops::Deref;
use std::sync::atomic::{AtomicU8, AtomicUsize, Ordering};
use std::sync::Arc;

#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HealthState {
    Healthy = 0,
    Unhealthy = 1,
}

impl From<u8> for HealthState {
    fn from(val: u8) -> Self {
        match val {
            1 => HealthState::Unhealthy,
            _ => HealthState::Healthy,
        }
    }
}

/// A single upstream proxy.
#[derive(Debug)]
pub struct Upstream {
    pub addr: SocketAddr,
    pub max_connections: usize,
    active_connections: AtomicUsize,
    state: AtomicU8,
    consecutive_failures: AtomicUsize,
}

impl Upstream {
    pub fn new(addr: SocketAddr, max_connections: usize) -> Self {
        Self {
            addr,
            max_connections,
            active_connections: AtomicUsize::new(0),
            state: AtomicU8::new(HealthState::Healthy as u8),
            consecutive_failures: AtomicUsize::new(0),
        }
    }

    pub fn active_connections(&self) -> usize {
        self.active_connections.load(Ordering::Relaxed)
    }

    pub fn state(&self) -> HealthState {
        self.state.load(Ordering::Relaxed).into()
    }

    pub fn is_healthy(&self) -> bool {
        self.state() == HealthState::Healthy
    }

    /// Try to take a connection slot; `None` when the upstream is full.
    pub fn try_create_guard(self: &Arc<Self>) -> Option<UpstreamGuard> {
        let mut prev = self.active_connections.load(Ordering::Relaxed);
        loop {
            if prev >= self.max_connections {
                return None;
            }
            match self
                .active_connections
                .compare_exchange_weak(prev, prev + 1, Ordering::Relaxed, Ordering::Relaxed)
            {
                Ok(_) => break,
                Err(x) => prev = x,
            }
        }
        Some(UpstreamGuard {
            upstream: self.clone(),
        })
    }

    /// A dial through this upstream succeeded.
    pub fn mark_success(&self) {
        self.consecutive_failures.store(0, Ordering::Relaxed);
    }

    /// A dial through this upstream failed. Returns `true` when this failure
    /// made it unhealthy.
    pub fn mark_failure(&self, unhealthy_threshold: usize) -> bool {
        if !self.is_healthy() {
            return false;
        }
        let failures = self.consecutive_failures.fetch_add(1, Ordering::Relaxed) + 1;
        if failures >= unhealthy_threshold.max(1) {
            self.state.store(HealthState::Unhealthy as u8, Ordering::Relaxed);
            return true;
        }
        false
    }

    /// Back to healthy, e.g. when its worker reconnects.
    pub fn revive(&self) {
        self.consecutive_failures.store(0, Ordering::Relaxed);
        self.state.store(HealthState::Healthy as u8, Ordering::Relaxed);
    }
}

/// Holds a connection slot on an upstream; released on drop.
#[derive(Debug)]
pub struct UpstreamGuard {
    upstream: Arc<Upstream>,
}

impl Deref for UpstreamGuard {
    type Target = Upstream;
    fn deref(&self) -> &Self::Target {
        &self.upstream
    }
}

impl Drop for UpstreamGuard {
    fn drop(&mut self) {
        self.upstream.active_connections.fetch_sub(1, Ordering::Relaxed);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn upstream(max: usize) -> Arc<Upstream> {
        Arc::new(Upstream::new("127.0.0.1:3081".parse().unwrap(), max))
    }

    #[test]
    fn guard_enforces_connection_limit() {
        let u = upstream(1);
        let g = u.try_create_guard().unwrap();
        assert_eq!(u.active_connections(), 1);
        assert!(u.try_create_guard().is_none());
        drop(g);
        assert_eq!(u.active_connections(), 0);
        assert!(u.try_create_guard().is_some());
    }

    #[test]
    fn consecutive_failures_mark_unhealthy_until_revived() {
        let u = upstream(10);
        assert!(!u.mark_failure(2));
        u.mark_success();
        assert!(!u.mark_failure(2));
        assert!(u.mark_failure(2));
        assert_eq!(u.state(), HealthState::Unhealthy);
        assert!(!u.mark_failure(2));

        u.revive();
        assert!(u.is_healthy());
    }
}
