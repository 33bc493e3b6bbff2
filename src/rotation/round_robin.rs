//! Round-robin rotation strategy.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use crate::rotation::{upstream::Upstream, Selector};

/// Rotates through upstreams, skipping unhealthy ones.
#[derive(Debug, Default)]
pub struct RoundRobin {
    counter: AtomicUsize,
}

impl RoundRobin {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Selector for RoundRobin {
    fn next_upstream(&self, upstreams: &[Arc<Upstream>]) -> Option<Arc<Upstream>> {
        if upstreams.is_empty() {
            return None;
        }

        let start = self.counter.fetch_add(1, Ordering::Relaxed);
        let len = upstreams.len();

        (0..len)
            .map(|i| &upstreams[start.wrapping_add(i) % len])
            .find(|u| u.is_healthy())
            .cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_round_robin() {
        let lb = RoundRobin::new();
        let u1 = Arc::new(Upstream::new("127.0.0.1:3081".parse().unwrap(), 100));
        let u2 = Arc::new(Upstream::new("127.0.0.1:3082".parse().unwrap(), 100));
        let upstreams = vec![u1.clone(), u2.clone()];

        assert_eq!(lb.next_upstream(&upstreams).unwrap().addr, u1.addr);
        assert_eq!(lb.next_upstream(&upstreams).unwrap().addr, u2.addr);
        assert_eq!(lb.next_upstream(&upstreams).unwrap().addr, u1.addr);
    }

    #[test]
    fn skips_unhealthy() {
        let lb = RoundRobin::new();
        let u1 = Arc::new(Upstream::new("127.0.0.1:3081".parse().unwrap(), 100));
        let u2 = Arc::new(Upstream::new("127.0.0.1:3082".parse().unwrap(), 100));
        u1.mark_failure(1);
        let upstreams = vec![u1, u2.clone()];

        for _ in 0..3 {
            assert_eq!(lb.next_upstream(&upstreams).unwrap().addr, u2.addr);
        }
        u2.mark_failure(1);
        assert!(lb.next_upstream(&upstreams).is_none());
    }

    #[test]
    fn counter_wraps_without_overflow() {
        let lb = RoundRobin {
            counter: AtomicUsize::new(usize::MAX),
        };
        let u1 = Arc::new(Upstream::new("127.0.0.1:3081".parse().unwrap(), 100));
        let u2 = Arc::new(Upstream::new("127.0.0.1:3082".parse().unwrap(), 100));
        u2.mark_failure(1);
        let upstreams = vec![u1.clone(), u2];

        assert_eq!(lb.next_upstream(&upstreams).unwrap().addr, u1.addr);
        assert_eq!(lb.next_upstream(&upstreams).unwrap().addr, u1.addr);
    }
}
