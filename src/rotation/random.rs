//! Random rotation strategy.

use std::sync::Arc;

use rand::seq::SliceRandom;

use crate::rotation::{upstream::Upstream, Selector};

/// Picks a uniformly random healthy upstream.
#[derive(Debug, Default)]
pub struct Random;

impl Selector for Random {
    fn next_upstream(&self, upstreams: &[Arc<Upstream>]) -> Option<Arc<Upstream>> {
        let healthy: Vec<&Arc<Upstream>> = upstreams.iter().filter(|u| u.is_healthy()).collect();
        healthy.choose(&mut rand::thread_rng()).map(|u| Arc::clone(u))
    }
}
