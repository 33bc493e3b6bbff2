//! Per-worker data quota.

use std::sync::atomic::{AtomicU64, Ordering};

#[derive(Debug)]
pub struct QuotaCounter {
    limit: u64,
    consumed: AtomicU64,
}

impl QuotaCounter {
    /// A limit of 0 never exhausts.
    pub fn new(limit: u64) -> Self {
        Self {
            limit,
            consumed: AtomicU64::new(0),
        }
    }

    /// Add transferred bytes and return the new total.
    pub fn add(&self, bytes: u64) -> u64 {
        self.consumed.fetch_add(bytes, Ordering::Relaxed).saturating_add(bytes)
    }

    pub fn is_exhausted(&self) -> bool {
        self.limit != 0 && self.consumed() >= self.limit
    }

    pub fn reset(&self) {
        self.consumed.store(0, Ordering::Relaxed);
    }

    pub fn consumed(&self) -> u64 {
        self.consumed.load(Ordering::Relaxed)
    }

    pub fn limit(&self) -> u64 {
        self.limit
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exhausts_at_limit() {
        let quota = QuotaCounter::new(1000);
        assert_eq!(quota.add(600), 600);
        assert!(!quota.is_exhausted());
        assert_eq!(quota.add(400), 1000);
        assert!(quota.is_exhausted());

        quota.reset();
        assert_eq!(quota.consumed(), 0);
        assert!(!quota.is_exhausted());
    }

    #[test]
    fn zero_limit_is_unlimited() {
        let quota = QuotaCounter::new(0);
        quota.add(u64::MAX / 2);
        assert!(!quota.is_exhausted());
        assert_eq!(quota.limit(), 0);
    }
}
