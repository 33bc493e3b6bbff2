//! Command-line overrides, applied after the persisted file is resolved.

use crate::config::schema::EffectiveConfig;
use crate::inject::rules::{InjectionRuleSet, WILDCARD, WILDCARD_WHITELIST};

/// Values explicitly supplied on the command line. `None` leaves the resolved
/// value alone.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConfigOverrides {
    /// Comma-separated front domains.
    pub frontend: Option<String>,
    /// Whitelist key `host:port`.
    pub whitelist: Option<String>,
    pub worker_count: Option<u32>,
    pub region: Option<String>,
    pub tunnel: Option<u32>,
    pub tunnel_workers: Option<u32>,
    pub quota_limit: Option<u64>,
}

impl ConfigOverrides {
    /// Apply every supplied override to `config`.
    ///
    /// A frontend or whitelist value replaces the whole rule set with a single
    /// rule; the missing half falls back to its wildcard.
    pub fn apply(&self, config: &mut EffectiveConfig) {
        if let Some(rules) = self.rule_set() {
            config.inject.rules = rules;
        }
        if let Some(count) = self.worker_count {
            config.worker_count = count;
        }
        if let Some(region) = &self.region {
            config.tunnel_core.region = region.clone();
        }
        if let Some(tunnel) = self.tunnel {
            config.tunnel_core.tunnel = tunnel;
        }
        if let Some(workers) = self.tunnel_workers {
            config.tunnel_core.tunnel_workers = workers;
        }
        if let Some(limit) = self.quota_limit {
            config.tunnel_core.quota_limit = limit;
        }
    }

    fn rule_set(&self) -> Option<InjectionRuleSet> {
        let frontend = supplied(&self.frontend);
        let whitelist = supplied(&self.whitelist);
        if frontend.is_none() && whitelist.is_none() {
            return None;
        }

        let mut frontends: Vec<String> = frontend
            .unwrap_or(WILDCARD)
            .split(',')
            .map(str::trim)
            .filter(|f| !f.is_empty())
            .map(String::from)
            .collect();
        if frontends.is_empty() {
            frontends.push(WILDCARD.to_string());
        }

        Some(InjectionRuleSet::single(
            whitelist.unwrap_or(WILDCARD_WHITELIST),
            frontends,
        ))
    }
}

fn supplied(value: &Option<String>) -> Option<&str> {
    value.as_deref().map(str::trim).filter(|v| !v.is_empty())
}
