//! Configuration validation.
//!
//! Serde handles the syntax; this pass checks value ranges and the port plan.
//! It reports every problem found, not only the first.

use std::net::SocketAddr;

use thiserror::Error;

use crate::config::schema::EffectiveConfig;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("worker_count must be at least 1")]
    NoWorkers,

    #[error("worker ports {base}+1..={base}+{count} exceed 65535")]
    WorkerPortOverflow { base: u16, count: u32 },

    #[error("{name} port {port} collides with the worker port range")]
    PortInWorkerRange { name: &'static str, port: u16 },

    #[error("{name} port must be non-zero")]
    ZeroPort { name: &'static str },

    #[error("proxy_rotator and inject share port {0}")]
    SharedFrontendPort(u16),

    #[error("inject type {0} is not one of 1 (direct), 2 (payload), 3 (front)")]
    UnknownInjectType(u8),

    #[error("inject rule with an empty whitelist key")]
    EmptyWhitelist,

    #[error("inject rule {0} has no usable front domain")]
    EmptyFrontend(String),

    #[error("invalid upstream address {0:?}")]
    InvalidUpstream(String),

    #[error("tunnel_core.core_name is empty")]
    EmptyCoreName,
}

/// Validate an effective configuration.
pub fn validate_config(config: &EffectiveConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();

    let rotator_port = config.proxy_rotator.port;
    let inject_port = config.inject.port;

    if config.worker_count == 0 {
        errors.push(ValidationError::NoWorkers);
    }
    if rotator_port == 0 {
        errors.push(ValidationError::ZeroPort { name: "proxy_rotator" });
    }
    if inject_port == 0 {
        errors.push(ValidationError::ZeroPort { name: "inject" });
    }
    if rotator_port == inject_port && rotator_port != 0 {
        errors.push(ValidationError::SharedFrontendPort(rotator_port));
    }

    if u32::from(rotator_port) + config.worker_count > u32::from(u16::MAX) {
        errors.push(ValidationError::WorkerPortOverflow {
            base: rotator_port,
            count: config.worker_count,
        });
    } else {
        let in_range = |port: u16| port > rotator_port && u32::from(port) <= u32::from(rotator_port) + config.worker_count;
        if in_range(inject_port) {
            errors.push(ValidationError::PortInWorkerRange { name: "inject", port: inject_port });
        }
        if config.redirect.enabled && in_range(config.redirect.listen_port) {
            errors.push(ValidationError::PortInWorkerRange {
                name: "redirect",
                port: config.redirect.listen_port,
            });
        }
    }

    if config.inject.mode().is_none() {
        errors.push(ValidationError::UnknownInjectType(config.inject.kind));
    }
    for (whitelist, frontends) in config.inject.rules.iter() {
        if whitelist.trim().is_empty() {
            errors.push(ValidationError::EmptyWhitelist);
        }
        if frontends.is_empty() || frontends.iter().any(|f| f.trim().is_empty()) {
            errors.push(ValidationError::EmptyFrontend(whitelist.to_string()));
        }
    }

    for upstream in &config.proxy_rotator.upstreams {
        if parse_upstream(upstream).is_none() {
            errors.push(ValidationError::InvalidUpstream(upstream.clone()));
        }
    }

    if config.tunnel_core.core_name.trim().is_empty() {
        errors.push(ValidationError::EmptyCoreName);
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

/// Parse a static upstream given as `ip:port` or `http://ip:port`.
pub fn parse_upstream(raw: &str) -> Option<SocketAddr> {
    if raw.contains("://") {
        let url = url::Url::parse(raw).ok()?;
        let addrs = url.socket_addrs(|| Some(80)).ok()?;
        return addrs.into_iter().next();
    }
    raw.parse().ok()
}
