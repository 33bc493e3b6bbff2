//! Metrics collection and exposition.
//!
//! # Metrics
//! - `fleet_frontend_connections_total` (counter): connections by frontend, outcome
//! - `fleet_online_upstreams` (gauge): upstreams registered in the rotation pool
//! - `fleet_connected_workers` (gauge): workers with at least one tunnel up
//! - `fleet_worker_bytes_total` (counter): tunnelled bytes by direction
//! - `fleet_worker_restarts_total` (counter): core restarts by reason
//! - `fleet_redirect_bypass_total` (counter): addresses excluded from the redirect

use std::net::SocketAddr;

use metrics::{counter, gauge};
use metrics_exporter_prometheus::PrometheusBuilder;

/// Install the Prometheus recorder and its scrape listener.
pub fn init_metrics(addr: SocketAddr) {
    match PrometheusBuilder::new().with_http_listener(addr).install() {
        Ok(()) => tracing::info!(address = %addr, "Metrics endpoint listening"),
        Err(e) => tracing::error!(address = %addr, error = %e, "Failed to install metrics exporter"),
    }
}

pub fn record_frontend_connection(frontend: &'static str, outcome: &'static str) {
    counter!("fleet_frontend_connections_total", "frontend" => frontend, "outcome" => outcome).increment(1);
}

pub fn set_online_upstreams(count: usize) {
    gauge!("fleet_online_upstreams").set(count as f64);
}

pub fn worker_connected() {
    gauge!("fleet_connected_workers").increment(1.0);
}

pub fn worker_disconnected() {
    gauge!("fleet_connected_workers").decrement(1.0);
}

pub fn record_worker_bytes(sent: u64, received: u64) {
    counter!("fleet_worker_bytes_total", "direction" => "sent").increment(sent);
    counter!("fleet_worker_bytes_total", "direction" => "received").increment(received);
}

pub fn record_worker_restart(reason: &'static str) {
    counter!("fleet_worker_restarts_total", "reason" => reason).increment(1);
}

pub fn record_bypass() {
    counter!("fleet_redirect_bypass_total").increment(1);
}
