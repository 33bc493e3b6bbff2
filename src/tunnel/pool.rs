//! Tunnel worker pool.
//!
//! # Responsibilities
//! - Assign each worker a deterministic listen port `base + ordinal`
//! - Run every worker as its own task under a child cancellation token
//! - Stop the whole pool with one call, or a single worker by ordinal

use std::sync::Arc;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::config::TunnelCoreConfig;
use crate::tunnel::{TunnelCore, WorkerSpec};

/// Listen ports `base+1 ..= base+count`, or `None` if they overflow.
pub fn assign_ports(base: u16, count: u32) -> Option<Vec<u16>> {
    (1..=count)
        .map(|ordinal| u16::try_from(ordinal).ok().and_then(|o| base.checked_add(o)))
        .collect()
}

/// One spec per worker, egressing through `egress_port`.
pub fn worker_specs(base: u16, count: u32, egress_port: u16, core: &TunnelCoreConfig) -> Option<Vec<WorkerSpec>> {
    let core = Arc::new(core.clone());
    let ports = assign_ports(base, count)?;
    Some(
        ports
            .into_iter()
            .zip(1..)
            .map(|(listen_port, ordinal)| WorkerSpec {
                ordinal,
                listen_port,
                egress_port,
                quota_limit: core.quota_limit,
                core: Arc::clone(&core),
            })
            .collect(),
    )
}

struct Worker {
    ordinal: u32,
    port: u16,
    cancel: CancellationToken,
    join: JoinHandle<()>,
}

pub struct WorkerPool {
    root: CancellationToken,
    workers: Vec<Worker>,
}

impl WorkerPool {
    /// Launch one task per spec. Workers are not awaited here.
    pub fn spawn(core: Arc<dyn TunnelCore>, specs: Vec<WorkerSpec>) -> Self {
        let root = CancellationToken::new();
        let workers = specs
            .into_iter()
            .map(|spec| {
                let cancel = root.child_token();
                let ordinal = spec.ordinal;
                let port = spec.listen_port;
                tracing::debug!(worker = ordinal, port, quota_limit = spec.quota_limit, "Spawning tunnel worker");
                let join = tokio::spawn(core.run(spec, cancel.clone()));
                Worker {
                    ordinal,
                    port,
                    cancel,
                    join,
                }
            })
            .collect();
        Self { root, workers }
    }

    pub fn ports(&self) -> Vec<u16> {
        self.workers.iter().map(|w| w.port).collect()
    }

    pub fn len(&self) -> usize {
        self.workers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.workers.is_empty()
    }

    /// Cancel a single worker. Returns `false` for an unknown ordinal.
    pub fn stop_worker(&self, ordinal: u32) -> bool {
        match self.workers.iter().find(|w| w.ordinal == ordinal) {
            Some(worker) => {
                worker.cancel.cancel();
                true
            }
            None => false,
        }
    }

    /// Cancel every worker and wait for all of them. Returns how many ended cleanly.
    pub async fn stop(self) -> usize {
        self.root.cancel();
        let mut stopped = 0;
        for worker in self.workers {
            match worker.join.await {
                Ok(()) => stopped += 1,
                Err(e) => tracing::warn!(worker = worker.ordinal, error = %e, "Tunnel worker ended abnormally"),
            }
        }
        stopped
    }
}
