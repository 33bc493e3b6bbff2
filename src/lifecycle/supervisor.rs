//! Lifecycle coordinator.
//!
//! # Phases
//! ```text
//! Initializing
//!     → StartingFrontend   rotator + injector launched together, both must report ready
//!     → CheckingCore       missing core binary ends the run here (frontends keep running)
//!     → StartingRedirect   failures logged, not fatal
//!     → SpawningWorkers    ports rotator+1 ..= rotator+N, egress through the injector
//!     → Running            single wait on the interrupt
//!     → ShuttingDown       redirect, then workers, then frontends
//!     → Terminated
//! ```
//!
//! Every collaborator is reached through a trait so the sequence can run
//! against fakes.

use std::future::Future;
use std::io;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tokio::sync::{oneshot, watch};
use tokio::time;
use tokio_util::sync::CancellationToken;

use crate::config::{real_path, EffectiveConfig};
use crate::inject::Injector;
use crate::lifecycle::phase::Phase;
use crate::lifecycle::services::{FrontendService, FrontendSet};
use crate::redirect::{RedirectService, Redsocks};
use crate::rotation::{ProxyRotator, RotationPool};
use crate::tunnel::pool::{worker_specs, WorkerPool};
use crate::tunnel::{CoreLauncher, TunnelCore};

#[derive(Debug, Error)]
pub enum SupervisorError {
    #[error("{service} failed to start: {source}")]
    FrontendStart {
        service: &'static str,
        #[source]
        source: io::Error,
    },

    #[error("{service} not ready after {timeout:?}")]
    FrontendTimeout { service: &'static str, timeout: Duration },

    #[error("{service} exited before reporting readiness")]
    FrontendGone { service: &'static str },

    #[error("Worker ports overflow: base {base} + {count} workers")]
    WorkerPorts { base: u16, count: u32 },
}

/// The collaborators the Supervisor drives.
pub struct Collaborators {
    pub rotator: Arc<dyn FrontendService>,
    pub injector: Arc<dyn FrontendService>,
    pub redirect: Arc<dyn RedirectService>,
    pub core: Arc<dyn TunnelCore>,
}

impl Collaborators {
    /// The real services, sharing one rotation pool between rotator and workers.
    pub fn standard(config: &EffectiveConfig, base_dir: &Path) -> Self {
        let pool = Arc::new(RotationPool::from_config(&config.proxy_rotator));
        let redirect = Arc::new(Redsocks::new(config.redirect.clone(), config.proxy_rotator.port, base_dir));
        let injector = Injector::new(config.inject.clone(), redirect.control());
        let rotator = ProxyRotator::new(config.proxy_rotator.clone(), Arc::clone(&pool));
        let core = CoreLauncher::new(
            real_path(base_dir, &config.tunnel_core.core_name),
            real_path(base_dir, &config.tunnel_core.data_dir),
            pool,
        );

        Self {
            rotator: Arc::new(rotator),
            injector: Arc::new(injector),
            redirect,
            core: Arc::new(core),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShutdownReport {
    pub worker_ports: Vec<u16>,
    /// Workers that ended without panicking.
    pub workers_stopped: usize,
}

/// How a run ended.
#[derive(Debug)]
pub enum Outcome {
    /// The core binary was missing. No redirect or worker was started; the
    /// frontends are still running and belong to the caller.
    CoreMissing { path: PathBuf, frontends: FrontendSet },
    /// Interrupted and shut down.
    Stopped(ShutdownReport),
}

pub struct Supervisor {
    config: EffectiveConfig,
    base_dir: PathBuf,
    collaborators: Collaborators,
    phase: watch::Sender<Phase>,
}

impl Supervisor {
    pub fn new(config: EffectiveConfig, base_dir: impl Into<PathBuf>, collaborators: Collaborators) -> Self {
        let (phase, _) = watch::channel(Phase::Initializing);
        Self {
            config,
            base_dir: base_dir.into(),
            collaborators,
            phase,
        }
    }

    /// Observe phase transitions.
    pub fn phases(&self) -> watch::Receiver<Phase> {
        self.phase.subscribe()
    }

    pub fn core_path(&self) -> PathBuf {
        real_path(&self.base_dir, &self.config.tunnel_core.core_name)
    }

    fn enter(&self, phase: Phase) {
        tracing::debug!(phase = %phase, "Supervisor phase");
        self.phase.send_replace(phase);
    }

    /// Run the whole sequence. Returns once `interrupt` resolved and everything
    /// stopped, or early when the core binary is missing.
    pub async fn run<F>(self, interrupt: F) -> Result<Outcome, SupervisorError>
    where
        F: Future<Output = ()>,
    {
        self.enter(Phase::StartingFrontend);
        let frontends = match self.start_frontends().await {
            Ok(frontends) => frontends,
            Err(e) => {
                self.enter(Phase::Terminated);
                return Err(e);
            }
        };

        self.enter(Phase::CheckingCore);
        let core_path = self.core_path();
        if !core_path.exists() {
            tracing::error!(path = %core_path.display(), "Tunnel core not found, no worker started");
            self.enter(Phase::Terminated);
            return Ok(Outcome::CoreMissing {
                path: core_path,
                frontends,
            });
        }

        self.enter(Phase::StartingRedirect);
        if let Err(e) = self.collaborators.redirect.start().await {
            tracing::warn!(error = %e, "Transparent redirect failed to start");
        }

        self.enter(Phase::SpawningWorkers);
        let rotator_port = frontends.addr(self.collaborators.rotator.name()).map_or(self.config.proxy_rotator.port, |a| a.port());
        let inject_port = frontends.addr(self.collaborators.injector.name()).map_or(self.config.inject.port, |a| a.port());
        let Some(specs) = worker_specs(rotator_port, self.config.worker_count, inject_port, &self.config.tunnel_core) else {
            self.collaborators.redirect.stop().await;
            frontends.stop().await;
            self.enter(Phase::Terminated);
            return Err(SupervisorError::WorkerPorts {
                base: rotator_port,
                count: self.config.worker_count,
            });
        };
        let pool = WorkerPool::spawn(Arc::clone(&self.collaborators.core), specs);
        let worker_ports = pool.ports();
        tracing::info!(workers = pool.len(), ports = ?worker_ports, egress_port = inject_port, "Tunnel workers spawned");

        self.enter(Phase::Running);
        interrupt.await;

        self.enter(Phase::ShuttingDown);
        self.collaborators.redirect.stop().await;
        let workers_stopped = pool.stop().await;
        tracing::info!(workers_stopped, "Interrupted");
        frontends.stop().await;

        self.enter(Phase::Terminated);
        Ok(Outcome::Stopped(ShutdownReport {
            worker_ports,
            workers_stopped,
        }))
    }

    async fn start_frontends(&self) -> Result<FrontendSet, SupervisorError> {
        let token = CancellationToken::new();
        let mut frontends = FrontendSet::new(token.clone());
        let timeout = Duration::from_millis(self.config.startup.ready_timeout_ms.max(1));

        let rotator = &self.collaborators.rotator;
        let injector = &self.collaborators.injector;

        let (rotator_tx, rotator_rx) = oneshot::channel();
        frontends.push(rotator.name(), rotator.launch(rotator_tx, token.child_token()));
        let (injector_tx, injector_rx) = oneshot::channel();
        frontends.push(injector.name(), injector.launch(injector_tx, token.child_token()));

        let (rotator_ready, injector_ready) = tokio::join!(
            await_ready(rotator.name(), rotator_rx, timeout),
            await_ready(injector.name(), injector_rx, timeout),
        );

        let ready = rotator_ready.and_then(|r| injector_ready.map(|i| (r, i)));
        match ready {
            Ok((rotator_addr, injector_addr)) => {
                frontends.set_addr(rotator.name(), rotator_addr);
                frontends.set_addr(injector.name(), injector_addr);
                tracing::info!(service = rotator.name(), address = %rotator_addr, "Proxy rotator running on port {}", rotator_addr.port());
                tracing::info!(service = injector.name(), address = %injector_addr, "Injector running on port {}", injector_addr.port());
                Ok(frontends)
            }
            Err(e) => {
                frontends.stop().await;
                Err(e)
            }
        }
    }
}

async fn await_ready(
    service: &'static str,
    rx: oneshot::Receiver<io::Result<SocketAddr>>,
    timeout: Duration,
) -> Result<SocketAddr, SupervisorError> {
    match time::timeout(timeout, rx).await {
        Ok(Ok(Ok(addr))) => Ok(addr),
        Ok(Ok(Err(source))) => Err(SupervisorError::FrontendStart { service, source }),
        Ok(Err(_)) => Err(SupervisorError::FrontendGone { service }),
        Err(_) => Err(SupervisorError::FrontendTimeout { service, timeout }),
    }
}
