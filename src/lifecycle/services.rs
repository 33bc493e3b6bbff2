//! Frontend service seam.
//!
//! The proxy rotator and the injector are launched the same way: each gets a
//! one-shot readiness sender it fulfils once its listener is bound, and a
//! cancellation token that ends its accept loop.

use std::io;
use std::net::SocketAddr;

use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// Readiness report of a frontend: its bound address or the bind error.
pub type Ready = oneshot::Sender<io::Result<SocketAddr>>;

/// A long-running local listener started before the workers.
pub trait FrontendService: Send + Sync {
    /// Short name used in logs and errors.
    fn name(&self) -> &'static str;

    /// Spawn the service. `ready` must be fulfilled exactly once, after the
    /// listener is bound or binding failed.
    fn launch(&self, ready: Ready, shutdown: CancellationToken) -> JoinHandle<()>;
}

/// The running frontends, as handed back by the Supervisor.
#[derive(Debug)]
pub struct FrontendSet {
    token: CancellationToken,
    running: Vec<RunningFrontend>,
}

#[derive(Debug)]
struct RunningFrontend {
    name: &'static str,
    addr: Option<SocketAddr>,
    task: JoinHandle<()>,
}

impl FrontendSet {
    pub(crate) fn new(token: CancellationToken) -> Self {
        Self {
            token,
            running: Vec::new(),
        }
    }

    pub(crate) fn push(&mut self, name: &'static str, task: JoinHandle<()>) {
        self.running.push(RunningFrontend { name, addr: None, task });
    }

    pub(crate) fn set_addr(&mut self, name: &'static str, addr: SocketAddr) {
        if let Some(f) = self.running.iter_mut().find(|f| f.name == name) {
            f.addr = Some(addr);
        }
    }

    /// Bound address of the named frontend, once it reported ready.
    pub fn addr(&self, name: &str) -> Option<SocketAddr> {
        self.running.iter().find(|f| f.name == name).and_then(|f| f.addr)
    }

    /// True while no stop was requested and every frontend task is alive.
    pub fn is_running(&self) -> bool {
        !self.token.is_cancelled() && self.running.iter().all(|f| !f.task.is_finished())
    }

    /// Cancel every frontend and wait for their tasks to end.
    pub async fn stop(self) {
        self.token.cancel();
        for frontend in self.running {
            if let Err(e) = frontend.task.await {
                tracing::warn!(service = frontend.name, error = %e, "Frontend task ended abnormally");
            }
        }
    }
}
