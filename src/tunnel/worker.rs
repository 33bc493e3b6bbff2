//! Tunnel core process launcher.
//!
//! Each worker owns one core process at a time. The core listens on the
//! worker's port as a local HTTP proxy, reaches the network through the
//! injector, and reports its state as JSON notices. A worker joins the
//! rotation pool while the core has at least one tunnel up.

use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::process::{ExitStatus, Stdio};
use std::sync::Arc;

use futures_util::future::BoxFuture;
use futures_util::FutureExt;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, BufReader, Lines};
use tokio::process::Command;
use tokio::time;
use tokio_util::sync::CancellationToken;

use crate::observability::metrics;
use crate::resilience::backoff::calculate_backoff;
use crate::rotation::RotationPool;
use crate::tunnel::core_config;
use crate::tunnel::notice::Notice;
use crate::tunnel::quota::QuotaCounter;
use crate::tunnel::{TunnelCore, WorkerSpec};

/// Launches real tunnel core processes.
#[derive(Debug, Clone)]
pub struct CoreLauncher {
    binary: PathBuf,
    data_root: PathBuf,
    pool: Arc<RotationPool>,
}

impl CoreLauncher {
    pub fn new(binary: PathBuf, data_root: PathBuf, pool: Arc<RotationPool>) -> Self {
        Self { binary, data_root, pool }
    }

    pub fn binary(&self) -> &Path {
        &self.binary
    }
}

impl TunnelCore for CoreLauncher {
    fn run(&self, spec: WorkerSpec, cancel: CancellationToken) -> BoxFuture<'static, ()> {
        let worker = Worker {
            data_dir: self.data_root.join(spec.listen_port.to_string()),
            upstream: SocketAddr::from(([127, 0, 0, 1], spec.listen_port)),
            quota: QuotaCounter::new(spec.quota_limit),
            binary: self.binary.clone(),
            pool: Arc::clone(&self.pool),
            online: false,
            spec,
        };
        worker.run(cancel).boxed()
    }
}

/// How one core session ended.
#[derive(Debug)]
enum SessionEnd {
    Cancelled,
    QuotaExhausted,
    Exited { connected: bool, status: Option<ExitStatus> },
    Failed(std::io::Error),
}

struct Worker {
    spec: WorkerSpec,
    binary: PathBuf,
    data_dir: PathBuf,
    upstream: SocketAddr,
    pool: Arc<RotationPool>,
    quota: QuotaCounter,
    online: bool,
}

impl Worker {
    async fn run(mut self, cancel: CancellationToken) {
        let ordinal = self.spec.ordinal;
        let mut attempt = 0u32;

        loop {
            let end = self.session(&cancel).await;
            self.set_online(false);

            let reason = match end {
                SessionEnd::Cancelled => break,
                SessionEnd::QuotaExhausted => {
                    tracing::info!(worker = ordinal, limit = self.quota.limit(), "Quota reached, reconnecting");
                    attempt = 0;
                    "quota"
                }
                SessionEnd::Exited { connected, status } => {
                    if connected {
                        attempt = 0;
                    }
                    tracing::warn!(
                        worker = ordinal,
                        status = %status.map(|s| s.to_string()).unwrap_or_else(|| "unknown".into()),
                        "Tunnel core exited"
                    );
                    "exit"
                }
                SessionEnd::Failed(e) => {
                    tracing::error!(worker = ordinal, binary = %self.binary.display(), error = %e, "Tunnel core failed to start");
                    "spawn"
                }
            };
            metrics::record_worker_restart(reason);

            attempt = attempt.saturating_add(1);
            let delay = calculate_backoff(attempt, self.spec.core.reconnect_base_ms, self.spec.core.reconnect_max_ms);
            tracing::debug!(worker = ordinal, attempt, delay_ms = delay.as_millis() as u64, "Restarting tunnel core");
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = time::sleep(delay) => {}
            }
        }

        self.set_online(false);
        tracing::debug!(worker = ordinal, "Tunnel worker stopped");
    }

    async fn write_config(&self) -> std::io::Result<PathBuf> {
        tokio::fs::create_dir_all(&self.data_dir).await?;
        let path = self.data_dir.join("config.json");
        let doc = core_config::render(&self.spec, &self.data_dir);
        let body = serde_json::to_vec_pretty(&doc).map_err(std::io::Error::other)?;
        tokio::fs::write(&path, body).await?;
        Ok(path)
    }

    async fn session(&mut self, cancel: &CancellationToken) -> SessionEnd {
        if cancel.is_cancelled() {
            return SessionEnd::Cancelled;
        }
        self.quota.reset();

        let config_path = match self.write_config().await {
            Ok(path) => path,
            Err(e) => return SessionEnd::Failed(e),
        };

        let mut child = match Command::new(&self.binary)
            .arg("-config")
            .arg(&config_path)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
        {
            Ok(child) => child,
            Err(e) => return SessionEnd::Failed(e),
        };
        tracing::debug!(worker = self.spec.ordinal, pid = child.id().unwrap_or_default(), "Tunnel core started");

        let mut stdout = child.stdout.take().map(|s| BufReader::new(s).lines());
        let mut stderr = child.stderr.take().map(|s| BufReader::new(s).lines());
        let mut connected = false;

        let end = loop {
            let line = tokio::select! {
                _ = cancel.cancelled() => break SessionEnd::Cancelled,
                status = child.wait() => break SessionEnd::Exited { connected, status: status.ok() },
                line = next_line(&mut stdout), if stdout.is_some() => line,
                line = next_line(&mut stderr), if stderr.is_some() => line,
            };
            let Some(line) = line else {
                continue;
            };
            if self.on_line(&line, &mut connected) {
                break SessionEnd::QuotaExhausted;
            }
        };

        if !matches!(end, SessionEnd::Exited { .. }) {
            if let Err(e) = child.kill().await {
                tracing::debug!(worker = self.spec.ordinal, error = %e, "Failed to kill tunnel core");
            }
        }
        end
    }

    /// Apply one output line. Returns `true` when the quota is exhausted.
    fn on_line(&mut self, line: &str, connected: &mut bool) -> bool {
        let ordinal = self.spec.ordinal;
        match Notice::parse(line) {
            Some(Notice::Tunnels(count)) if count > 0 => {
                if !*connected {
                    tracing::info!(worker = ordinal, port = self.spec.listen_port, tunnels = count, "Connected");
                }
                *connected = true;
                self.set_online(true);
            }
            Some(Notice::Tunnels(_)) => {
                if *connected {
                    tracing::info!(worker = ordinal, "Tunnels lost, reconnecting");
                }
                self.set_online(false);
            }
            Some(Notice::BytesTransferred { sent, received }) => {
                metrics::record_worker_bytes(sent, received);
                let total = self.quota.add(sent.saturating_add(received));
                tracing::trace!(worker = ordinal, sent, received, total, "Bytes transferred");
                return self.quota.is_exhausted();
            }
            Some(Notice::ServerRegion(region)) => {
                tracing::info!(worker = ordinal, region = %region, "Server region");
            }
            Some(Notice::ListeningHttpProxyPort(port)) => {
                tracing::debug!(worker = ordinal, port, "Core HTTP proxy listening");
            }
            Some(Notice::Other(kind)) => {
                tracing::trace!(worker = ordinal, notice = %kind, "Core notice");
            }
            None => {
                tracing::trace!(worker = ordinal, line = %line, "Core output");
            }
        }
        false
    }

    fn set_online(&mut self, online: bool) {
        if online && self.online {
            // Tunnels are up, so clear any failures the rotator recorded.
            self.pool.register(self.upstream);
            return;
        }
        if online == self.online {
            return;
        }
        self.online = online;
        if online {
            self.pool.register(self.upstream);
            metrics::worker_connected();
        } else {
            self.pool.deregister(self.upstream);
            metrics::worker_disconnected();
        }
    }
}

/// Next line of an output stream; a closed stream is set to `None`.
async fn next_line<R>(lines: &mut Option<Lines<R>>) -> Option<String>
where
    R: AsyncBufRead + Unpin,
{
    let reader = lines.as_mut()?;
    match reader.next_line().await {
        Ok(Some(line)) => Some(line),
        _ => {
            *lines = None;
            None
        }
    }
}
