//! Proxy rotator frontend.
//!
//! Accepts client connections on the entry port and relays each one,
//! byte for byte, through the next upstream chosen by the rotation pool.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tokio::net::TcpStream;
use tokio::task::JoinHandle;
use tokio::time;
use tokio_util::sync::CancellationToken;

use crate::config::ProxyRotatorConfig;
use crate::lifecycle::services::{FrontendService, Ready};
use crate::net::{relay, ConnectionTracker, Listener, Relayed};
use crate::observability::metrics;
use crate::rotation::pool::RotationPool;

#[derive(Debug, Clone)]
pub struct ProxyRotator {
    config: Arc<ProxyRotatorConfig>,
    pool: Arc<RotationPool>,
    tracker: ConnectionTracker,
}

impl ProxyRotator {
    pub fn new(config: ProxyRotatorConfig, pool: Arc<RotationPool>) -> Self {
        Self {
            config: Arc::new(config),
            pool,
            tracker: ConnectionTracker::new(),
        }
    }

    pub fn pool(&self) -> &Arc<RotationPool> {
        &self.pool
    }

    pub fn active_connections(&self) -> u64 {
        self.tracker.active_count()
    }

    /// Bind, report readiness, then accept until `shutdown` fires.
    pub async fn serve(self, ready: Ready, shutdown: CancellationToken) {
        let listener = match Listener::bind(&self.config.listen_host, self.config.port, self.config.max_connections).await {
            Ok(listener) => listener,
            Err(e) => {
                let _ = ready.send(Err(e.into()));
                return;
            }
        };
        match listener.local_addr() {
            Ok(addr) => {
                let _ = ready.send(Ok(addr));
            }
            Err(e) => {
                let _ = ready.send(Err(e));
                return;
            }
        }

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                accepted = listener.accept() => match accepted {
                    Ok((stream, peer, permit)) => {
                        let this = self.clone();
                        let shutdown = shutdown.clone();
                        tokio::spawn(async move {
                            this.handle(stream, peer, &shutdown).await;
                            drop(permit);
                        });
                    }
                    Err(e) => tracing::warn!(error = %e, "Proxy rotator accept failed"),
                },
            }
        }

        tracing::info!(active = self.tracker.active_count(), "Proxy rotator stopped");
    }

    async fn handle(&self, mut client: TcpStream, peer: SocketAddr, shutdown: &CancellationToken) {
        let guard = self.tracker.track();
        let connect_timeout = Duration::from_secs(self.config.connect_timeout_secs.max(1));

        for attempt in 1..=self.config.max_attempts.max(1) {
            let Some(upstream) = self.pool.next() else {
                tracing::debug!(connection_id = %guard.id(), peer = %peer, "No upstream online, dropping connection");
                metrics::record_frontend_connection("proxy_rotator", "no_upstream");
                return;
            };

            match time::timeout(connect_timeout, TcpStream::connect(upstream.addr)).await {
                Ok(Ok(mut stream)) => {
                    upstream.mark_success();
                    metrics::record_frontend_connection("proxy_rotator", "relayed");
                    match relay(&mut client, &mut stream, shutdown).await {
                        Ok(Relayed::Completed { to_upstream, to_client }) => tracing::trace!(
                            connection_id = %guard.id(),
                            upstream = %upstream.addr,
                            to_upstream,
                            to_client,
                            "Relay finished"
                        ),
                        Ok(Relayed::Cancelled) => {}
                        Err(e) => tracing::debug!(connection_id = %guard.id(), error = %e, "Relay ended with error"),
                    }
                    return;
                }
                Ok(Err(e)) => {
                    tracing::warn!(upstream = %upstream.addr, attempt, error = %e, "Upstream dial failed");
                }
                Err(_) => {
                    tracing::warn!(upstream = %upstream.addr, attempt, "Upstream dial timed out");
                }
            }

            if upstream.mark_failure(self.config.unhealthy_threshold as usize) {
                tracing::warn!(upstream = %upstream.addr, "Upstream marked unhealthy");
            }
        }

        metrics::record_frontend_connection("proxy_rotator", "failed");
    }
}

impl FrontendService for ProxyRotator {
    fn name(&self) -> &'static str {
        "proxy_rotator"
    }

    fn launch(&self, ready: Ready, shutdown: CancellationToken) -> JoinHandle<()> {
        tokio::spawn(self.clone().serve(ready, shutdown))
    }
}
