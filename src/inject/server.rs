//! Domain-front injector frontend.
//!
//! Accepts HTTP CONNECT requests from the tunnel cores' upstream proxy
//! setting, dials either the requested target or a front domain picked from
//! the rule set, and relays the tunnel once the dial succeeded.

use std::io;
use std::sync::Arc;
use std::time::Duration;

use rand::seq::SliceRandom;
use tokio::io::AsyncWriteExt;
use tokio::net::{lookup_host, TcpStream};
use tokio::task::JoinHandle;
use tokio::time;
use tokio_util::sync::CancellationToken;

use crate::config::schema::{InjectConfig, InjectMode};
use crate::inject::request::{parse_connect, read_head, render_payload, ConnectRequest, InjectError};
use crate::inject::rules::{split_host_port, WILDCARD};
use crate::lifecycle::services::{FrontendService, Ready};
use crate::net::{relay, ConnectionTracker, Listener, Relayed};
use crate::observability::metrics;
use crate::redirect::RedirectControl;

const ESTABLISHED: &[u8] = b"HTTP/1.1 200 Connection established\r\n\r\n";
const BAD_REQUEST: &[u8] = b"HTTP/1.1 400 Bad Request\r\nConnection: close\r\n\r\n";
const NOT_ALLOWED: &[u8] = b"HTTP/1.1 405 Method Not Allowed\r\nAllow: CONNECT\r\nConnection: close\r\n\r\n";
const BAD_GATEWAY: &[u8] = b"HTTP/1.1 502 Bad Gateway\r\nConnection: close\r\n\r\n";

#[derive(Debug, Clone)]
pub struct Injector {
    config: Arc<InjectConfig>,
    mode: InjectMode,
    redirect: RedirectControl,
    tracker: ConnectionTracker,
}

impl Injector {
    /// An unknown type code falls back to front mode; validation rejects it earlier.
    pub fn new(config: InjectConfig, redirect: RedirectControl) -> Self {
        let mode = config.mode().unwrap_or(InjectMode::Front);
        Self {
            config: Arc::new(config),
            mode,
            redirect,
            tracker: ConnectionTracker::new(),
        }
    }

    pub fn mode(&self) -> InjectMode {
        self.mode
    }

    pub fn active_connections(&self) -> u64 {
        self.tracker.active_count()
    }

    /// Host and port actually dialed for `request`.
    pub fn route(&self, request: &ConnectRequest) -> (String, u16) {
        if self.mode != InjectMode::Front {
            return (request.host.clone(), request.port);
        }
        let Some(fronts) = self.config.rules.lookup(&request.host, request.port) else {
            return (request.host.clone(), request.port);
        };
        let Some(front) = fronts.choose(&mut rand::thread_rng()) else {
            return (request.host.clone(), request.port);
        };
        if front == WILDCARD {
            return (request.host.clone(), request.port);
        }
        split_host_port(front, request.port)
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
                            let guard = this.tracker.track();
                            let outcome = match this.handle(stream, &shutdown).await {
                                Ok(()) => "relayed",
                                Err(e) => {
                                    tracing::debug!(connection_id = %guard.id(), peer = %peer, error = %e, "Inject request failed");
                                    match e {
                                        InjectError::Dial { .. } | InjectError::Timeout(_) => "dial_failed",
                                        InjectError::Io(_) => "io_error",
                                        _ => "rejected",
                                    }
                                }
                            };
                            metrics::record_frontend_connection("inject", outcome);
                            drop(permit);
                        });
                    }
                    Err(e) => tracing::warn!(error = %e, "Injector accept failed"),
                },
            }
        }

        tracing::info!(active = self.tracker.active_count(), "Injector stopped");
    }

    /// Resolve and connect. Each candidate address is excluded from the
    /// redirect, and the exclusion applied, before it is connected.
    async fn dial(&self, host: &str, port: u16) -> io::Result<TcpStream> {
        let mut last_err = None;
        for addr in lookup_host((host, port)).await? {
            if self.redirect.bypass(addr.ip()).await {
                metrics::record_bypass();
                tracing::debug!(ip = %addr.ip(), "Front address bypasses redirect");
            }
            match TcpStream::connect(addr).await {
                Ok(stream) => return Ok(stream),
                Err(e) => last_err = Some(e),
            }
        }
        Err(last_err.unwrap_or_else(|| io::Error::new(io::ErrorKind::NotFound, format!("no address for {}", host))))
    }

    async fn handle(&self, mut client: TcpStream, shutdown: &CancellationToken) -> Result<(), InjectError> {
        let timeout = Duration::from_secs(self.config.proxy_timeout.max(1));
        let (head, early) = time::timeout(timeout, read_head(&mut client))
            .await
            .map_err(|_| InjectError::Timeout("request head"))??;

        let request = match parse_connect(&head) {
            Ok(request) => request,
            Err(e) => {
                let reply = if matches!(e, InjectError::Method(_)) { NOT_ALLOWED } else { BAD_REQUEST };
                let _ = client.write_all(reply).await;
                return Err(e);
            }
        };

        let (host, port) = self.route(&request);
        let target = format!("{}:{}", host, port);
        let mut upstream = match time::timeout(timeout, self.dial(&host, port)).await {
            Ok(Ok(stream)) => stream,
            Ok(Err(source)) => {
                let _ = client.write_all(BAD_GATEWAY).await;
                return Err(InjectError::Dial { target, source });
            }
            Err(_) => {
                let _ = client.write_all(BAD_GATEWAY).await;
                return Err(InjectError::Timeout("dial"));
            }
        };

        let mut leftover = Vec::new();
        if self.mode != InjectMode::Direct && !self.config.proxy_payload.is_empty() {
            let payload = render_payload(&self.config.proxy_payload, &request);
            upstream.write_all(payload.as_bytes()).await?;
            let (response, rest) = time::timeout(timeout, read_head(&mut upstream))
                .await
                .map_err(|_| InjectError::Timeout("payload response"))??;
            tracing::trace!(
                dialed = %target,
                status = %String::from_utf8_lossy(response.split(|b| *b == b'\r').next().unwrap_or_default()),
                "Payload answered"
            );
            leftover = rest;
        }

        tracing::debug!(request = %request.host_port(), dialed = %target, "Tunnel established");

        client.write_all(ESTABLISHED).await?;
        if !leftover.is_empty() {
            client.write_all(&leftover).await?;
        }
        if !early.is_empty() {
            upstream.write_all(&early).await?;
        }

        match relay(&mut client, &mut upstream, shutdown).await? {
            Relayed::Completed { to_upstream, to_client } => {
                tracing::trace!(dialed = %target, to_upstream, to_client, "Relay finished");
            }
            Relayed::Cancelled => {}
        }
        Ok(())
    }
}

impl FrontendService for Injector {
    fn name(&self) -> &'static str {
        "inject"
    }

    fn launch(&self, ready: Ready, shutdown: CancellationToken) -> JoinHandle<()> {
        tokio::spawn(self.clone().serve(ready, shutdown))
    }
}
