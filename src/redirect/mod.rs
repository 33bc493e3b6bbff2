//! Transparent redirect subsystem.
//!
//! # Data Flow
//! ```text
//! System TCP traffic
//!     → iptables REDIRECT (setup commands)
//!     → redsocks (http-connect)
//!     → proxy rotator entry port
//!
//! Injector dials a front domain
//!     → RedirectControl::bypass(ip).await
//!     → redsocks.rs runs the bypass command once per new address
//!     → request acknowledged, injector connects
//! ```
//!
//! # Design Decisions
//! - Start is synchronous from the Supervisor's view: it completes before workers spawn
//! - Stop is best-effort and idempotent
//! - A bypass resolves only after the exclusion is applied, or once nothing consumes requests
//! - Failures inside the service are logged; they never abort the Supervisor

use std::net::IpAddr;
use std::sync::Arc;

use dashmap::DashSet;
use futures_util::future::BoxFuture;
use thiserror::Error;
use tokio::sync::{mpsc, oneshot};

pub mod redsocks;

pub use redsocks::Redsocks;

#[derive(Debug, Error)]
pub enum RedirectError {
    #[error("Failed to write {path}: {source}")]
    WriteConfig {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to spawn {command}: {source}")]
    Spawn {
        command: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Redirect already started")]
    AlreadyStarted,
}

/// The transparent redirect control surface.
pub trait RedirectService: Send + Sync {
    /// Start redirecting. Resolves once the redirect is in place.
    fn start(&self) -> BoxFuture<'_, Result<(), RedirectError>>;

    /// Stop redirecting and release every resource started by `start`.
    fn stop(&self) -> BoxFuture<'_, ()>;

    /// Handle for reporting addresses that must bypass the redirect.
    fn control(&self) -> RedirectControl;
}

/// One address to exclude from the redirect, acknowledged once applied.
#[derive(Debug)]
pub struct BypassRequest {
    ip: IpAddr,
    applied: oneshot::Sender<()>,
}

impl BypassRequest {
    pub fn ip(&self) -> IpAddr {
        self.ip
    }

    /// Release the dial waiting on this address.
    pub fn applied(self) {
        let _ = self.applied.send(());
    }
}

/// Cloneable handle through which the injector reports the addresses it
/// dials, so the tunnel's own egress is never redirected into itself.
#[derive(Debug, Clone)]
pub struct RedirectControl {
    bypassed: Arc<DashSet<IpAddr>>,
    tx: Option<mpsc::UnboundedSender<BypassRequest>>,
}

impl RedirectControl {
    /// A control handle and the receiver of bypass requests.
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<BypassRequest>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (
            Self {
                bypassed: Arc::new(DashSet::new()),
                tx: Some(tx),
            },
            rx,
        )
    }

    /// A handle that only records addresses.
    pub fn detached() -> Self {
        Self {
            bypassed: Arc::new(DashSet::new()),
            tx: None,
        }
    }

    /// Exclude `ip` from the redirect and wait until the exclusion is in place.
    ///
    /// Returns `true` the first time an address is recorded. A dropped
    /// receiver releases the caller immediately.
    pub async fn bypass(&self, ip: IpAddr) -> bool {
        if ip.is_loopback() || self.bypassed.contains(&ip) {
            return false;
        }
        if let Some(tx) = &self.tx {
            let (applied, done) = oneshot::channel();
            if tx.send(BypassRequest { ip, applied }).is_ok() {
                let _ = done.await;
            }
        }
        self.bypassed.insert(ip)
    }

    pub fn is_bypassed(&self, ip: &IpAddr) -> bool {
        self.bypassed.contains(ip)
    }

    pub fn bypassed(&self) -> Vec<IpAddr> {
        self.bypassed.iter().map(|ip| *ip).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn bypass_waits_for_the_acknowledgement() {
        let (control, mut rx) = RedirectControl::channel();
        let ip: IpAddr = "104.16.1.1".parse().unwrap();

        let pending = tokio::spawn({
            let control = control.clone();
            async move { control.bypass(ip).await }
        });
        let request = rx.recv().await.unwrap();
        assert_eq!(request.ip(), ip);
        tokio::time::sleep(std::time::Duration::from_millis(50)).await;
        assert!(!pending.is_finished());
        assert!(!control.is_bypassed(&ip));

        request.applied();
        assert!(pending.await.unwrap());
        assert!(control.is_bypassed(&ip));

        assert!(!control.bypass(ip).await);
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn dropped_receiver_releases_the_caller() {
        let (control, rx) = RedirectControl::channel();
        drop(rx);
        assert!(control.bypass("104.16.1.1".parse().unwrap()).await);
    }

    #[tokio::test]
    async fn loopback_is_never_bypassed() {
        let control = RedirectControl::detached();
        assert!(!control.bypass("127.0.0.1".parse().unwrap()).await);
        assert!(control.bypassed().is_empty());
    }
}
