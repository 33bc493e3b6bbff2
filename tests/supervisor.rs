//! Supervisor sequencing against fake collaborators.

use std::io;
use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use futures_util::future::BoxFuture;
use futures_util::FutureExt;
use tokio::net::TcpListener;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use tunnel_fleet::config::EffectiveConfig;
use tunnel_fleet::lifecycle::services::{FrontendService, Ready};
use tunnel_fleet::lifecycle::{Collaborators, Outcome, Phase, Supervisor, SupervisorError};
use tunnel_fleet::redirect::{RedirectControl, RedirectError, RedirectService};
use tunnel_fleet::tunnel::{TunnelCore, WorkerSpec};

mod common;

type Events = Arc<Mutex<Vec<String>>>;

fn record(events: &Events, event: impl Into<String>) {
    events.lock().unwrap().push(event.into());
}

fn count(events: &Events, prefix: &str) -> usize {
    events.lock().unwrap().iter().filter(|e| e.starts_with(prefix)).count()
}

fn position(events: &Events, prefix: &str) -> Option<usize> {
    events.lock().unwrap().iter().position(|e| e.starts_with(prefix))
}

#[derive(Clone, Copy)]
enum Behaviour {
    Listen,
    FailBind,
    Silent,
}

struct FakeFrontend {
    name: &'static str,
    behaviour: Behaviour,
}

impl FrontendService for FakeFrontend {
    fn name(&self) -> &'static str {
        self.name
    }

    fn launch(&self, ready: Ready, shutdown: CancellationToken) -> JoinHandle<()> {
        let behaviour = self.behaviour;
        tokio::spawn(async move {
            match behaviour {
                Behaviour::Listen => {
                    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
                    let _ = ready.send(Ok(listener.local_addr().unwrap()));
                    shutdown.cancelled().await;
                }
                Behaviour::FailBind => {
                    let _ = ready.send(Err(io::Error::new(io::ErrorKind::AddrInUse, "port taken")));
                }
                Behaviour::Silent => {
                    shutdown.cancelled().await;
                    drop(ready);
                }
            }
        })
    }
}

struct FakeRedirect {
    events: Events,
}

impl RedirectService for FakeRedirect {
    fn start(&self) -> BoxFuture<'_, Result<(), RedirectError>> {
        async move {
            record(&self.events, "redirect.start");
            Ok(())
        }
        .boxed()
    }

    fn stop(&self) -> BoxFuture<'_, ()> {
        async move { record(&self.events, "redirect.stop") }.boxed()
    }

    fn control(&self) -> RedirectControl {
        RedirectControl::detached()
    }
}

struct FakeCore {
    events: Events,
    specs: Arc<Mutex<Vec<WorkerSpec>>>,
}

impl TunnelCore for FakeCore {
    fn run(&self, spec: WorkerSpec, cancel: CancellationToken) -> BoxFuture<'static, ()> {
        let events = Arc::clone(&self.events);
        let specs = Arc::clone(&self.specs);
        async move {
            record(&events, format!("worker.start:{}", spec.ordinal));
            let ordinal = spec.ordinal;
            specs.lock().unwrap().push(spec);
            cancel.cancelled().await;
            record(&events, format!("worker.stop:{}", ordinal));
        }
        .boxed()
    }
}

struct Harness {
    events: Events,
    specs: Arc<Mutex<Vec<WorkerSpec>>>,
}

fn collaborators(rotator: Behaviour, injector: Behaviour) -> (Collaborators, Harness) {
    let events: Events = Arc::default();
    let specs = Arc::new(Mutex::new(Vec::new()));
    let collaborators = Collaborators {
        rotator: Arc::new(FakeFrontend {
            name: "proxy_rotator",
            behaviour: rotator,
        }),
        injector: Arc::new(FakeFrontend {
            name: "inject",
            behaviour: injector,
        }),
        redirect: Arc::new(FakeRedirect {
            events: Arc::clone(&events),
        }),
        core: Arc::new(FakeCore {
            events: Arc::clone(&events),
            specs: Arc::clone(&specs),
        }),
    };
    (collaborators, Harness { events, specs })
}

fn config(workers: u32) -> EffectiveConfig {
    let mut config = EffectiveConfig::default();
    config.worker_count = workers;
    config.tunnel_core.core_name = "fake-core".into();
    config.startup.ready_timeout_ms = 2_000;
    config
}

fn install_core(dir: &Path) {
    std::fs::write(dir.join("fake-core"), b"#!/bin/sh\n").unwrap();
}

#[tokio::test]
async fn missing_core_spawns_nothing_and_keeps_frontends() {
    let dir = common::scratch_dir();
    let (collaborators, harness) = collaborators(Behaviour::Listen, Behaviour::Listen);
    let supervisor = Supervisor::new(config(4), &dir, collaborators);
    let phases = supervisor.phases();

    let outcome = supervisor.run(std::future::pending::<()>()).await.unwrap();

    let Outcome::CoreMissing { path, frontends } = outcome else {
        panic!("expected CoreMissing");
    };
    assert_eq!(path, dir.join("fake-core"));
    assert!(frontends.is_running());
    assert!(frontends.addr("proxy_rotator").is_some());
    assert!(frontends.addr("inject").is_some());
    assert_eq!(*phases.borrow(), Phase::Terminated);
    assert_eq!(count(&harness.events, "redirect."), 0);
    assert_eq!(count(&harness.events, "worker."), 0);

    frontends.stop().await;
    let _ = std::fs::remove_dir_all(&dir);
}

#[tokio::test]
async fn interrupt_stops_redirect_then_every_worker_once() {
    let dir = common::scratch_dir();
    install_core(&dir);
    let (collaborators, harness) = collaborators(Behaviour::Listen, Behaviour::Listen);
    let supervisor = Supervisor::new(config(3), &dir, collaborators);
    let phases = supervisor.phases();

    let (tx, rx) = oneshot::channel::<()>();
    let events = Arc::clone(&harness.events);
    let trigger = async move {
        let started = common::eventually(Duration::from_secs(2), || {
            let events = Arc::clone(&events);
            async move { count(&events, "worker.start") == 3 }
        })
        .await;
        assert!(started, "workers never started");
        tx.send(()).unwrap();
    };

    let (outcome, ()) = tokio::join!(supervisor.run(async move {
        let _ = rx.await;
    }), trigger);

    let Outcome::Stopped(report) = outcome.unwrap() else {
        panic!("expected Stopped");
    };
    assert_eq!(report.workers_stopped, 3);
    assert_eq!(*phases.borrow(), Phase::Terminated);

    assert_eq!(count(&harness.events, "redirect.start"), 1);
    assert_eq!(count(&harness.events, "redirect.stop"), 1);
    for ordinal in 1..=3 {
        assert_eq!(count(&harness.events, &format!("worker.stop:{}", ordinal)), 1);
    }
    let redirect_stop = position(&harness.events, "redirect.stop").unwrap();
    let first_worker_stop = position(&harness.events, "worker.stop").unwrap();
    assert!(redirect_stop < first_worker_stop);

    let _ = std::fs::remove_dir_all(&dir);
}

#[tokio::test]
async fn worker_ports_follow_the_rotator_port() {
    let dir = common::scratch_dir();
    install_core(&dir);
    let (collaborators, harness) = collaborators(Behaviour::Listen, Behaviour::Listen);
    let mut config = config(4);
    config.tunnel_core.quota_limit = 0;
    let supervisor = Supervisor::new(config, &dir, collaborators);

    let outcome = supervisor
        .run(tokio::time::sleep(Duration::from_millis(100)))
        .await;

    let Outcome::Stopped(report) = outcome.unwrap() else {
        panic!("expected Stopped");
    };
    let base = report.worker_ports[0] - 1;
    assert_eq!(report.worker_ports, vec![base + 1, base + 2, base + 3, base + 4]);

    let specs = harness.specs.lock().unwrap();
    assert_eq!(specs.len(), 4);
    let egress = specs[0].egress_port;
    assert_ne!(egress, base);
    assert!(specs.iter().all(|s| s.egress_port == egress));
    assert!(specs.iter().all(|s| s.quota_limit == 0));

    let _ = std::fs::remove_dir_all(&dir);
}

#[tokio::test]
async fn frontend_bind_failure_is_fatal() {
    let dir = common::scratch_dir();
    install_core(&dir);
    let (collaborators, harness) = collaborators(Behaviour::Listen, Behaviour::FailBind);
    let supervisor = Supervisor::new(config(2), &dir, collaborators);
    let phases = supervisor.phases();

    let err = supervisor.run(std::future::pending::<()>()).await.unwrap_err();
    assert!(matches!(err, SupervisorError::FrontendStart { service: "inject", .. }));
    assert_eq!(*phases.borrow(), Phase::Terminated);
    assert_eq!(count(&harness.events, "redirect."), 0);
    assert_eq!(count(&harness.events, "worker."), 0);

    let _ = std::fs::remove_dir_all(&dir);
}

#[tokio::test]
async fn silent_frontend_times_out() {
    let dir = common::scratch_dir();
    install_core(&dir);
    let (collaborators, _harness) = collaborators(Behaviour::Silent, Behaviour::Listen);
    let mut config = config(1);
    config.startup.ready_timeout_ms = 50;
    let supervisor = Supervisor::new(config, &dir, collaborators);

    let err = supervisor.run(std::future::pending::<()>()).await.unwrap_err();
    assert!(matches!(err, SupervisorError::FrontendTimeout { service: "proxy_rotator", .. }));

    let _ = std::fs::remove_dir_all(&dir);
}
