//! Tunnel fleet
//!
//! Runs a pool of tunnel core workers behind one local rotating proxy.
//!
//! # Architecture Overview
//!
//! ```text
//!   local clients / redirected traffic (redsocks)
//!        │
//!        ▼
//!   ┌──────────────────┐   round robin / random   ┌──────────────────────────┐
//!   │  proxy rotator   │ ───────────────────────▶ │ worker 1 .. N            │
//!   │  (entry port P)  │                          │ tunnel core on P+1..P+N  │
//!   └──────────────────┘                          └────────────┬─────────────┘
//!                                                              │ upstream proxy
//!                                                              ▼
//!                                                 ┌──────────────────────────┐
//!                                                 │ injector (CONNECT)       │
//!                                                 │ front domain / payload   │──▶ network
//!                                                 └──────────────────────────┘
//! ```

use std::path::PathBuf;
use std::sync::Arc;

use tunnel_fleet::cli::Cli;
use tunnel_fleet::config::{self, EffectiveConfig};
use tunnel_fleet::lifecycle::{signals, Collaborators, Outcome, Shutdown, Supervisor};
use tunnel_fleet::observability::{logging, metrics};

fn base_dir() -> PathBuf {
    std::env::current_exe()
        .ok()
        .and_then(|exe| exe.parent().map(PathBuf::from))
        .unwrap_or_else(|| PathBuf::from("."))
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse_args();
    let logs = logging::init();
    let base_dir = base_dir();
    let config_path = cli
        .config_file
        .clone()
        .unwrap_or_else(|| base_dir.join(config::CONFIG_FILE));

    let mut config = config::resolve(&config_path, &EffectiveConfig::default())?;
    cli.overrides().apply(&mut config);

    logs.set_level(&config.observability.log_level);
    config.validate()?;

    tracing::info!("tunnel-fleet v{} starting", env!("CARGO_PKG_VERSION"));
    tracing::info!(
        config = %config_path.display(),
        workers = config.worker_count,
        rotator_port = config.proxy_rotator.port,
        inject_port = config.inject.port,
        inject_type = config.inject.kind,
        region = %config.tunnel_core.region,
        tunnel = config.tunnel_core.tunnel,
        tunnel_workers = config.tunnel_core.tunnel_workers,
        quota_limit = config.tunnel_core.quota_limit,
        "Configuration loaded"
    );
    for (whitelist, fronts) in config.inject.rules.iter() {
        tracing::info!(whitelist, fronts = ?fronts, "Injection rule");
    }

    if config.observability.metrics_enabled {
        match config.observability.metrics_address.parse() {
            Ok(addr) => metrics::init_metrics(addr),
            Err(_) => tracing::error!(
                metrics_address = %config.observability.metrics_address,
                "Failed to parse metrics address"
            ),
        }
    }

    let shutdown = Arc::new(Shutdown::new());
    let signals = signals::arm(Arc::clone(&shutdown));

    let collaborators = Collaborators::standard(&config, &base_dir);
    let supervisor = Supervisor::new(config, base_dir, collaborators);

    let interrupt = {
        let shutdown = Arc::clone(&shutdown);
        async move { shutdown.wait().await }
    };

    match supervisor.run(interrupt).await? {
        Outcome::CoreMissing { path, frontends } => {
            tracing::error!(path = %path.display(), "Place the tunnel core binary there and start again");
            frontends.stop().await;
        }
        Outcome::Stopped(report) => {
            tracing::info!(workers_stopped = report.workers_stopped, "Shutdown complete");
        }
    }

    signals.abort();
    Ok(())
}
