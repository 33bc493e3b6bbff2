//! Structured logging.
//!
//! `RUST_LOG` wins when set; otherwise the configured level applies to this
//! crate only. The subscriber is installed before the configuration is read,
//! at the default level, and the configured level is swapped in afterwards.

use tracing::Subscriber;
use tracing_subscriber::{layer::SubscriberExt, reload, util::SubscriberInitExt, EnvFilter, Registry};

type FilterHandle = reload::Handle<EnvFilter, Registry>;

/// Filter directive used when `RUST_LOG` is absent.
pub fn default_directive(log_level: &str) -> String {
    let level = match log_level.trim() {
        "" => "info",
        level => level,
    };
    format!("tunnel_fleet={}", level)
}

/// Adjusts the installed filter once the configured level is known.
pub struct LogHandle {
    /// `None` when `RUST_LOG` pinned the filter.
    filter: Option<FilterHandle>,
}

impl LogHandle {
    pub fn set_level(&self, log_level: &str) {
        let Some(filter) = &self.filter else {
            return;
        };
        if let Err(e) = filter.reload(EnvFilter::new(default_directive(log_level))) {
            tracing::warn!(log_level, error = %e, "Failed to apply log level");
        }
    }
}

fn subscriber(filter: EnvFilter) -> (impl Subscriber + Send + Sync + 'static, FilterHandle) {
    let (filter, handle) = reload::Layer::new(filter);
    let subscriber = tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_target(false));
    (subscriber, handle)
}

/// Install the global subscriber at the default level. Later calls are ignored.
pub fn init() -> LogHandle {
    let from_env = EnvFilter::try_from_default_env().ok();
    let pinned = from_env.is_some();
    let (subscriber, handle) = subscriber(from_env.unwrap_or_else(|| default_directive("").into()));
    let _ = subscriber.try_init();
    LogHandle {
        filter: (!pinned).then_some(handle),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tracing::Level;

    #[test]
    fn directive_scopes_level_to_crate() {
        assert_eq!(default_directive("debug"), "tunnel_fleet=debug");
        assert_eq!(default_directive("  "), "tunnel_fleet=info");
    }

    #[test]
    fn configured_level_applies_after_install() {
        let (subscriber, handle) = subscriber(default_directive("").into());
        let logs = LogHandle { filter: Some(handle) };

        tracing::subscriber::with_default(subscriber, || {
            assert!(tracing::enabled!(Level::INFO));
            assert!(!tracing::enabled!(Level::DEBUG));
            logs.set_level("debug");
            assert!(tracing::enabled!(Level::DEBUG));
        });
    }

    #[test]
    fn pinned_filter_ignores_configured_level() {
        let logs = LogHandle { filter: None };
        logs.set_level("trace");
    }
}
