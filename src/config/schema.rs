//! Configuration schema definitions.
//!
//! This module defines the complete configuration tree for the fleet.
//! All types derive Serde traits so the tree can be persisted to and read back
//! from the config file.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::inject::rules::InjectionRuleSet;

/// Root configuration: the merged result of defaults, the persisted file and
/// command-line overrides.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct EffectiveConfig {
    /// Number of tunnel workers to spawn.
    pub worker_count: u32,

    /// Proxy rotation service (the local entry port).
    pub proxy_rotator: ProxyRotatorConfig,

    /// Domain-front injector.
    pub inject: InjectConfig,

    /// Settings shared by every tunnel worker.
    pub tunnel_core: TunnelCoreConfig,

    /// Transparent redirect service.
    pub redirect: RedirectConfig,

    /// Startup sequencing.
    pub startup: StartupConfig,

    /// Logging and metrics.
    pub observability: ObservabilityConfig,
}

impl Default for EffectiveConfig {
    fn default() -> Self {
        Self {
            worker_count: 4,
            proxy_rotator: ProxyRotatorConfig::default(),
            inject: InjectConfig::default(),
            tunnel_core: TunnelCoreConfig::default(),
            redirect: RedirectConfig::default(),
            startup: StartupConfig::default(),
            observability: ObservabilityConfig::default(),
        }
    }
}

/// Upstream selection strategy of the rotation pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum RotationStrategy {
    #[default]
    RoundRobin,
    Random,
}

/// Proxy rotation service configuration.
///
/// `port` doubles as the base port of the worker pool: worker `i` listens on
/// `port + i`.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct ProxyRotatorConfig {
    pub listen_host: String,
    pub port: u16,

    /// Upstreams always present in the pool, in addition to the workers.
    pub upstreams: Vec<String>,

    pub strategy: RotationStrategy,

    /// Maximum concurrent client connections (backpressure).
    pub max_connections: usize,

    /// Maximum concurrent connections relayed to a single upstream.
    pub max_upstream_connections: usize,

    pub connect_timeout_secs: u64,

    /// Upstreams tried per client connection before giving up.
    pub max_attempts: u32,

    /// Consecutive dial failures before an upstream is skipped.
    pub unhealthy_threshold: u32,
}

impl Default for ProxyRotatorConfig {
    fn default() -> Self {
        Self {
            listen_host: "127.0.0.1".to_string(),
            port: 3080,
            upstreams: Vec::new(),
            strategy: RotationStrategy::RoundRobin,
            max_connections: 1024,
            max_upstream_connections: 256,
            connect_timeout_secs: 5,
            max_attempts: 3,
            unhealthy_threshold: 3,
        }
    }
}

/// How the injector dials the target of a CONNECT request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InjectMode {
    /// Dial the requested target as-is.
    Direct,
    /// Dial the requested target and send the proxy payload first.
    Payload,
    /// Dial a front domain from the rule set instead of the target.
    Front,
}

impl InjectMode {
    pub fn from_code(code: u8) -> Option<Self> {
        match code {
            1 => Some(InjectMode::Direct),
            2 => Some(InjectMode::Payload),
            3 => Some(InjectMode::Front),
            _ => None,
        }
    }
}

/// Domain-front injector configuration.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct InjectConfig {
    pub listen_host: String,
    pub port: u16,

    /// Injection type code (1 direct, 2 payload, 3 front).
    #[serde(rename = "type")]
    pub kind: u8,

    /// Raw payload sent after dialing; empty disables it.
    pub proxy_payload: String,

    /// Dial and payload response timeout in seconds.
    pub proxy_timeout: u64,

    pub max_connections: usize,

    /// Whitelist key `host:port` → front domains.
    pub rules: InjectionRuleSet,
}

impl InjectConfig {
    /// Injection mode for the configured type code.
    pub fn mode(&self) -> Option<InjectMode> {
        InjectMode::from_code(self.kind)
    }
}

impl Default for InjectConfig {
    fn default() -> Self {
        Self {
            listen_host: "127.0.0.1".to_string(),
            port: 8089,
            kind: 3,
            proxy_payload: String::new(),
            proxy_timeout: 5,
            max_connections: 1024,
            rules: InjectionRuleSet::single(
                "akamai.net:80",
                [
                    "video.iflix.com",
                    "videocdn-2.iflix.com",
                    "iflix-videocdn-p1.akamaized.net",
                    "iflix-videocdn-p2.akamaized.net",
                    "iflix-videocdn-p3.akamaized.net",
                    "iflix-videocdn-p6.akamaized.net",
                    "iflix-videocdn-p7.akamaized.net",
                    "iflix-videocdn-p8.akamaized.net",
                ],
            ),
        }
    }
}

/// Settings handed to every tunnel worker.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct TunnelCoreConfig {
    /// Core binary, relative to the executable directory unless absolute.
    pub core_name: String,

    /// Egress region code; empty lets the core choose.
    pub region: String,

    /// Tunnel pool size per core; 1 selects reconnect mode.
    pub tunnel: u32,

    /// Connection worker concurrency hint.
    pub tunnel_workers: u32,

    /// Per-worker data quota in bytes; 0 is unlimited.
    pub quota_limit: u64,

    /// Root of the per-worker data directories.
    pub data_dir: String,

    pub reconnect_base_ms: u64,
    pub reconnect_max_ms: u64,

    /// Extra keys copied verbatim into every core config file.
    pub extra: Map<String, Value>,
}

impl Default for TunnelCoreConfig {
    fn default() -> Self {
        Self {
            core_name: "psiphon-tunnel-core".to_string(),
            region: String::new(),
            tunnel: 1,
            tunnel_workers: 8,
            quota_limit: 4_000_000,
            data_dir: "storage/psiphon".to_string(),
            reconnect_base_ms: 1_000,
            reconnect_max_ms: 30_000,
            extra: Map::new(),
        }
    }
}

/// Transparent redirect (redsocks + iptables) configuration.
///
/// Command arguments may contain `{redsocks_port}`, `{rotator_port}` and,
/// for `bypass`, `{ip}`.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct RedirectConfig {
    pub enabled: bool,
    pub command: String,
    pub config_path: String,
    pub listen_port: u16,
    pub setup: Vec<Vec<String>>,
    pub teardown: Vec<Vec<String>>,
    pub bypass: Vec<String>,
}

fn argv(args: &[&str]) -> Vec<String> {
    args.iter().map(|s| s.to_string()).collect()
}

impl Default for RedirectConfig {
    fn default() -> Self {
        let mut setup = vec![argv(&["iptables", "-t", "nat", "-N", "TUNNEL_FLEET"])];
        for net in ["0.0.0.0/8", "10.0.0.0/8", "127.0.0.0/8", "169.254.0.0/16", "172.16.0.0/12", "192.168.0.0/16", "224.0.0.0/4", "240.0.0.0/4"] {
            setup.push(argv(&["iptables", "-t", "nat", "-A", "TUNNEL_FLEET", "-d", net, "-j", "RETURN"]));
        }
        setup.push(argv(&[
            "iptables", "-t", "nat", "-A", "TUNNEL_FLEET", "-p", "tcp", "-j", "REDIRECT", "--to-ports", "{redsocks_port}",
        ]));
        setup.push(argv(&["iptables", "-t", "nat", "-A", "OUTPUT", "-p", "tcp", "-j", "TUNNEL_FLEET"]));

        Self {
            enabled: true,
            command: "redsocks".to_string(),
            config_path: "storage/redsocks/redsocks.conf".to_string(),
            listen_port: 3070,
            setup,
            teardown: vec![
                argv(&["iptables", "-t", "nat", "-D", "OUTPUT", "-p", "tcp", "-j", "TUNNEL_FLEET"]),
                argv(&["iptables", "-t", "nat", "-F", "TUNNEL_FLEET"]),
                argv(&["iptables", "-t", "nat", "-X", "TUNNEL_FLEET"]),
            ],
            bypass: argv(&["iptables", "-t", "nat", "-I", "TUNNEL_FLEET", "-d", "{ip}", "-j", "RETURN"]),
        }
    }
}

/// Startup sequencing configuration.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct StartupConfig {
    /// Upper bound on waiting for the frontends to report their listeners.
    pub ready_timeout_ms: u64,
}

impl Default for StartupConfig {
    fn default() -> Self {
        Self { ready_timeout_ms: 5_000 }
    }
}

/// Observability configuration.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// Log level (trace, debug, info, warn, error).
    pub log_level: String,

    /// Enable the Prometheus scrape endpoint.
    pub metrics_enabled: bool,

    /// Metrics endpoint bind address.
    pub metrics_address: String,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            metrics_enabled: false,
            metrics_address: "127.0.0.1:9090".to_string(),
        }
    }
}
