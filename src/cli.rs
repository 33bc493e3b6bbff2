//! Command-line surface.

use std::ffi::OsString;
use std::path::PathBuf;

use clap::Parser;

use crate::config::ConfigOverrides;

#[derive(Debug, Parser)]
#[command(name = "tunnel-fleet")]
#[command(about = "Pool of tunnel workers behind one rotating local proxy", long_about = None)]
pub struct Cli {
    /// Front domains, comma separated (e.g. -f cdn.com,cdn.com:443)
    #[arg(short = 'f', value_name = "FRONTEND")]
    pub frontend: Option<String>,

    /// Whitelist host:port (e.g. -w akamai.net:80)
    #[arg(short = 'w', value_name = "WHITELIST")]
    pub whitelist: Option<String>,

    /// Number of tunnel workers (e.g. -c 4)
    #[arg(short = 'c', value_name = "CORE")]
    pub worker_count: Option<u32>,

    /// Egress region (e.g. -r sg)
    #[arg(short = 'r', value_name = "REGION")]
    pub region: Option<String>,

    /// Tunnels per core (1 for reconnect mode)
    #[arg(short = 't', value_name = "TUNNEL")]
    pub tunnel: Option<u32>,

    /// Tunnel worker concurrency hint (e.g. -tw 8)
    #[arg(long = "tw", value_name = "TUNNEL_WORKERS")]
    pub tunnel_workers: Option<u32>,

    /// Data quota per worker in bytes, 0 for unlimited (e.g. -l 4000000)
    #[arg(short = 'l', value_name = "LIMIT")]
    pub quota_limit: Option<u64>,

    /// Config file, defaults to config.json next to the executable
    #[arg(long = "config-file", value_name = "PATH")]
    pub config_file: Option<PathBuf>,
}

impl Cli {
    /// Parse the process arguments.
    pub fn parse_args() -> Self {
        Self::parse_from(normalize_args(std::env::args_os()))
    }

    pub fn overrides(&self) -> ConfigOverrides {
        ConfigOverrides {
            frontend: self.frontend.clone(),
            whitelist: self.whitelist.clone(),
            worker_count: self.worker_count,
            region: self.region.clone(),
            tunnel: self.tunnel,
            tunnel_workers: self.tunnel_workers,
            quota_limit: self.quota_limit,
        }
    }
}

/// Rewrite the single-dash `-tw` flag into its long form.
pub fn normalize_args<I, T>(args: I) -> Vec<OsString>
where
    I: IntoIterator<Item = T>,
    T: Into<OsString>,
{
    args.into_iter()
        .map(Into::into)
        .map(|arg| match arg.to_str() {
            Some("-tw") => OsString::from("--tw"),
            Some(s) if s.starts_with("-tw=") => OsString::from(format!("-{}", s)),
            _ => arg,
        })
        .collect()
}
