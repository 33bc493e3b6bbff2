//! Redsocks + iptables redirect.

use std::collections::HashSet;
use std::net::IpAddr;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::{Mutex, PoisonError};

use futures_util::future::BoxFuture;
use futures_util::FutureExt;
use tokio::process::{Child, Command};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::config::{real_path, RedirectConfig};
use crate::redirect::{BypassRequest, RedirectControl, RedirectError, RedirectService};

/// Values substituted into command arguments.
#[derive(Debug, Clone, Copy)]
struct Placeholders {
    redsocks_port: u16,
    rotator_port: u16,
    ip: Option<IpAddr>,
}

impl Placeholders {
    fn expand(&self, arg: &str) -> String {
        let mut out = arg
            .replace("{redsocks_port}", &self.redsocks_port.to_string())
            .replace("{rotator_port}", &self.rotator_port.to_string());
        if let Some(ip) = self.ip {
            out = out.replace("{ip}", &ip.to_string());
        }
        out
    }
}

/// Redsocks configuration forwarding every redirected connection to the rotator.
pub fn render_conf(listen_port: u16, rotator_port: u16) -> String {
    format!(
        "base {{\n\
         \tlog_debug = off;\n\
         \tlog_info = on;\n\
         \tdaemon = off;\n\
         \tredirector = iptables;\n\
         }}\n\
         \n\
         redsocks {{\n\
         \tlocal_ip = 127.0.0.1;\n\
         \tlocal_port = {};\n\
         \tip = 127.0.0.1;\n\
         \tport = {};\n\
         \ttype = http-connect;\n\
         }}\n",
        listen_port, rotator_port
    )
}

#[derive(Default)]
struct Running {
    child: Option<Child>,
    bypass_task: Option<JoinHandle<()>>,
    cancel: Option<CancellationToken>,
    started: bool,
    stopped: bool,
}

pub struct Redsocks {
    config: RedirectConfig,
    conf_path: PathBuf,
    vars: Placeholders,
    control: RedirectControl,
    bypass_rx: Mutex<Option<mpsc::UnboundedReceiver<BypassRequest>>>,
    running: tokio::sync::Mutex<Running>,
}

impl Redsocks {
    pub fn new(config: RedirectConfig, rotator_port: u16, base_dir: &Path) -> Self {
        let (control, rx) = if config.enabled {
            let (control, rx) = RedirectControl::channel();
            (control, Some(rx))
        } else {
            (RedirectControl::detached(), None)
        };
        Self {
            conf_path: real_path(base_dir, &config.config_path),
            vars: Placeholders {
                redsocks_port: config.listen_port,
                rotator_port,
                ip: None,
            },
            config,
            control,
            bypass_rx: Mutex::new(rx),
            running: tokio::sync::Mutex::new(Running::default()),
        }
    }

    pub fn conf_path(&self) -> &Path {
        &self.conf_path
    }

    fn expand_all(&self, argv: &[String], ip: Option<IpAddr>) -> Vec<String> {
        let vars = Placeholders { ip, ..self.vars };
        argv.iter().map(|arg| vars.expand(arg)).collect()
    }

    async fn run_all(&self, commands: &[Vec<String>], stage: &'static str) {
        for argv in commands {
            run_command(&self.expand_all(argv, None), stage).await;
        }
    }

    async fn write_conf(&self) -> Result<(), RedirectError> {
        let write_err = |source| RedirectError::WriteConfig {
            path: self.conf_path.display().to_string(),
            source,
        };
        if let Some(parent) = self.conf_path.parent() {
            tokio::fs::create_dir_all(parent).await.map_err(write_err)?;
        }
        tokio::fs::write(&self.conf_path, render_conf(self.config.listen_port, self.vars.rotator_port))
            .await
            .map_err(write_err)
    }

    async fn start_inner(&self) -> Result<(), RedirectError> {
        if !self.config.enabled {
            tracing::info!("Transparent redirect disabled");
            return Ok(());
        }

        let mut running = self.running.lock().await;
        if running.started {
            return Err(RedirectError::AlreadyStarted);
        }
        running.started = true;

        // Dropped on failure, which releases any dial waiting on a bypass.
        let rx = self.bypass_rx.lock().unwrap_or_else(PoisonError::into_inner).take();

        self.write_conf().await?;

        let child = Command::new(&self.config.command)
            .arg("-c")
            .arg(&self.conf_path)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .spawn()
            .map_err(|source| RedirectError::Spawn {
                command: self.config.command.clone(),
                source,
            })?;
        tracing::info!(
            pid = child.id().unwrap_or_default(),
            port = self.config.listen_port,
            rotator_port = self.vars.rotator_port,
            "Redsocks started"
        );
        running.child = Some(child);

        self.run_all(&self.config.setup, "setup").await;

        if let Some(rx) = rx {
            let cancel = CancellationToken::new();
            let template = self.config.bypass.clone();
            let vars = self.vars;
            running.bypass_task = Some(tokio::spawn(consume_bypass(rx, template, vars, cancel.clone())));
            running.cancel = Some(cancel);
        }

        Ok(())
    }

    async fn stop_inner(&self) {
        if !self.config.enabled {
            return;
        }

        let mut running = self.running.lock().await;
        if !running.started || running.stopped {
            return;
        }
        running.stopped = true;

        if let Some(cancel) = running.cancel.take() {
            cancel.cancel();
        }
        if let Some(task) = running.bypass_task.take() {
            let _ = task.await;
        }

        self.run_all(&self.config.teardown, "teardown").await;

        if let Some(mut child) = running.child.take() {
            if let Err(e) = child.kill().await {
                tracing::warn!(error = %e, "Failed to kill redsocks");
            }
        }
        tracing::info!("Redsocks stopped");
    }
}

impl RedirectService for Redsocks {
    fn start(&self) -> BoxFuture<'_, Result<(), RedirectError>> {
        self.start_inner().boxed()
    }

    fn stop(&self) -> BoxFuture<'_, ()> {
        self.stop_inner().boxed()
    }

    fn control(&self) -> RedirectControl {
        self.control.clone()
    }
}

async fn consume_bypass(
    mut rx: mpsc::UnboundedReceiver<BypassRequest>,
    template: Vec<String>,
    vars: Placeholders,
    cancel: CancellationToken,
) {
    let mut applied = HashSet::new();
    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            next = rx.recv() => match next {
                Some(request) => {
                    let ip = request.ip();
                    if !template.is_empty() && applied.insert(ip) {
                        let vars = Placeholders { ip: Some(ip), ..vars };
                        let argv: Vec<String> = template.iter().map(|arg| vars.expand(arg)).collect();
                        run_command(&argv, "bypass").await;
                    }
                    request.applied();
                }
                None => break,
            },
        }
    }
}

/// Run one command to completion; failures are logged, never returned.
async fn run_command(argv: &[String], stage: &'static str) {
    let Some((program, args)) = argv.split_first() else {
        return;
    };
    match Command::new(program)
        .args(args)
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::piped())
        .output()
        .await
    {
        Ok(output) if output.status.success() => {
            tracing::debug!(stage, command = %argv.join(" "), "Redirect command succeeded");
        }
        Ok(output) => tracing::warn!(
            stage,
            command = %argv.join(" "),
            status = %output.status,
            stderr = %String::from_utf8_lossy(&output.stderr).trim(),
            "Redirect command failed"
        ),
        Err(e) => tracing::warn!(stage, command = %argv.join(" "), error = %e, "Redirect command could not run"),
    }
}
