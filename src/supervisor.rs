//! Supervisor (C6): the process-wide loop that starts, monitors, and
//! restarts Tunnel Workers, and dispatches alerts on worker death.
//!
//! A fixed 30-second poll cadence, unconditional restart (no backoff — a
//! rendezvous server down for hours is expected, and alerts are the
//! feedback channel), and an exit-non-zero-if-any-descriptor-is-malformed
//! startup contract.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;

use tokio::process::{Child, Command};
use tokio::time::interval;
use tracing::{error, info, warn};

use crate::alerts::AlertFanoutHandle;
use crate::config::{TopLevelConfig, TunnelDescriptor};
use crate::error::{StunError, StunResult};
use crate::status::StatusRegistry;
use crate::worker::WORKER_SUBCOMMAND;

const POLL_INTERVAL: Duration = Duration::from_secs(30);

struct RunningWorker {
    child: Child,
    descriptor: TunnelDescriptor,
}

/// Owns the Worker table, the Status Registry, and the handle to the
/// Alert Fanout. Constructed once at startup and driven by `run`.
pub struct Supervisor {
    top_level: TopLevelConfig,
    self_exe: PathBuf,
    config_path: PathBuf,
    alerts: AlertFanoutHandle,
    status: Arc<StatusRegistry>,
    workers: HashMap<usize, RunningWorker>,
    next_index: usize,
}

impl Supervisor {
    pub fn new(
        top_level: TopLevelConfig,
        config_path: PathBuf,
        alerts: AlertFanoutHandle,
        status: Arc<StatusRegistry>,
    ) -> StunResult<Self> {
        let self_exe = std::env::current_exe()
            .map_err(|e| StunError::Other(format!("cannot resolve own executable path: {e}")))?;
        Ok(Self {
            top_level,
            self_exe,
            config_path,
            alerts,
            status,
            workers: HashMap::new(),
            next_index: 0,
        })
    }

    /// Load every descriptor under `tunnel_dirs` and spawn one Worker
    /// each. On any descriptor construction failure, every already-spawned
    /// Worker is killed and the error is returned — the caller should exit
    /// non-zero.
    pub async fn start_all(&mut self) -> StunResult<()> {
        let paths = TunnelDescriptor::discover(&self.top_level.tunnel_dirs)?;
        let mut descriptors = Vec::with_capacity(paths.len());
        for path in &paths {
            match TunnelDescriptor::from_ini_file(path) {
                Ok(descriptor) => descriptors.push(descriptor),
                Err(e) => {
                    error!(path = %path.display(), error = %e, "descriptor failed to load, aborting startup");
                    self.kill_all().await;
                    return Err(e);
                }
            }
        }

        for descriptor in descriptors {
            self.spawn_worker(descriptor).await?;
        }
        Ok(())
    }

    async fn spawn_worker(&mut self, descriptor: TunnelDescriptor) -> StunResult<()> {
        let child = Command::new(&self.self_exe)
            .arg(WORKER_SUBCOMMAND)
            .arg(&self.config_path)
            .arg(&descriptor.source_path)
            .stdin(Stdio::null())
            .spawn()
            .map_err(|e| StunError::Other(format!("failed to spawn worker for {}: {e}", descriptor.name)))?;

        info!(tunnel = %descriptor.name, "worker spawned");
        self.status.start_tunnel(&descriptor.name);

        let index = self.next_index;
        self.next_index += 1;
        self.workers.insert(index, RunningWorker { child, descriptor });
        Ok(())
    }

    /// The 30-second poll loop: reap dead Workers, restart them, repeat.
    /// Returns only on a shutdown signal.
    pub async fn run(&mut self) {
        let mut ticker = interval(POLL_INTERVAL);
        ticker.tick().await; // skip the immediate first tick

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    self.poll_once().await;
                }
                _ = shutdown_requested() => {
                    info!("supervisor received shutdown signal, draining workers");
                    self.kill_all().await;
                    return;
                }
            }
        }
    }

    async fn poll_once(&mut self) {
        let dead: Vec<usize> = self
            .workers
            .iter_mut()
            .filter_map(|(index, running)| match running.child.try_wait() {
                Ok(Some(_status)) => Some(*index),
                Ok(None) => None,
                Err(e) => {
                    warn!(tunnel = %running.descriptor.name, error = %e, "failed to poll worker status");
                    None
                }
            })
            .collect();

        for index in dead {
            if let Some(running) = self.workers.remove(&index) {
                let status = running.child.wait().await.ok();
                warn!(
                    tunnel = %running.descriptor.name,
                    exit_code = ?status.and_then(|s| s.code()),
                    "worker exited, restarting"
                );
                self.alerts
                    .send_alert(running.descriptor.name.clone(), None)
                    .await;
                if let Err(e) = self.spawn_worker(running.descriptor).await {
                    error!(error = %e, "failed to respawn worker");
                }
            }
        }
    }

    async fn kill_all(&mut self) {
        for (_, running) in self.workers.drain() {
            let mut child = running.child;
            let name = running.descriptor.name;
            if !terminate_gracefully(&child) {
                warn!(tunnel = %name, "failed to signal worker, killing");
                let _ = child.start_kill();
            }
            let _ = child.wait().await;
        }
    }
}

/// Send SIGTERM (not SIGKILL) so the Worker's own signal handler gets a
/// chance to drain: stop probing, cancel the port-forward, close SSH.
#[cfg(unix)]
fn terminate_gracefully(child: &Child) -> bool {
    match child.id() {
        Some(pid) => unsafe { libc::kill(pid as libc::pid_t, libc::SIGTERM) == 0 },
        None => false,
    }
}

#[cfg(not(unix))]
fn terminate_gracefully(_child: &Child) -> bool {
    false
}

#[cfg(unix)]
async fn shutdown_requested() {
    use tokio::signal::unix::{SignalKind, signal};

    let mut term = signal(SignalKind::terminate()).expect("failed to install SIGTERM handler");
    tokio::select! {
        _ = tokio::signal::ctrl_c() => {}
        _ = term.recv() => {}
    }
}

#[cfg(not(unix))]
async fn shutdown_requested() {
    let _ = tokio::signal::ctrl_c().await;
}

/// Resolve the directory a supervisor should search for log files, used
/// by the introspection endpoint's `/logs` zip response.
pub fn log_directory(top_level: &TopLevelConfig) -> &Path {
    &top_level.log_path
}
