//! Tunnel Worker (C3): the re-exec'd child process that owns exactly one
//! tunnel's SSH session, accept loop, and liveness probe.
//!
//! OS-level fault isolation between tunnels comes from re-executing this
//! crate's own binary under a hidden subcommand, one process per tunnel,
//! with the Supervisor talking to each Worker only through its exit code,
//! never shared memory.

use std::time::Duration;

use tracing::{error, info, warn};

use crate::alerts::AlertFanoutHandle;
use crate::bytepump;
use crate::config::TunnelDescriptor;
use crate::probe::{self, ProbeOutcome};
use crate::ssh::SshSession;

/// Hidden argv[1] that re-invokes the binary as a Worker instead of the
/// Supervisor. Never documented in `--help`.
pub const WORKER_SUBCOMMAND: &str = "__worker";

/// Exit status the Supervisor reads back from a finished Worker process.
/// The Supervisor restarts unconditionally on any exit; the code only
/// shapes the log line and alert message, and distinguishes a requested
/// shutdown (0) from every failure mode (1).
#[repr(i32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerExit {
    /// Signaled to shut down (SIGINT/SIGTERM) and drained cleanly.
    Clean = 0,
    /// Connect, port-forward, or liveness probe failed.
    Failed = 1,
}

impl WorkerExit {
    pub fn code(self) -> i32 {
        self as i32
    }
}

/// Run one tunnel to completion. Returns the exit code the process should
/// exit with; never panics on a recoverable failure.
pub async fn run(descriptor: &TunnelDescriptor, alerts: Option<&AlertFanoutHandle>) -> i32 {
    info!(
        tunnel = %descriptor.name,
        server = %descriptor.server_host,
        "worker starting"
    );

    let mut session = match SshSession::connect(descriptor).await {
        Ok(session) => session,
        Err(e) => {
            error!(tunnel = %descriptor.name, error = %e, "worker setup: connect failed");
            alert(alerts, &descriptor.name, format!("Failed to connect: {e}")).await;
            return WorkerExit::Failed.code();
        }
    };

    if let Err(e) = session.request_port_forward(descriptor.server_port_to_forward).await {
        error!(tunnel = %descriptor.name, error = %e, "worker setup: port forward refused");
        alert(alerts, &descriptor.name, format!("Failed to bind remote port: {e}")).await;
        session.close().await;
        return WorkerExit::Failed.code();
    }

    info!(
        tunnel = %descriptor.name,
        port = descriptor.server_port_to_forward,
        "worker established tunnel, entering accept loop"
    );

    let exit = accept_loop(descriptor, &mut session, alerts).await;

    session.cancel_port_forward(descriptor.server_port_to_forward).await;
    session.close().await;

    info!(tunnel = %descriptor.name, exit_code = exit.code(), "worker stopping");
    exit.code()
}

async fn accept_loop(
    descriptor: &TunnelDescriptor,
    session: &mut SshSession,
    alerts: Option<&AlertFanoutHandle>,
) -> WorkerExit {
    let mut probe_tick = tokio::time::interval(descriptor.keep_alive_interval.max(Duration::from_secs(1)));
    probe_tick.tick().await; // first tick fires immediately; skip it

    loop {
        tokio::select! {
            channel = session.accept_channel() => {
                if let Some(channel) = channel {
                    let tunnel_name = descriptor.name.clone();
                    let local_host = descriptor.local_host.clone();
                    let local_port = descriptor.local_port;
                    let alerts_clone = alerts.cloned();
                    tokio::spawn(async move {
                        bytepump::run(&tunnel_name, channel, &local_host, local_port, alerts_clone.as_ref()).await;
                    });
                }
                // `None` just means the 10s accept window elapsed with
                // nothing pending; loop back around and check liveness.
            }
            _ = probe_tick.tick() => {
                if probe::probe(&descriptor.name, session).await == ProbeOutcome::Dead {
                    warn!(tunnel = %descriptor.name, "liveness probe failed, tearing down worker");
                    alert(alerts, &descriptor.name, format!("Tunnel {} liveness probe failed", descriptor.name)).await;
                    return WorkerExit::Failed;
                }
            }
            _ = shutdown_requested() => {
                info!(tunnel = %descriptor.name, "worker received shutdown signal, draining");
                return WorkerExit::Clean;
            }
        }
    }
}

/// Resolves once this process receives SIGINT or SIGTERM. The Worker
/// drains (stop probing, cancel the port-forward, close SSH) and exits 0
/// rather than letting the signal kill it mid-forward.
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

async fn alert(alerts: Option<&AlertFanoutHandle>, tunnel_name: &str, message: String) {
    if let Some(alerts) = alerts {
        alerts.send_alert(tunnel_name.to_string(), Some(message)).await;
    }
}
