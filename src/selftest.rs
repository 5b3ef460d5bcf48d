//! Self-test CLI subcommands: `--test_smtp`, `--test_http`,
//! `--test_connections`, `--test_tunnels`. Each check runs with
//! `fail_loudly=true` so the first failure is surfaced directly, rather
//! than swallowed the way the supervisor's own alert path does.

use std::net::{TcpStream, ToSocketAddrs};
use std::time::Duration;

use tracing::{error, info};

use crate::alerts::{AlertSender, HttpAlertSender, SmtpAlertSender};
use crate::config::{HttpAlertConfig, SmtpAlertConfig, TunnelDescriptor};
use crate::ssh::SshSession;

const CONNECTION_PROBE_TIMEOUT: Duration = Duration::from_secs(5);

pub const EXIT_SMTP_FAILED: i32 = 1;
pub const EXIT_HTTP_FAILED: i32 = 2;
pub const EXIT_CONNECTIONS_FAILED: i32 = 3;
pub const EXIT_TUNNELS_FAILED: i32 = 4;

pub async fn test_smtp(config: SmtpAlertConfig, tunnel_manager_id: &str) -> i32 {
    let sender = SmtpAlertSender::new(config, tunnel_manager_id.to_string());
    match sender
        .send(
            tunnel_manager_id,
            Some("This is a test alert from the self-test subcommand."),
            true,
        )
        .await
    {
        Ok(()) => {
            info!("smtp self-test succeeded");
            0
        }
        Err(e) => {
            error!(error = %e, "smtp self-test failed");
            EXIT_SMTP_FAILED
        }
    }
}

pub async fn test_http(config: HttpAlertConfig, tunnel_manager_id: &str) -> i32 {
    let sender = HttpAlertSender::new(config, tunnel_manager_id.to_string());
    match sender
        .send(
            tunnel_manager_id,
            Some("This is a test alert from the self-test subcommand."),
            true,
        )
        .await
    {
        Ok(()) => {
            info!("http self-test succeeded");
            0
        }
        Err(e) => {
            error!(error = %e, "http self-test failed");
            EXIT_HTTP_FAILED
        }
    }
}

/// Probe every descriptor's local service with a live TCP connect.
pub fn test_connections(descriptors: &[TunnelDescriptor]) -> i32 {
    let mut all_ok = true;
    for descriptor in descriptors {
        let ok = probe_tcp(&descriptor.local_host, descriptor.local_port);
        if ok {
            info!(tunnel = %descriptor.name, "connection self-test passed");
        } else {
            error!(
                tunnel = %descriptor.name,
                target = %format!("{}:{}", descriptor.local_host, descriptor.local_port),
                "connection self-test failed"
            );
            all_ok = false;
        }
    }
    if all_ok { 0 } else { EXIT_CONNECTIONS_FAILED }
}

fn probe_tcp(host: &str, port: u16) -> bool {
    let Ok(mut addrs) = (host, port).to_socket_addrs() else {
        return false;
    };
    let Some(addr) = addrs.next() else {
        return false;
    };
    TcpStream::connect_timeout(&addr, CONNECTION_PROBE_TIMEOUT).is_ok()
}

/// Attempt a real SSH connect and port-forward request (never an accept
/// loop) for every descriptor, then immediately tear it down. Any
/// connect, auth, or bind failure is reported uniformly as a tunnel
/// self-test failure — the legacy distinction between where exactly a
/// `BadHostKeyException` surfaces doesn't change the outcome here.
pub async fn test_tunnels(descriptors: &[TunnelDescriptor]) -> i32 {
    let mut all_ok = true;
    for descriptor in descriptors {
        match SshSession::connect(descriptor).await {
            Ok(mut session) => match session.request_port_forward(descriptor.server_port_to_forward).await {
                Ok(()) => {
                    info!(tunnel = %descriptor.name, "tunnel self-test passed");
                    session.cancel_port_forward(descriptor.server_port_to_forward).await;
                    session.close().await;
                }
                Err(e) => {
                    error!(tunnel = %descriptor.name, error = %e, "tunnel self-test: port forward failed");
                    session.close().await;
                    all_ok = false;
                }
            },
            Err(e) => {
                error!(tunnel = %descriptor.name, error = %e, "tunnel self-test: connect failed");
                all_ok = false;
            }
        }
    }
    if all_ok { 0 } else { EXIT_TUNNELS_FAILED }
}
