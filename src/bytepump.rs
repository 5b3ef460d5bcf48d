//! Byte Pump (C1): bidirectional byte copier between one accepted SSH
//! channel and one TCP socket to the local service.
//!
//! `tokio::select!` drives a socket read and the channel's message stream
//! off the same loop. Every exit path — normal EOF, a read error, a
//! connect failure — closes both sides and never propagates past this
//! function; the Worker never learns of a single connection's fate.

use std::net::SocketAddr;
use std::time::Duration;

use russh::ChannelMsg;
use russh::client::Msg;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::time::timeout;
use tracing::{debug, warn};

use crate::alerts::AlertFanoutHandle;

const SOCKET_CONNECT_TIMEOUT: Duration = Duration::from_secs(2);
const READ_CHUNK: usize = 1024;

/// The channel half of a Byte Pump, abstracted so the core copy loop in
/// `pump` can be driven by a fake in tests instead of a live SSH session.
#[async_trait::async_trait]
trait ChannelHalf: Send {
    async fn send_data(&mut self, data: &[u8]) -> bool;
    async fn recv(&mut self) -> Option<ChannelMsg>;
}

#[async_trait::async_trait]
impl ChannelHalf for russh::Channel<Msg> {
    async fn send_data(&mut self, data: &[u8]) -> bool {
        self.data(data).await.is_ok()
    }

    async fn recv(&mut self) -> Option<ChannelMsg> {
        self.wait().await
    }
}

/// Run one Byte Pump to completion. Never returns an error to the caller:
/// all failures are logged (and, for a connect failure, alerted) here.
pub async fn run(
    tunnel_name: &str,
    mut channel: russh::Channel<Msg>,
    local_host: &str,
    local_port: u16,
    alerts: Option<&AlertFanoutHandle>,
) {
    let target = format!("{local_host}:{local_port}");

    let mut socket = match timeout(SOCKET_CONNECT_TIMEOUT, TcpStream::connect(&target)).await {
        Ok(Ok(socket)) => socket,
        Ok(Err(e)) => {
            warn!(tunnel = tunnel_name, target = %target, error = %e, "forwarding connect failed");
            if let Some(alerts) = alerts {
                let message = format!("Failed to establish connection to {target} with error: {e}");
                alerts.send_alert(tunnel_name.to_string(), Some(message)).await;
            }
            let _ = channel.close().await;
            return;
        }
        Err(_) => {
            warn!(tunnel = tunnel_name, target = %target, "forwarding connect timed out after 2s");
            if let Some(alerts) = alerts {
                let message = format!("Failed to establish connection to {target}: connect timed out");
                alerts.send_alert(tunnel_name.to_string(), Some(message)).await;
            }
            let _ = channel.close().await;
            return;
        }
    };

    let peer = socket.peer_addr().ok();
    debug!(tunnel = tunnel_name, ?peer, target = %target, "byte pump connected");

    pump(&mut channel, &mut socket).await;

    let _ = channel.close().await;
    let _ = socket.shutdown().await;
    debug!(tunnel = tunnel_name, ?peer, "byte pump closed");
}

async fn pump(channel: &mut impl ChannelHalf, socket: &mut TcpStream) {
    let mut buf = [0u8; READ_CHUNK];
    loop {
        tokio::select! {
            read = socket.read(&mut buf) => {
                match read {
                    Ok(0) => break,
                    Ok(n) => {
                        if !channel.send_data(&buf[..n]).await {
                            break;
                        }
                    }
                    Err(_) => break,
                }
            }
            msg = channel.recv() => {
                match msg {
                    Some(ChannelMsg::Data { data }) => {
                        if socket.write_all(&data).await.is_err() {
                            break;
                        }
                    }
                    Some(ChannelMsg::Eof) | Some(ChannelMsg::Close) | None => break,
                    Some(_) => continue,
                }
            }
        }
    }
}

/// Addressable target for logging/testing without dragging a live channel
/// through assertions.
pub fn describe_target(local_host: &str, local_port: u16) -> SocketAddr {
    format!("{local_host}:{local_port}")
        .parse()
        .unwrap_or_else(|_| SocketAddr::from(([127, 0, 0, 1], local_port)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};
    use tokio::net::TcpListener;
    use tokio::sync::mpsc;

    struct FakeChannel {
        inbound: mpsc::Receiver<ChannelMsg>,
        sent: Arc<Mutex<Vec<u8>>>,
    }

    #[async_trait::async_trait]
    impl ChannelHalf for FakeChannel {
        async fn send_data(&mut self, data: &[u8]) -> bool {
            self.sent.lock().unwrap().extend_from_slice(data);
            true
        }

        async fn recv(&mut self) -> Option<ChannelMsg> {
            self.inbound.recv().await
        }
    }

    #[tokio::test]
    async fn connect_failure_path_does_not_panic() {
        // Pick a port nothing is listening on.
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);

        let target = describe_target("127.0.0.1", port);
        assert_eq!(target.port(), port);

        let result = timeout(
            SOCKET_CONNECT_TIMEOUT + Duration::from_millis(500),
            TcpStream::connect(format!("127.0.0.1:{port}")),
        )
        .await;
        assert!(result.unwrap().is_err());
    }

    /// Socket-side EOF must end the pump loop and must have forwarded
    /// everything written before the EOF.
    #[tokio::test]
    async fn pump_forwards_bytes_then_stops_on_socket_eof() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let mut client = TcpStream::connect(addr).await.unwrap();
        let (mut server_side, _) = listener.accept().await.unwrap();

        client.write_all(b"hello").await.unwrap();
        client.shutdown().await.unwrap();

        let sent = Arc::new(Mutex::new(Vec::new()));
        // Sender is kept alive but never sends, so the channel-recv branch
        // of the select never resolves first; only the socket EOF can end
        // the loop.
        let (_inbound_tx, inbound_rx) = mpsc::channel(1);
        let mut fake = FakeChannel {
            inbound: inbound_rx,
            sent: sent.clone(),
        };

        pump(&mut fake, &mut server_side).await;

        assert_eq!(sent.lock().unwrap().as_slice(), b"hello");
    }

    /// The channel reporting EOF must end the pump loop even with the
    /// socket still open.
    #[tokio::test]
    async fn pump_stops_when_channel_reports_eof() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let _client = TcpStream::connect(addr).await.unwrap();
        let (mut server_side, _) = listener.accept().await.unwrap();

        let (inbound_tx, inbound_rx) = mpsc::channel(1);
        inbound_tx.send(ChannelMsg::Eof).await.unwrap();
        let mut fake = FakeChannel {
            inbound: inbound_rx,
            sent: Arc::new(Mutex::new(Vec::new())),
        };

        pump(&mut fake, &mut server_side).await;
    }
}
