//! Thin async SSH client wrapper around `russh`, exposing exactly the
//! operations the Tunnel Worker needs: connect with a strict host-key
//! policy, request a remote port-forward, accept server-initiated
//! forwarded channels, and the three liveness-probe operations.
//!
//! A synchronous, blocking-`accept()` shape has no one-to-one analog in
//! russh's callback-driven `Handler`, so accepted channels are funneled
//! through an `mpsc` queue that `accept_channel` drains with a timeout.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use russh::client::{self, Msg};
use russh::{Channel, ChannelId};
use russh_keys::key::PublicKey;
use tokio::sync::mpsc;
use tokio::time::timeout;

use crate::config::TunnelDescriptor;
use crate::error::{StunError, StunResult};

const SSH_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);
const ACCEPT_TIMEOUT: Duration = Duration::from_secs(10);
pub const PROBE_SESSION_TIMEOUT: Duration = Duration::from_secs(30);

/// Queue depth for inbound forwarded channels. The accept loop drains this
/// as fast as it spawns Byte Pumps; a small buffer just avoids momentarily
/// stalling the client's event loop on a burst of simultaneous connects.
const ACCEPT_QUEUE_DEPTH: usize = 32;

/// `client::Handler` that enforces the reject-on-unknown-host-key policy
/// and relays server-initiated `forwarded-tcpip` channels to the Worker's
/// accept loop.
struct TunnelClientHandler {
    trusted_key: Option<PublicKey>,
    accepted: mpsc::Sender<Channel<Msg>>,
}

impl client::Handler for TunnelClientHandler {
    type Error = russh::Error;

    async fn check_server_key(&mut self, server_public_key: &PublicKey) -> Result<bool, Self::Error> {
        match &self.trusted_key {
            // No trust-on-first-use: an unconfigured server_key always rejects.
            None => Ok(false),
            Some(trusted) => Ok(trusted == server_public_key),
        }
    }

    async fn server_channel_open_forwarded_tcpip(
        &mut self,
        channel: Channel<Msg>,
        _connected_address: &str,
        _connected_port: u32,
        _originator_address: &str,
        _originator_port: u32,
        _session: &mut client::Session,
    ) -> Result<(), Self::Error> {
        // Drop the channel silently if the Worker has already stopped
        // draining the queue (e.g. mid-shutdown); the session is on its
        // way down regardless.
        let _ = self.accepted.send(channel).await;
        Ok(())
    }

    async fn channel_close(
        &mut self,
        _channel: ChannelId,
        session: &mut client::Session,
    ) -> Result<(), Self::Error> {
        let _ = session;
        Ok(())
    }
}

/// A connected SSH session with an active remote port-forward request.
pub struct SshSession {
    handle: client::Handle<TunnelClientHandler>,
    accepted: mpsc::Receiver<Channel<Msg>>,
}

fn load_client_key(path: &Path) -> StunResult<russh_keys::key::KeyPair> {
    russh_keys::load_secret_key(path, None)
        .map_err(|e| StunError::Auth(format!("failed to load client key {}: {e}", path.display())))
}

fn load_trusted_host_key(path: &Path) -> StunResult<PublicKey> {
    let contents = std::fs::read_to_string(path)
        .map_err(|e| StunError::Config(format!("cannot read server_key {}: {e}", path.display())))?;
    // known-hosts-style files carry "host key-type base64key [comment]";
    // take the last line with content and parse its base64 blob.
    let line = contents
        .lines()
        .rev()
        .find(|l| !l.trim().is_empty())
        .ok_or_else(|| StunError::Config(format!("server_key {} is empty", path.display())))?;
    let fields: Vec<&str> = line.split_whitespace().collect();
    let encoded = fields
        .get(1)
        .or_else(|| fields.first())
        .ok_or_else(|| StunError::Config(format!("server_key {} is malformed", path.display())))?;
    russh_keys::parse_public_key_base64(encoded)
        .map_err(|e| StunError::Config(format!("server_key {} is not a valid public key: {e}", path.display())))
}

impl SshSession {
    /// Connect to the rendezvous server with `look_for_keys=false`,
    /// `allow_agent=false`, explicit key file, 10s connect timeout, and a
    /// reject-on-unknown host key policy.
    pub async fn connect(descriptor: &TunnelDescriptor) -> StunResult<Self> {
        let trusted_key = descriptor
            .server_key
            .as_deref()
            .map(load_trusted_host_key)
            .transpose()?;

        let key_pair = load_client_key(&descriptor.client_key_path)?;

        let (tx, rx) = mpsc::channel(ACCEPT_QUEUE_DEPTH);
        let handler = TunnelClientHandler {
            trusted_key,
            accepted: tx,
        };

        let config = Arc::new(client::Config::default());
        let addr = (descriptor.server_host.as_str(), descriptor.server_port);

        let mut handle = timeout(SSH_CONNECT_TIMEOUT, client::connect(config, addr, handler))
            .await
            .map_err(|_| StunError::Transport("SSH connect timed out after 10s".to_string()))?
            .map_err(|e| StunError::Transport(format!("SSH connect failed: {e}")))?;

        let authenticated = handle
            .authenticate_publickey(&descriptor.username, Arc::new(key_pair))
            .await
            .map_err(|e| StunError::Auth(format!("publickey authentication failed: {e}")))?;
        if !authenticated {
            return Err(StunError::Auth(format!(
                "server rejected the private key for user {}",
                descriptor.username
            )));
        }

        Ok(SshSession { handle, accepted: rx })
    }

    /// Ask the server to forward the data it receives on
    /// `server_port_to_forward` back through this session.
    pub async fn request_port_forward(&mut self, port: u16) -> StunResult<()> {
        let granted = self
            .handle
            .tcpip_forward("", port as u32)
            .await
            .map_err(|e| StunError::Bind(format!("remote port-forward request failed: {e}")))?;
        if !granted {
            return Err(StunError::Bind(format!(
                "server refused to bind the requested port {port}"
            )));
        }
        Ok(())
    }

    pub async fn cancel_port_forward(&mut self, port: u16) {
        let _ = self.handle.cancel_tcpip_forward("", port as u32).await;
    }

    /// Block up to 10s for the next accepted channel. `None` means the
    /// timeout elapsed with nothing pending — the caller should re-check
    /// its own failed flag and loop.
    pub async fn accept_channel(&mut self) -> Option<Channel<Msg>> {
        match timeout(ACCEPT_TIMEOUT, self.accepted.recv()).await {
            Ok(Some(channel)) => Some(channel),
            Ok(None) | Err(_) => None,
        }
    }

    /// Liveness probe step (i): the cheapest possible round trip — a
    /// global `keepalive@openssh.com` request, not a channel open. Opening
    /// a throwaway session channel here would leak one channel on the
    /// server every probe tick for the life of the tunnel; this sends a
    /// global request and waits for the reply instead.
    pub async fn send_ignore(&mut self) -> StunResult<()> {
        self.handle
            .send_keepalive(true)
            .await
            .map_err(|e| StunError::Probe(format!("keepalive failed: {e}")))
    }

    /// Liveness probe step (ii): ask the transport directly whether it
    /// still considers itself connected. TCP can stay "ESTABLISHED" long
    /// after the peer vanished, so this is deliberately a cheap,
    /// best-effort signal rather than the final word.
    pub fn is_active(&self) -> bool {
        !self.handle.is_closed()
    }

    /// Liveness probe step (iii), the strongest signal: actually open and
    /// immediately close a fresh session channel, bounded by `bound`.
    pub async fn probe_open_session(&mut self, bound: Duration) -> StunResult<()> {
        let channel = timeout(bound, self.handle.channel_open_session())
            .await
            .map_err(|_| StunError::Probe("probe session open timed out".to_string()))?
            .map_err(|e| StunError::Probe(format!("failed to open probe session: {e}")))?;
        channel
            .close()
            .await
            .map_err(|e| StunError::Probe(format!("failed to close probe session: {e}")))?;
        Ok(())
    }

    pub async fn close(mut self) {
        let _ = self
            .handle
            .disconnect(russh::Disconnect::ByApplication, "", "en")
            .await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn malformed_known_hosts_file_is_a_config_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("server_key");
        std::fs::write(&path, "   \n\n").unwrap();
        let err = load_trusted_host_key(&path).unwrap_err();
        assert!(matches!(err, StunError::Config(_)));
    }

    #[test]
    fn missing_client_key_is_an_auth_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nope");
        let err = load_client_key(&path).unwrap_err();
        assert!(matches!(err, StunError::Auth(_)));
    }
}
