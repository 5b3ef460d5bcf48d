//! Liveness Prober (C2): the three-step escalating check the Worker runs
//! on an interval to decide whether its SSH session has actually died.
//!
//! A cheap keepalive, a transport-level `is_active` check, and finally
//! opening-and-closing a real session channel — each step only runs if
//! the previous one passed, and the last one is bounded so a half-dead
//! peer cannot wedge the Worker forever.

use std::time::Duration;

use tracing::{debug, warn};

use crate::error::StunResult;
use crate::ssh::{PROBE_SESSION_TIMEOUT, SshSession};

/// Outcome of one probe pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProbeOutcome {
    Alive,
    Dead,
}

/// Run the three escalating checks in order, stopping at the first
/// failure. Returns `Dead` on any failure; never returns an `Err` — a
/// failed probe is data, not an error condition.
pub async fn probe(tunnel_name: &str, session: &mut SshSession) -> ProbeOutcome {
    if let Err(e) = session.send_ignore().await {
        debug!(tunnel = tunnel_name, error = %e, "probe: keepalive failed");
        return ProbeOutcome::Dead;
    }

    if !session.is_active() {
        debug!(tunnel = tunnel_name, "probe: transport reports inactive");
        return ProbeOutcome::Dead;
    }

    match probe_session_open(session, PROBE_SESSION_TIMEOUT).await {
        Ok(()) => ProbeOutcome::Alive,
        Err(e) => {
            warn!(tunnel = tunnel_name, error = %e, "probe: session open/close failed");
            ProbeOutcome::Dead
        }
    }
}

async fn probe_session_open(session: &mut SshSession, bound: Duration) -> StunResult<()> {
    session.probe_open_session(bound).await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn outcomes_are_comparable() {
        assert_eq!(ProbeOutcome::Alive, ProbeOutcome::Alive);
        assert_ne!(ProbeOutcome::Alive, ProbeOutcome::Dead);
    }
}
