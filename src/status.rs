//! Process-wide status registry (C7): start counts and timestamps for each
//! tunnel, read by the supervisor's restart loop and the introspection
//! endpoint.
//!
//! A plain `std::sync::Mutex` is enough here: every public method is a leaf
//! operation that never calls back into another `StatusRegistry` method
//! while holding the lock.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{SystemTime, UNIX_EPOCH};

#[derive(Debug, Clone, Copy, Default)]
pub struct TunnelStats {
    pub started_times: u64,
    pub last_start: Option<u64>,
}

#[derive(Debug)]
struct StatusState {
    created_at: u64,
    mac_address: Option<String>,
    tunnels: HashMap<String, TunnelStats>,
}

/// Thread-safe registry shared by the supervisor and the introspection
/// endpoint. Construct once per process and share via `Arc`.
#[derive(Debug)]
pub struct StatusRegistry {
    inner: Mutex<StatusState>,
}

fn now_unix() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

impl StatusRegistry {
    pub fn new(mac_address: Option<String>) -> Self {
        Self {
            inner: Mutex::new(StatusState {
                created_at: now_unix(),
                mac_address,
                tunnels: HashMap::new(),
            }),
        }
    }

    /// Record that a tunnel was (re)started. Monotonically increases
    /// `started_times` and bumps `last_start` to the current time.
    pub fn start_tunnel(&self, tunnel_name: &str) {
        let mut state = self.inner.lock().expect("status registry lock poisoned");
        let stats = state.tunnels.entry(tunnel_name.to_string()).or_default();
        stats.started_times += 1;
        stats.last_start = Some(now_unix());
    }

    pub fn tunnel_stats(&self, tunnel_name: &str) -> Option<TunnelStats> {
        let state = self.inner.lock().expect("status registry lock poisoned");
        state.tunnels.get(tunnel_name).copied()
    }

    pub fn created_at(&self) -> u64 {
        self.inner.lock().expect("status registry lock poisoned").created_at
    }

    /// Snapshot of per-tunnel stats, for serializing into `/status`.
    pub fn snapshot(&self) -> (u64, Option<String>, HashMap<String, TunnelStats>) {
        let state = self.inner.lock().expect("status registry lock poisoned");
        (
            state.created_at,
            state.mac_address.clone(),
            state.tunnels.clone(),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn start_tunnel_is_monotonic() {
        let registry = StatusRegistry::new(Some("aa:bb:cc:dd:ee:ff".to_string()));
        registry.start_tunnel("db");
        registry.start_tunnel("db");
        registry.start_tunnel("db");

        let stats = registry.tunnel_stats("db").unwrap();
        assert_eq!(stats.started_times, 3);
        assert!(stats.last_start.is_some());
    }

    #[test]
    fn unknown_tunnel_has_no_stats() {
        let registry = StatusRegistry::new(None);
        assert!(registry.tunnel_stats("nope").is_none());
    }

    #[test]
    fn tunnels_are_tracked_independently() {
        let registry = StatusRegistry::new(None);
        registry.start_tunnel("a");
        registry.start_tunnel("b");
        registry.start_tunnel("a");

        assert_eq!(registry.tunnel_stats("a").unwrap().started_times, 2);
        assert_eq!(registry.tunnel_stats("b").unwrap().started_times, 1);
    }
}
