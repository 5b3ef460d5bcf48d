//! Background task that owns the configured alert senders, so that
//! sending an alert from a Worker or the Supervisor is just dropping a
//! message on a channel and moving on. Rate limiting lives inside each
//! sender (see `smtp.rs`/`http.rs`); this task only fans the call out and
//! logs whatever each sender reports. One broken channel (say, an
//! unreachable SMTP relay) never suppresses delivery through the others.

use tokio::sync::mpsc;
use tracing::{error, warn};

use crate::alerts::AlertSender;
use crate::error::StunError;

struct AlertJob {
    tunnel_name: String,
    message: Option<String>,
}

/// Cheap, cloneable front for the fanout task. Hand this to every Worker
/// and the Supervisor; it is backed by a bounded channel so a stuck
/// sender applies backpressure rather than growing unbounded.
#[derive(Clone)]
pub struct AlertFanoutHandle {
    tx: mpsc::Sender<AlertJob>,
}

impl AlertFanoutHandle {
    /// Queue an alert for delivery. The call returns once the job is
    /// enqueued, not once it is delivered — a slow or down sender never
    /// blocks the Supervisor's restart loop. `message` of `None` lets
    /// each sender fall back to its own template.
    pub async fn send_alert(&self, tunnel_name: String, message: Option<String>) {
        if self.tx.send(AlertJob { tunnel_name, message }).await.is_err() {
            warn!("alert fanout task has shut down; dropping alert");
        }
    }
}

/// Owns the sender list; run via `spawn` on the tokio runtime the
/// supervisor already lives on.
pub struct AlertFanout {
    senders: Vec<Box<dyn AlertSender>>,
}

impl AlertFanout {
    pub fn new(senders: Vec<Box<dyn AlertSender>>) -> Self {
        Self { senders }
    }

    /// Spawn the background dispatch loop and return a handle to feed it.
    pub fn spawn(self) -> AlertFanoutHandle {
        let (tx, mut rx) = mpsc::channel::<AlertJob>(256);

        tokio::spawn(async move {
            while let Some(job) = rx.recv().await {
                for sender in &self.senders {
                    match sender.send(&job.tunnel_name, job.message.as_deref(), false).await {
                        Ok(()) => {}
                        Err(StunError::RateLimited(msg)) => {
                            warn!(tunnel = %job.tunnel_name, reason = %msg, "alert suppressed by rate limit");
                        }
                        Err(e) => {
                            error!(tunnel = %job.tunnel_name, error = %e, "alert delivery failed");
                        }
                    }
                }
            }
        });

        AlertFanoutHandle { tx }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct CountingSender(Arc<AtomicUsize>);

    #[async_trait::async_trait]
    impl AlertSender for CountingSender {
        async fn send(&self, _tunnel_name: &str, _message: Option<&str>, _fail_loudly: bool) -> crate::error::StunResult<()> {
            self.0.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    #[tokio::test]
    async fn fanout_delivers_to_all_senders() {
        let count_a = Arc::new(AtomicUsize::new(0));
        let count_b = Arc::new(AtomicUsize::new(0));
        let fanout = AlertFanout::new(vec![
            Box::new(CountingSender(count_a.clone())),
            Box::new(CountingSender(count_b.clone())),
        ]);
        let handle = fanout.spawn();

        handle.send_alert("db".to_string(), Some("down".to_string())).await;
        // Give the background task a chance to run.
        tokio::time::sleep(std::time::Duration::from_millis(50)).await;

        assert_eq!(count_a.load(Ordering::SeqCst), 1);
        assert_eq!(count_b.load(Ordering::SeqCst), 1);
    }
}
