//! Alert Fanout (C4/C5): decoupled, rate-limited alert delivery so a slow
//! or down SMTP/HTTP endpoint never blocks the supervisor's restart loop.

mod fanout;
mod http;
mod ratelimit;
mod smtp;

pub use fanout::{AlertFanout, AlertFanoutHandle};
pub use http::HttpAlertSender;
pub use smtp::SmtpAlertSender;

use crate::error::StunResult;

/// One alert delivery channel. Implementors own their own transport, their
/// own rate-limit table, and their own default message template; callers
/// only have to name the tunnel.
///
/// `message` is `None` when the caller wants the sender's own template
/// (naming the tunnel and the configured tunnel manager id). `fail_loudly`
/// does not change delivery behavior — it only tells the caller whether
/// to propagate a returned error or swallow it; self-test subcommands
/// call `send` directly with `fail_loudly=true` to get a real exit code.
#[async_trait::async_trait]
pub trait AlertSender: Send + Sync {
    async fn send(&self, tunnel_name: &str, message: Option<&str>, fail_loudly: bool) -> StunResult<()>;
}
