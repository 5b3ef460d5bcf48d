//! revtun — a reverse-tunnel supervisor.
//!
//! Maintains outbound SSH connections to a rendezvous server, requests a
//! server-side listening port per tunnel, and forwards every connection
//! accepted on that port to a local service. Failed tunnels are restarted
//! on a fixed poll cadence; liveness is probed continuously; alerts fire
//! through pluggable channels (SMTP, HTTP POST) off the supervision path.
//!
//! Each tunnel runs in its own OS process (a Worker, re-exec'd from this
//! same binary under a hidden subcommand) so that a wedged or crashing SSH
//! session can never take down its siblings or the Supervisor itself.

pub mod alerts;
pub mod bytepump;
pub mod config;
pub mod device;
pub mod error;
pub mod introspection;
pub mod logging;
pub mod probe;
pub mod selftest;
pub mod ssh;
pub mod status;
pub mod supervisor;
pub mod worker;

pub use config::{TopLevelConfig, TunnelDescriptor};
pub use error::{StunError, StunResult};
pub use status::StatusRegistry;
pub use supervisor::Supervisor;
