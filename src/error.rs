use thiserror::Error;

/// Result type alias for revtun operations
pub type StunResult<T> = Result<T, StunError>;

/// Error kinds produced across the supervisor, workers and alert fanout.
///
/// Variants line up with the error-kind taxonomy rather than with any one
/// module: `Transport`/`Bind` are retried implicitly by the supervisor's
/// restart cadence, `Probe`/`Forward` never escalate past the component
/// that raised them, `Alert`/`RateLimited` are swallowed unless the caller
/// asked to fail loudly.
#[derive(Error, Debug)]
pub enum StunError {
    /// Malformed or missing configuration keys. Surfaced at startup.
    #[error("configuration error: {0}")]
    Config(String),

    /// Rejected key, encrypted key without passphrase, unknown host key.
    #[error("authentication error: {0}")]
    Auth(String),

    /// TCP unreachable, SSH handshake failure.
    #[error("transport error: {0}")]
    Transport(String),

    /// Remote server refused the port-forward request.
    #[error("bind error: {0}")]
    Bind(String),

    /// Liveness probe tripped.
    #[error("probe failure: {0}")]
    Probe(String),

    /// Per-connection forwarding error, always isolated to one Byte Pump.
    #[error("forward error: {0}")]
    Forward(String),

    /// An AlertSender failed to deliver.
    #[error("alert error: {0}")]
    Alert(String),

    /// An alert was suppressed by the sender's own rate limit.
    #[error("rate limited: {0}")]
    RateLimited(String),

    /// I/O errors from file/process/socket operations.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Generic errors that don't fit another kind.
    #[error("error: {0}")]
    Other(String),
}

impl From<russh::Error> for StunError {
    fn from(err: russh::Error) -> Self {
        StunError::Transport(err.to_string())
    }
}

impl From<russh_keys::Error> for StunError {
    fn from(err: russh_keys::Error) -> Self {
        StunError::Auth(err.to_string())
    }
}

impl From<config::ConfigError> for StunError {
    fn from(err: config::ConfigError) -> Self {
        StunError::Config(err.to_string())
    }
}
