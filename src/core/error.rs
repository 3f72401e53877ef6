use thiserror::Error;

/// Errors surfaced by the gateway core.
///
/// Every variant maps onto the `success = false` / `message` fields of the
/// IPC result envelope; nothing here is allowed to crash the process.
/// Per-target failover failures are handled inside the dispatcher and are
/// never surfaced individually, only as [`GatewayError::UpstreamExhausted`].
#[derive(Debug, Error)]
pub enum GatewayError {
    /// Unknown provider, model, alias, stream, or connection.
    #[error("not found: {0}")]
    NotFound(String),

    /// Malformed or rejected input (empty targets, alias not listed, bad add).
    #[error("invalid request: {0}")]
    Validation(String),

    /// Alias has no route rule.
    #[error("unresolved alias '{0}': no route rule configured")]
    Unresolved(String),

    /// Every failover target failed; carries the last underlying cause.
    #[error("all {attempts} target(s) exhausted for alias '{alias}': {last_error}")]
    UpstreamExhausted {
        alias: String,
        attempts: usize,
        last_error: String,
    },

    /// The operation raced with a cancel.
    #[error("cancelled: {0}")]
    Cancelled(String),

    /// External collaborator or provider-client failure, opaque to the core.
    #[error("transport failure: {0}")]
    Transport(String),
}

pub type Result<T> = std::result::Result<T, GatewayError>;
