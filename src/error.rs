use thiserror::Error;

/// Errors surfaced by [`crate::client::AdmissionClient`] and
/// [`crate::housekeeper::Housekeeper`].
///
/// Backend-specific failures (connection refused, command error, pool
/// exhaustion) are collapsed into [`BouncerError::Transport`]; callers that
/// need the underlying cause can match on the message or enable `tracing`
/// output, which logs the original error before it's wrapped.
#[derive(Debug, Error)]
pub enum BouncerError {
    /// The backend could not be reached, or a command/script round trip
    /// failed for a reason unrelated to the bouncer's own state machine.
    #[error("backend transport error: {0}")]
    Transport(String),

    /// A script this client depends on is not loaded on the backend and
    /// reloading it did not help. Only produced by the Redis backend; the
    /// local backend has no script cache to miss.
    #[error("required script is not loaded on the backend")]
    ScriptMissing,

    /// The backend is missing the global sync keys (`store_capacity`,
    /// `queue_enabled`, ...), generally because of a flush or a fresh
    /// deployment. The client reseeds configuration and retries once
    /// before surfacing this.
    #[error("backend is missing global configuration keys")]
    Uninitialized,

    /// A caller passed an argument that violates a precondition of the
    /// operation (empty ID, non-positive `n` to `promote_n`, and so on).
    #[error("invalid argument: {0}")]
    InvalidArgument(String),
}

pub type Result<T> = std::result::Result<T, BouncerError>;
