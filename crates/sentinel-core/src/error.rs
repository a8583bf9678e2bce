use thiserror::Error;

/// Errors surfaced by the persistence interface (C6). None of these ever
/// escape an engine's `handle_event` — see [`crate::engine::Engine`].
#[derive(Debug, Error)]
pub enum PersistenceError {
    #[error("backing store unreachable: {0}")]
    Unreachable(String),
    #[error("event has no raw_event_id to reference")]
    MissingRawEventId,
}

/// Errors surfaced by an LLM classifier implementation.
#[derive(Debug, Error)]
pub enum ClassifierError {
    #[error("rate limited (retry-after hint: {retry_after_secs:?})")]
    RateLimited { retry_after_secs: Option<u64> },
    #[error("request timed out after {0:?}")]
    Timeout(std::time::Duration),
    #[error("transport error: {0}")]
    Transport(String),
    #[error("classifier returned malformed output: {0}")]
    MalformedOutput(String),
}

/// Fatal errors that propagate out of the event source and terminate
/// ingestion — never silently swallowed, per the spec's error-kind taxonomy.
#[derive(Debug, Error)]
pub enum SourceError {
    #[error("upstream process exited unexpectedly: {0}")]
    ProcessTerminated(String),
    #[error("failed to launch event source process: {0}")]
    SpawnFailed(#[source] std::io::Error),
}
