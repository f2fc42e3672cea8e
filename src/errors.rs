use thiserror::Error;

/// Errors that can surface past the cache layer to a caller.
///
/// Store-level failures never appear here: the key-value adapter degrades
/// every store error to a miss, so the only errors a caller can observe are
/// upstream failures, explicit throttling, and input rejected before any
/// cache or upstream work.
#[derive(Debug, Error)]
pub enum FetchError {
    /// An upstream call for this key happened too recently and no cached
    /// value exists to serve instead. Distinct from a generic failure so the
    /// caller can choose to poll or back off.
    #[error("too many requests, please try again later")]
    RateLimited,

    /// The upstream fetch (RPC or third-party API) failed. Retryable.
    #[error("upstream fetch failed: {0}")]
    Upstream(String),

    /// Malformed entity identifier, rejected before any cache or upstream
    /// interaction.
    #[error("invalid input: {0}")]
    InvalidInput(String),
}

impl From<anyhow::Error> for FetchError {
    fn from(err: anyhow::Error) -> Self {
        FetchError::Upstream(format!("{err:#}"))
    }
}
