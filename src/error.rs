//! Caller-facing error taxonomy.
//!
//! Backend failures are deliberately not surfaced: store transport errors
//! become "not retrieved", locker errors become "no lock" or "wait failed",
//! and fetcher errors become "no value". The coordinator degrades instead
//! of propagating, so the only errors a caller ever sees are the outcomes
//! below.

/// Boxed error type used at the trait seams (fetchers, store write-backs).
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Ways a proxy call can fail. All of them are retriable; `ThrottledMiss`
/// only after the throttle window has passed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum ProxyError {
    /// The foreground fetch did not finish within the call timeout. The
    /// fetch keeps running and may still populate the cache for later
    /// callers.
    #[error("fetch timed out")]
    Timeout,

    /// Waited for a peer's in-flight fetch, but it did not yield a usable
    /// value before the timeout.
    #[error("peer fetch did not produce a value")]
    PeerWaitFailed,

    /// The cache is empty and the last fetch attempt is too recent to try
    /// again.
    #[error("fetch throttled while cache is empty")]
    ThrottledMiss,

    /// The validator rejected the cached value. A background refresh may
    /// have been scheduled.
    #[error("cached value rejected by validator")]
    InvalidCached,

    /// The fetcher produced no usable value: the validator rejected it, or
    /// the fetch itself failed.
    #[error("fetched value rejected by validator")]
    InvalidFetched,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_is_stable() {
        assert_eq!(ProxyError::Timeout.to_string(), "fetch timed out");
        assert_eq!(
            ProxyError::ThrottledMiss.to_string(),
            "fetch throttled while cache is empty"
        );
    }
}
