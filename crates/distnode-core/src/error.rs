//! Caller-visible download errors.
//!
//! Every variant is cloneable: one outcome is shared by all callers attached to
//! the same in-flight object.

use thiserror::Error;

use crate::object::ObjectId;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DownloadError {
    /// The candidate list was empty before probing began.
    #[error("no storage endpoints available to download the data object from")]
    NoEndpointsAvailable,
    /// Every candidate was probed (and fetched where possible) without success.
    #[error("failed to download the object from any available storage provider ({tried} candidate(s) tried)")]
    AllSourcesExhausted { tried: usize },
    /// The upstream stream broke after the response headers were received.
    #[error("object stream interrupted: {0}")]
    StreamInterrupted(String),
    #[error("data object {0} does not exist")]
    ObjectNotFound(ObjectId),
    #[error("data object {0} is not distributed by this node")]
    NotDistributed(ObjectId),
    #[error("directory lookup failed: {0}")]
    Directory(String),
    #[error("local storage: {0}")]
    Storage(String),
    /// The orchestration went away before resolving its completion.
    #[error("download aborted before a source was found")]
    Aborted,
}

impl DownloadError {
    /// True for failures that mean "no source could serve this object".
    pub fn is_exhaustion(&self) -> bool {
        matches!(
            self,
            DownloadError::NoEndpointsAvailable | DownloadError::AllSourcesExhausted { .. }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn messages_distinguish_no_source_from_exhausted() {
        let none = DownloadError::NoEndpointsAvailable.to_string();
        let exhausted = DownloadError::AllSourcesExhausted { tried: 3 }.to_string();
        assert!(none.contains("no storage endpoints"));
        assert!(exhausted.contains("any available storage provider"));
        assert!(exhausted.contains('3'));
        assert_ne!(none, exhausted);
    }

    #[test]
    fn exhaustion_class() {
        assert!(DownloadError::NoEndpointsAvailable.is_exhaustion());
        assert!(DownloadError::AllSourcesExhausted { tried: 1 }.is_exhaustion());
        assert!(!DownloadError::StreamInterrupted("reset".into()).is_exhaustion());
        assert!(!DownloadError::Aborted.is_exhaustion());
    }
}
