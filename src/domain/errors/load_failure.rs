//! Failure reasons delivered to waiters.

use thiserror::Error;

/// Why a queued request could not produce a payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Error)]
pub enum LoadFailure {
    /// The network collaborator reported failure for the resource.
    #[error("fetch failed")]
    FetchFailed,

    /// The decode collaborator reported failure for the signature.
    #[error("decode failed")]
    DecodeFailed,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_failure_reasons() {
        assert_eq!(LoadFailure::FetchFailed.to_string(), "fetch failed");
        assert_eq!(LoadFailure::DecodeFailed.to_string(), "decode failed");
    }
}
