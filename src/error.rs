use thiserror::Error;

/// Boxed error produced by a wrapped body.
pub(crate) type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Errors surfaced by the compression and decompression bodies.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum Error {
    /// The underlying codec failed, for example on a corrupt or truncated
    /// compressed request body.
    #[error("codec error: {0}")]
    Codec(#[from] std::io::Error),

    /// A pooled transform was used after it was closed. This is a caller bug,
    /// not a recoverable I/O condition.
    #[error("{0}")]
    Closed(&'static str),

    /// The wrapped body produced an error.
    #[error("body error: {0}")]
    Body(#[source] BoxError),
}

impl Error {
    pub(crate) fn body<E: Into<BoxError>>(err: E) -> Self {
        Error::Body(err.into())
    }

    /// Returns `true` when the error marks a contract violation (use of a
    /// closed transform) rather than a codec or body failure.
    pub fn is_contract_violation(&self) -> bool {
        matches!(self, Error::Closed(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_contract_violation_classification() {
        assert!(Error::Closed("write to a closed compressor").is_contract_violation());
        assert!(!Error::Codec(std::io::Error::other("boom")).is_contract_violation());
        assert!(!Error::body("inner").is_contract_violation());
    }

    #[test]
    fn test_display_includes_source() {
        let err = Error::Codec(std::io::Error::other("corrupt deflate stream"));
        assert!(err.to_string().contains("corrupt deflate stream"));
    }
}
