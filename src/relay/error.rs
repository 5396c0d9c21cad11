//! Relay error definitions.

use std::fmt;
use thiserror::Error;

use crate::relay::codec::Encoding;

/// Boxed error returned by response hooks.
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Which side of the exchange an I/O failure happened on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Side {
    /// The upstream server connection.
    Upstream,
    /// The downstream client connection.
    Downstream,
}

impl fmt::Display for Side {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Side::Upstream => f.write_str("upstream"),
            Side::Downstream => f.write_str("downstream"),
        }
    }
}

/// Errors that can occur while relaying a response.
#[derive(Debug, Error)]
pub enum RelayError {
    /// Content-encoding token has no registered codec.
    #[error("unsupported content encoding: {0:?}")]
    UnsupportedEncoding(String),

    /// Chunk-size line is not a valid hexadecimal size.
    #[error("malformed chunk size line: {0:?}")]
    MalformedChunkSize(String),

    /// Chunk declared a size above the configured limit.
    #[error("chunk of {size} bytes exceeds limit of {limit} bytes")]
    ChunkTooLarge { size: u64, limit: u64 },

    /// Reading from upstream or writing to the client failed.
    #[error("{side} transfer failed: {source}")]
    Transfer {
        side: Side,
        #[source]
        source: std::io::Error,
    },

    /// A response hook returned an error or panicked.
    #[error("response hook '{hook}' failed: {reason}")]
    HookFailure { hook: String, reason: String },

    /// Mutation attempted after the response was locked.
    #[error("response is locked, cannot {0}")]
    ResponseLocked(&'static str),

    /// Compressor or decompressor failed on the buffer.
    #[error("{encoding} codec failed: {source}")]
    Codec {
        encoding: Encoding,
        #[source]
        source: std::io::Error,
    },

    /// Upstream response head could not be parsed.
    #[error("malformed upstream response: {0}")]
    MalformedResponse(String),

    /// Session streams were already released.
    #[error("session resources already released")]
    SessionReleased,
}

impl RelayError {
    pub(crate) fn upstream(source: std::io::Error) -> Self {
        RelayError::Transfer { side: Side::Upstream, source }
    }

    pub(crate) fn downstream(source: std::io::Error) -> Self {
        RelayError::Transfer { side: Side::Downstream, source }
    }

    pub(crate) fn unexpected_eof(what: &str) -> Self {
        RelayError::upstream(std::io::Error::new(
            std::io::ErrorKind::UnexpectedEof,
            format!("upstream closed before {what}"),
        ))
    }

    /// Short label used for log fields and metric labels.
    pub fn kind(&self) -> &'static str {
        match self {
            RelayError::UnsupportedEncoding(_) => "unsupported_encoding",
            RelayError::MalformedChunkSize(_) => "malformed_chunk_size",
            RelayError::ChunkTooLarge { .. } => "chunk_too_large",
            RelayError::Transfer { side: Side::Upstream, .. } => "upstream_transfer",
            RelayError::Transfer { side: Side::Downstream, .. } => "downstream_transfer",
            RelayError::HookFailure { .. } => "hook_failure",
            RelayError::ResponseLocked(_) => "response_locked",
            RelayError::Codec { .. } => "codec",
            RelayError::MalformedResponse(_) => "malformed_response",
            RelayError::SessionReleased => "session_released",
        }
    }
}

/// Result type for relay operations.
pub type RelayResult<T> = Result<T, RelayError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transfer_error_names_side() {
        let err = RelayError::downstream(std::io::Error::new(
            std::io::ErrorKind::BrokenPipe,
            "client gone",
        ));
        assert_eq!(err.to_string(), "downstream transfer failed: client gone");
        assert_eq!(err.kind(), "downstream_transfer");
    }

    #[test]
    fn unexpected_eof_is_upstream() {
        let err = RelayError::unexpected_eof("end of body");
        assert!(matches!(err, RelayError::Transfer { side: Side::Upstream, .. }));
    }
}
