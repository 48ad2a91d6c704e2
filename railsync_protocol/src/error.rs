// Error types for framing and message decoding.
//
// The two enums map onto the two failure tiers of an inbound stream:
// - `FramingError`: the byte stream itself can no longer be split into
//   units. The connection is untrustworthy and must be closed.
// - `DecodeError`: one unit was extracted but its payload is unusable.
//   `UnknownVerb` still closes the connection (the peer speaks a different
//   protocol or the stream is corrupt); `Malformed` and `InvalidUtf8` only
//   drop the single message.

use thiserror::Error;

/// Failure to extract a unit from the inbound byte stream. Both variants are
/// fatal to the connection; the decoder has already discarded its buffer.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FramingError {
    #[error("framing desynchronized, discarded {discarded} buffered bytes")]
    Desynchronized { discarded: usize },
    #[error("frame of {len} bytes exceeds the maximum message size")]
    TooLarge { len: usize },
}

/// Failure to turn a payload into a `Message`.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DecodeError {
    #[error("unknown verb {0:?}")]
    UnknownVerb(String),
    #[error("malformed {verb} payload: {reason}")]
    Malformed { verb: &'static str, reason: String },
    #[error("payload is not valid UTF-8")]
    InvalidUtf8,
}

impl DecodeError {
    /// Whether the connection that produced this error should be closed.
    pub fn is_fatal(&self) -> bool {
        matches!(self, DecodeError::UnknownVerb(_))
    }

    pub(crate) fn malformed(verb: &'static str, reason: impl Into<String>) -> Self {
        DecodeError::Malformed {
            verb,
            reason: reason.into(),
        }
    }
}
