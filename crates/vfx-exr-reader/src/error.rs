//! Error taxonomy of the reader.
//!
//! Every failure inside the reader is one of the [`ReadError`] variants.
//! Codec-library errors are translated once, in [`ReadError::codec`], so no
//! foreign error type escapes the crate.

use std::io;
use thiserror::Error;

/// Reader error.
#[derive(Debug, Error)]
pub enum ReadError {
    /// Stream ended before a required field.
    #[error("truncated file: {0}")]
    Truncated(String),

    /// Magic mismatch, invariant violation or self-inconsistent header.
    #[error("malformed file: {0}")]
    Malformed(String),

    /// Recognised but unimplemented sub-feature.
    #[error("unsupported format: {0}")]
    UnsupportedFormat(String),

    /// Channel registry exhausted.
    #[error("too many channels: {0}")]
    TooManyChannels(String),

    /// Codec signalled an internal error while decompressing.
    #[error("codec failure: {0}")]
    CodecFailure(String),

    /// Underlying OS read failed.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// The host's abort flag was observed mid-decode.
    #[error("aborted")]
    Aborted,
}

impl ReadError {
    /// Translates a codec-library error.
    pub(crate) fn codec(err: impl std::fmt::Display) -> Self {
        ReadError::CodecFailure(err.to_string())
    }

    /// Maps `UnexpectedEof` to [`ReadError::Truncated`], everything else to `Io`.
    pub(crate) fn from_read(err: io::Error, what: &str) -> Self {
        if err.kind() == io::ErrorKind::UnexpectedEof {
            ReadError::Truncated(what.to_string())
        } else {
            ReadError::Io(err)
        }
    }

    /// `true` for the non-error abort signal.
    pub fn is_abort(&self) -> bool {
        matches!(self, ReadError::Aborted)
    }
}

impl From<vfx_core::Error> for ReadError {
    fn from(err: vfx_core::Error) -> Self {
        ReadError::Malformed(err.to_string())
    }
}

/// Result type for reader operations.
pub type ReadResult<T> = Result<T, ReadError>;
