//! Error types for buffer handles.

use std::io;
use thiserror::Error;

/// Result type alias using the crate's [`Error`].
pub type Result<T> = std::result::Result<T, Error>;

/// Failure reported by the remote buffer service or the channel carrying
/// calls to it. `code` is a positive errno value.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{message} (errno {code})")]
pub struct RemoteError {
    pub code: i32,
    pub message: String,
}

impl RemoteError {
    pub fn new(code: i32, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }
}

/// Main error type for buffer handle operations.
#[derive(Error, Debug)]
pub enum Error {
    /// The channel or the service behind it failed the call.
    #[error("remote call failed: {0}")]
    RemoteCallFailed(#[from] RemoteError),

    /// The service answered with a negative buffer id.
    #[error("received an invalid buffer id: {0}")]
    InvalidId(i32),

    /// A shared-memory region could not be imported from its handle.
    #[error("failed to import {what}: {source}")]
    ImportFailed {
        what: &'static str,
        #[source]
        source: io::Error,
    },

    /// The metadata region cannot hold the fixed header.
    #[error("metadata buffer too small: {size} < {required}")]
    MetadataTooSmall { size: usize, required: usize },

    /// Requested user metadata does not fit the negotiated area.
    #[error("user metadata too big: {requested}, maximum: {max}")]
    MetadataTooLarge { requested: usize, max: usize },

    /// The buffer carries no user metadata area.
    #[error("buffer doesn't support custom metadata")]
    UnsupportedMetadata,

    /// The acquire or release fence was missing from the description.
    #[error("failed to import shared fences")]
    InvalidFences,

    /// The fence multiplexer refused a new fence.
    #[error("failed to add fence into the shared fence set: {0}")]
    FenceRegistrationFailed(#[source] io::Error),

    /// Mapping (or unmapping) a region for CPU access failed.
    #[error("lock failed: {0}")]
    LockFailed(#[source] io::Error),

    /// The operation needs a successfully imported buffer.
    #[error("buffer has not been imported")]
    NotImported,

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

fn os_errno(err: &io::Error, fallback: i32) -> i32 {
    -err.raw_os_error().unwrap_or(fallback)
}

impl Error {
    /// The negative errno value this error maps to.
    pub fn errno(&self) -> i32 {
        match self {
            Error::RemoteCallFailed(e) => -e.code,
            Error::InvalidId(_) | Error::InvalidFences => -libc::EIO,
            Error::ImportFailed { source, .. } => os_errno(source, libc::EINVAL),
            Error::MetadataTooSmall { .. } => -libc::ENOMEM,
            Error::MetadataTooLarge { .. } => -libc::E2BIG,
            Error::UnsupportedMetadata => -libc::EINVAL,
            Error::FenceRegistrationFailed(e) | Error::LockFailed(e) | Error::Io(e) => {
                os_errno(e, libc::EIO)
            }
            Error::NotImported => -libc::ENODEV,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn errno_codes() {
        assert_eq!(Error::InvalidId(-1).errno(), -libc::EIO);
        assert_eq!(Error::InvalidFences.errno(), -libc::EIO);
        assert_eq!(
            Error::MetadataTooSmall { size: 1, required: 32 }.errno(),
            -libc::ENOMEM
        );
        assert_eq!(
            Error::MetadataTooLarge { requested: 9, max: 8 }.errno(),
            -libc::E2BIG
        );
        assert_eq!(Error::UnsupportedMetadata.errno(), -libc::EINVAL);
        assert_eq!(
            Error::from(RemoteError::new(libc::EPIPE, "hung up")).errno(),
            -libc::EPIPE
        );
        assert_eq!(
            Error::LockFailed(io::Error::from_raw_os_error(libc::EBUSY)).errno(),
            -libc::EBUSY
        );
    }
}
