use shm_segment::SegmentError;

use crate::Kind;

pub type Result<T, E = Error> = core::result::Result<T, E>;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Read admission or lock acquisition ran out of attempts.
    ///
    /// Another process holds the lock of the container, or died while holding it. Nothing is
    /// retried beyond the configured budget. In the latter case the lock segment must be removed
    /// by hand, or the container overwritten.
    #[error("gave up waiting for the lock of `{name}`")]
    LockTimeout { name: String },
    #[error("key `{0}` not found")]
    KeyNotFound(String),
    #[error("invalid container name `{name}`: {reason}")]
    InvalidName { name: String, reason: &'static str },
    #[error("segment `{segment}` is corrupt: {reason}")]
    Corrupt {
        segment: String,
        reason: &'static str,
    },
    #[error("`{name}` is not a {expected}")]
    Kind { name: String, expected: Kind },
    #[error("container `{0}` contains itself")]
    Cycle(String),
    #[error("bad configuration in `{var}`: {reason}")]
    Config { var: &'static str, reason: String },
    /// The segment facility failed.
    ///
    /// A [`SegmentError::Conflict`] here means some writer did not respect the lock.
    #[error(transparent)]
    Segment(#[from] SegmentError),
}

impl Error {
    pub fn is_lock_timeout(&self) -> bool {
        matches!(self, Error::LockTimeout { .. })
    }

    pub fn is_key_not_found(&self) -> bool {
        matches!(self, Error::KeyNotFound(_))
    }
}
