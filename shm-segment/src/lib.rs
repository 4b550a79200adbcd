//! Named shared memory segments.
//!
//! A segment is a block of memory with a fixed shape, reachable by every process that knows its
//! name. The only operations are creating one with its full contents, opening one to read a
//! snapshot of those contents, and deleting a name. Contents are never modified in place after
//! creation; to change a segment, delete it and create it anew.
//!
//! Two providers are available. [`PosixShm`] uses `shm_open` and friends, so segments live in
//! the system wide namespace (`/dev/shm` on Linux). [`MemorySegments`] is a table local to the
//! process, for tests and for simulating contention deterministically.
mod memory;
mod posix;


pub use memory::MemorySegments;
pub use posix::PosixShm;

use std::sync::Arc;

/// The longest name a segment may have, in bytes.
///
/// This is the `NAME_MAX` of POSIX less the leading slash that `shm_open` wants.
pub const NAME_MAX: usize = 254;

/// The primitive operations on a namespace of segments.
///
/// Each operation is atomic with regards to other processes sharing the namespace. In particular
/// [`Facility::create`] must fail with [`SegmentError::Conflict`] if, and only if, the name
/// existed at the time of the call, as lock protocols are built on that property.
pub trait Facility: Send + Sync {
    /// Create a segment with exactly `contents`.
    fn create(&self, name: &str, contents: &[u8]) -> Result<(), SegmentError>;
    /// Open a segment and take a snapshot of its contents.
    fn open(&self, name: &str) -> Result<Segment, SegmentError>;
    /// Remove a name. Removing a name that does not exist is not an error.
    fn delete(&self, name: &str) -> Result<(), SegmentError>;
    /// All names currently existing in the namespace, in no particular order.
    fn list(&self) -> Result<Vec<String>, SegmentError>;
}

/// An opened segment.
///
/// The handle holds the contents as they were when it was opened. Other processes may delete and
/// recreate the name in the meantime, the handle does not observe that.
#[derive(Clone, Debug)]
pub struct Segment {
    name: String,
    bytes: Arc<[u8]>,
}

#[derive(Debug, thiserror::Error)]
pub enum SegmentError {
    #[error("shared memory segment `{0}` does not exist")]
    NotFound(String),
    #[error("shared memory segment `{0}` already exists")]
    Conflict(String),
    /// The name exists but has no contents (yet). Creation is not atomic on all providers, a
    /// reader may observe a segment between its creation and its initialization.
    #[error("shared memory segment `{0}` is empty and can not be mapped")]
    Empty(String),
    #[error("invalid shared memory segment name `{name}`: {reason}")]
    InvalidName { name: String, reason: &'static str },
    #[error("{op} failed for `{name}`")]
    Os {
        op: &'static str,
        name: String,
        #[source]
        source: std::io::Error,
    },
}

impl Segment {
    pub fn new(name: impl Into<String>, bytes: impl Into<Arc<[u8]>>) -> Self {
        Segment {
            name: name.into(),
            bytes: bytes.into(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }
}

impl SegmentError {
    /// If this error says the name did not exist.
    pub fn is_not_found(&self) -> bool {
        matches!(self, SegmentError::NotFound(_))
    }

    pub fn is_conflict(&self) -> bool {
        matches!(self, SegmentError::Conflict(_))
    }
}

/// Check a name for use with any provider.
///
/// The restrictions are those of portable `shm_open` names, so that a namespace can be moved
/// between providers without renaming.
pub fn validate_name(name: &str) -> Result<(), SegmentError> {
    let reason = if name.is_empty() {
        "name must not be empty"
    } else if name.contains('/') {
        "name must not contain '/'"
    } else if name.contains('\0') {
        "name must not contain a nul byte"
    } else if name.len() > NAME_MAX {
        "name is longer than NAME_MAX"
    } else {
        return Ok(());
    };

    Err(SegmentError::InvalidName {
        name: name.to_owned(),
        reason,
    })
}
