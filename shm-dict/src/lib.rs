//! Dictionaries and lists that live in named shared memory segments.
//!
//! Any process that opens a container by the same name in the same [`Namespace`] observes and
//! modifies the same data, there is no broker. A container `name` consists of:
//!
//! - `<name>_keys`, the list of keys;
//! - `<name>_val_<key>`, one segment per key holding its value;
//! - `<name>_lock`, existing while a writer modifies the container.
//!
//! Values that are maps or lists are written as containers of their own, named
//! `<name>_<uuid>`, and the value slot refers to them as `dict:<sub>` or `list:<sub>`. Every
//! level of nesting makes segment names 33 bytes longer. With the default prefix a container
//! with a short name holds about seven levels. Deeper values fail to write with an invalid name
//! error, and the previous value is kept.
//!
//! ## Consistency
//!
//! Writers are serialized by the lock. Readers wait until no lock exists, then read without
//! holding anything. A reader may thus observe the keys of one write and a value of the next.
//! Every read reloads the keys and reopens the value segment, stale handles are never used.
//!
//! A writer that dies after writing some value segments but before writing the keys leaves
//! orphaned segments, and one that dies while holding the lock leaves the container unwritable.
//! There is no automatic recovery, overwrite the container with [`ShDict::create`] or
//! [`ShList::create`].
//!
//! Replacing or deleting a key whose value is a nested container does not delete that
//! container, another process may still be reading it. Its segments stay until the parent is
//! overwritten. A write that fails with an error removes what it wrote before releasing the lock.
#[cfg(test)]
mod tests;

mod dict;
mod error;
mod list;
pub mod lock;
mod namespace;
mod slots;
mod structure;
mod value;

pub use dict::{Items, ShDict};
pub use error::{Error, Result};
pub use list::{Iter, ShList};
pub use namespace::{LockPolicy, Namespace, NamespaceOptions};
pub use value::{Encoded, Item, Kind, Scalar, Value};

pub use shm_segment::{Facility, MemorySegments, PosixShm, SegmentError};
