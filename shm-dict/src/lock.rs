//! A mutual exclusion lock represented by the existence of a segment.
//!
//! The lock of container `name` is the segment `<name>_lock`. Taking it means creating that
//! segment, which the facility guarantees to succeed for at most one caller. Readers do not take
//! anything, they only wait until no segment of that name exists.
//!
//! Nothing is blocking in the OS sense. Waiting polls with a fixed sleep, for a bounded number of
//! attempts as configured in the [`LockPolicy`](crate::LockPolicy) of the namespace.
use shm_segment::SegmentError;

use crate::{Error, Namespace, Result, Scalar};

pub fn lock_name(name: &str) -> String {
    format!("{name}_lock")
}

/// If no writer holds the lock of `name` right now.
///
/// A lock segment that exists but is empty, i.e. it is being created, does not count as held.
pub fn can_read(ns: &Namespace, name: &str) -> Result<bool> {
    match ns.open(&lock_name(name)) {
        Ok(_) => Ok(false),
        Err(SegmentError::NotFound(_) | SegmentError::Empty(_)) => Ok(true),
        Err(err) => Err(err.into()),
    }
}

/// Make one attempt at taking the lock of `name`.
///
/// On success the caller owns the lock and must [`unlock`] it. Prefer [`lock_for_writing`],
/// which does so automatically.
pub fn try_lock(ns: &Namespace, name: &str) -> Result<bool> {
    match ns.create(&lock_name(name), &[Scalar::Int(1)]) {
        Ok(()) => Ok(true),
        Err(SegmentError::Conflict(_)) => Ok(false),
        Err(err) => Err(err.into()),
    }
}

/// Remove the lock of `name`, whoever holds it.
pub fn unlock(ns: &Namespace, name: &str) -> Result<()> {
    ns.delete(&lock_name(name))?;
    Ok(())
}

/// Wait until no writer holds the lock of `name`.
pub fn wait_readable(ns: &Namespace, name: &str) -> Result<()> {
    let policy = ns.options().lock;

    for attempt in 0..policy.attempts {
        if can_read(ns, name)? {
            return Ok(());
        }

        tracing::trace!(container = name, attempt, "waiting for writer");
        std::thread::sleep(policy.interval);
    }

    tracing::warn!(container = name, "cannot read, lock is held");
    Err(Error::LockTimeout {
        name: name.to_owned(),
    })
}

/// Take the lock of `name`, waiting for the current holder if necessary.
///
/// The lock is released when the guard is dropped, in particular also when the guarded operation
/// returns early with an error.
pub fn lock_for_writing(ns: &Namespace, name: &str) -> Result<WriteGuard> {
    let policy = ns.options().lock;

    for attempt in 0..policy.attempts {
        if try_lock(ns, name)? {
            tracing::debug!(container = name, attempt, "took write lock");
            return Ok(WriteGuard {
                ns: ns.clone(),
                name: name.to_owned(),
            });
        }

        // Not ours, so not ours to remove either.
        tracing::trace!(container = name, attempt, "lock is held");
        std::thread::sleep(policy.interval);
    }

    tracing::warn!(container = name, "cannot write, lock is held");
    Err(Error::LockTimeout {
        name: name.to_owned(),
    })
}

/// Proof of holding the write lock of a container.
#[must_use = "the lock is released when the guard is dropped"]
pub struct WriteGuard {
    ns: Namespace,
    name: String,
}

impl WriteGuard {
    pub fn name(&self) -> &str {
        &self.name
    }
}

impl Drop for WriteGuard {
    fn drop(&mut self) {
        match unlock(&self.ns, &self.name) {
            Ok(()) => tracing::debug!(container = %self.name, "released write lock"),
            // Other processes will time out on the container until it is overwritten.
            Err(err) => {
                tracing::warn!(container = %self.name, %err, "failed to release write lock")
            }
        }
    }
}
