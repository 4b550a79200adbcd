//! The handle to a set of segments shared by the cooperating processes.
use std::ffi::OsString;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use shm_segment::{Facility, MemorySegments, PosixShm, Segment, SegmentError};

use crate::{slots, Error, Result, Scalar};

/// A namespace of segments, and the options for containers in it.
///
/// This is a cheap handle, clones refer to the same facility. Every container keeps one.
#[derive(Clone)]
pub struct Namespace {
    inner: Arc<Inner>,
}

struct Inner {
    facility: Box<dyn Facility>,
    options: NamespaceOptions,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct NamespaceOptions {
    /// Prepended to every segment name.
    ///
    /// All processes sharing containers must agree on this. The default is that of other
    /// implementations of the same layout.
    pub prefix: String,
    pub lock: LockPolicy,
}

/// How long to poll for a lock.
///
/// The worst case wait is `attempts * interval` and then the operation fails with
/// [`Error::LockTimeout`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct LockPolicy {
    pub attempts: u32,
    pub interval: Duration,
}

impl Namespace {
    pub fn new(facility: impl Facility + 'static, options: NamespaceOptions) -> Self {
        Namespace {
            inner: Arc::new(Inner {
                facility: Box::new(facility),
                options,
            }),
        }
    }

    /// The system wide POSIX shared memory, configured from the environment.
    ///
    /// See [`NamespaceOptions::from_env`].
    pub fn posix() -> Result<Self> {
        Ok(Self::new(PosixShm::new(), NamespaceOptions::from_env()?))
    }

    /// A namespace private to this handle and its clones.
    pub fn memory() -> Self {
        Self::new(MemorySegments::new(), NamespaceOptions::default())
    }

    pub fn options(&self) -> &NamespaceOptions {
        &self.inner.options
    }

    /// The logical names of all segments in the namespace, sorted.
    ///
    /// Names of the underlying facility that do not start with our prefix are not included.
    pub fn segments(&self) -> Result<Vec<String>> {
        let prefix = &self.inner.options.prefix;
        let mut names: Vec<String> = self
            .inner
            .facility
            .list()?
            .into_iter()
            .filter_map(|name| name.strip_prefix(prefix.as_str()).map(str::to_owned))
            .collect();
        names.sort();
        Ok(names)
    }

    /// Delete every segment whose logical name starts with `prefix`.
    ///
    /// Not guarded by any lock. Returns the number of deleted segments.
    pub fn purge(&self, prefix: &str) -> Result<usize> {
        let mut count = 0;
        for name in self.segments()? {
            if name.starts_with(prefix) {
                self.delete(&name)?;
                count += 1;
            }
        }

        tracing::debug!(prefix, count, "purged segments");
        Ok(count)
    }

    pub(crate) fn create(&self, name: &str, slots: &[Scalar]) -> Result<(), SegmentError> {
        let contents = slots::encode(slots);
        self.inner.facility.create(&self.full_name(name), &contents)
    }

    pub(crate) fn open(&self, name: &str) -> Result<Segment, SegmentError> {
        self.inner.facility.open(&self.full_name(name))
    }

    /// Open a segment and decode its slots.
    pub(crate) fn read(&self, name: &str) -> Result<(Segment, Vec<Scalar>)> {
        let segment = self.open(name)?;
        let slots = slots::decode(&segment)?;
        tracing::trace!(segment = name, slots = slots.len(), "read segment");
        Ok((segment, slots))
    }

    pub(crate) fn delete(&self, name: &str) -> Result<(), SegmentError> {
        self.inner.facility.delete(&self.full_name(name))
    }

    fn full_name(&self, name: &str) -> String {
        format!("{}{name}", self.inner.options.prefix)
    }
}

impl fmt::Debug for Namespace {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Namespace")
            .field("options", &self.inner.options)
            .finish_non_exhaustive()
    }
}

impl NamespaceOptions {
    pub const DEFAULT_PREFIX: &'static str = "sharedmem_";

    /// Read overrides of the defaults from the environment.
    ///
    /// - `SHM_DICT_PREFIX`: the segment name prefix.
    /// - `SHM_DICT_LOCK_ATTEMPTS`: number of polls before a lock times out.
    /// - `SHM_DICT_LOCK_INTERVAL_MS`: milliseconds between polls.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|var| std::env::var_os(var))
    }

    pub(crate) fn from_lookup(lookup: impl Fn(&str) -> Option<OsString>) -> Result<Self> {
        let mut options = NamespaceOptions::default();

        if let Some(prefix) = env_str(&lookup, "SHM_DICT_PREFIX")? {
            options.prefix = prefix;
        }

        if let Some(attempts) = env_str(&lookup, "SHM_DICT_LOCK_ATTEMPTS")? {
            options.lock.attempts = attempts.parse().map_err(|err| Error::Config {
                var: "SHM_DICT_LOCK_ATTEMPTS",
                reason: format!("{err}"),
            })?;
        }

        if let Some(interval) = env_str(&lookup, "SHM_DICT_LOCK_INTERVAL_MS")? {
            let millis: u64 = interval.parse().map_err(|err| Error::Config {
                var: "SHM_DICT_LOCK_INTERVAL_MS",
                reason: format!("{err}"),
            })?;
            options.lock.interval = Duration::from_millis(millis);
        }

        Ok(options)
    }
}

impl Default for NamespaceOptions {
    fn default() -> Self {
        NamespaceOptions {
            prefix: Self::DEFAULT_PREFIX.to_owned(),
            lock: LockPolicy::default(),
        }
    }
}

impl Default for LockPolicy {
    fn default() -> Self {
        LockPolicy {
            attempts: 100,
            interval: Duration::from_millis(10),
        }
    }
}

fn env_str(
    lookup: &impl Fn(&str) -> Option<OsString>,
    var: &'static str,
) -> Result<Option<String>> {
    let Some(value) = lookup(var) else {
        return Ok(None);
    };

    value.into_string().map(Some).map_err(|_| Error::Config {
        var,
        reason: "not valid unicode".to_owned(),
    })
}
