//! Segments in the POSIX shared memory namespace.
use std::ffi::CString;
use std::fs::File;
use std::os::fd::{FromRawFd, OwnedFd};
use std::path::PathBuf;
use std::sync::atomic::{AtomicU8, Ordering};

use memmap2::{MmapOptions, MmapRaw};

use crate::{validate_name, Facility, Segment, SegmentError};

/// Interact with `shm_open`, `shm_unlink` and the directory where the system keeps the names.
///
/// Segments are mapped as shared memory, other processes may map the same pages at any time. All
/// accesses to the mapping go through atomics for this reason, see [`atomic_bytes`].
#[derive(Clone, Debug)]
pub struct PosixShm {
    /// Where the names of the namespace are visible as files.
    listing: PathBuf,
}

impl PosixShm {
    /// A provider for the default namespace, listed from `/dev/shm`.
    pub fn new() -> Self {
        Self::with_listing_dir("/dev/shm")
    }

    /// A provider that lists names from another directory.
    ///
    /// `shm_open` itself is not affected by this. It is only useful when the system mounts the
    /// shared memory file system somewhere else.
    pub fn with_listing_dir(dir: impl Into<PathBuf>) -> Self {
        PosixShm {
            listing: dir.into(),
        }
    }

    fn path(name: &str) -> Result<CString, SegmentError> {
        validate_name(name)?;
        // Validation rejects the nul byte already.
        CString::new(format!("/{name}")).map_err(|_| SegmentError::InvalidName {
            name: name.to_owned(),
            reason: "name must not contain a nul byte",
        })
    }

    fn shm_open(path: &CString, name: &str, oflag: libc::c_int) -> Result<File, SegmentError> {
        let mode = (libc::S_IRUSR | libc::S_IWUSR) as libc::c_uint;
        let fd = unsafe { libc::shm_open(path.as_ptr(), oflag, mode) };

        if fd < 0 {
            let err = std::io::Error::last_os_error();
            return Err(match err.raw_os_error() {
                Some(libc::EEXIST) => SegmentError::Conflict(name.to_owned()),
                Some(libc::ENOENT) => SegmentError::NotFound(name.to_owned()),
                _ => os_error("shm_open", name, err),
            });
        }

        // Safety: the descriptor was just returned to us and is not owned by anything else.
        Ok(File::from(unsafe { OwnedFd::from_raw_fd(fd) }))
    }

    fn fill(file: &File, name: &str, contents: &[u8]) -> Result<(), SegmentError> {
        file.set_len(contents.len() as u64)
            .map_err(|err| os_error("ftruncate", name, err))?;

        if contents.is_empty() {
            return Ok(());
        }

        let map = MmapRaw::map_raw(file).map_err(|err| os_error("mmap", name, err))?;
        // Safety: the map is alive until the end of this function and not resized.
        let shared = unsafe { atomic_bytes(&map) };
        for (cell, &byte) in shared.iter().zip(contents) {
            cell.store(byte, Ordering::Relaxed);
        }

        Ok(())
    }
}

impl Default for PosixShm {
    fn default() -> Self {
        Self::new()
    }
}

impl Facility for PosixShm {
    fn create(&self, name: &str, contents: &[u8]) -> Result<(), SegmentError> {
        let path = Self::path(name)?;
        let file = Self::shm_open(&path, name, libc::O_RDWR | libc::O_CREAT | libc::O_EXCL)?;

        if let Err(err) = Self::fill(&file, name, contents) {
            // We own the name, nobody else could have created it. Do not leave a husk behind.
            unsafe { libc::shm_unlink(path.as_ptr()) };
            return Err(err);
        }

        Ok(())
    }

    fn open(&self, name: &str) -> Result<Segment, SegmentError> {
        let path = Self::path(name)?;
        let file = Self::shm_open(&path, name, libc::O_RDONLY)?;

        let len = file
            .metadata()
            .map_err(|err| os_error("fstat", name, err))?
            .len();

        if len == 0 {
            return Err(SegmentError::Empty(name.to_owned()));
        }

        let map = MmapOptions::new()
            .map_raw_read_only(&file)
            .map_err(|err| os_error("mmap", name, err))?;

        // Safety: the map is alive for the copy and not resized.
        let shared = unsafe { atomic_bytes(&map) };
        let bytes: Vec<u8> = shared.iter().map(|cell| cell.load(Ordering::Relaxed)).collect();

        Ok(Segment::new(name, bytes))
    }

    fn delete(&self, name: &str) -> Result<(), SegmentError> {
        let path = Self::path(name)?;

        if -1 == unsafe { libc::shm_unlink(path.as_ptr()) } {
            let err = std::io::Error::last_os_error();
            if err.raw_os_error() != Some(libc::ENOENT) {
                return Err(os_error("shm_unlink", name, err));
            }
        }

        Ok(())
    }

    fn list(&self) -> Result<Vec<String>, SegmentError> {
        let listing = self.listing.display().to_string();
        let dir = std::fs::read_dir(&self.listing)
            .map_err(|err| os_error("readdir", &listing, err))?;

        let mut names = vec![];
        for entry in dir {
            let entry = entry.map_err(|err| os_error("readdir", &listing, err))?;
            // Names we created are always valid strings, ignore everything else.
            if let Ok(name) = entry.file_name().into_string() {
                names.push(name);
            }
        }

        Ok(names)
    }
}

/// View a mapping as a slice of atomic bytes.
///
/// # Safety
///
/// The returned slice must not outlive the mapping. Do **NOT** return it from the function that
/// owns the map.
unsafe fn atomic_bytes(map: &MmapRaw) -> &[AtomicU8] {
    // Safety: the pointer is valid for `len` bytes. `AtomicU8` has the layout of `u8` and no
    // uniqueness requirements, concurrent modifications by other processes are fine.
    unsafe { core::slice::from_raw_parts(map.as_ptr() as *const AtomicU8, map.len()) }
}

fn os_error(op: &'static str, name: &str, source: std::io::Error) -> SegmentError {
    SegmentError::Os {
        op,
        name: name.to_owned(),
        source,
    }
}
