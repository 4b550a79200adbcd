//! A namespace local to the process.
use std::collections::btree_map::{BTreeMap, Entry};
use std::sync::Arc;

use parking_lot::Mutex;

use crate::{validate_name, Facility, Segment, SegmentError};

/// A table of named segments in process memory.
///
/// Clones refer to the same table, so handing a clone to each simulated process shares the
/// namespace between them while separately constructed tables stay isolated. All operations
/// hold the table lock, which makes creation atomic exactly as the protocol requires.
#[derive(Clone, Default)]
pub struct MemorySegments {
    table: Arc<Mutex<BTreeMap<String, Arc<[u8]>>>>,
}

impl MemorySegments {
    pub fn new() -> Self {
        Self::default()
    }

    /// The number of names in the table.
    pub fn len(&self) -> usize {
        self.table.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.table.lock().is_empty()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.table.lock().contains_key(name)
    }
}

impl Facility for MemorySegments {
    fn create(&self, name: &str, contents: &[u8]) -> Result<(), SegmentError> {
        validate_name(name)?;

        match self.table.lock().entry(name.to_owned()) {
            Entry::Occupied(_) => Err(SegmentError::Conflict(name.to_owned())),
            Entry::Vacant(vacant) => {
                vacant.insert(contents.into());
                Ok(())
            }
        }
    }

    fn open(&self, name: &str) -> Result<Segment, SegmentError> {
        validate_name(name)?;

        let table = self.table.lock();
        match table.get(name) {
            None => Err(SegmentError::NotFound(name.to_owned())),
            Some(bytes) if bytes.is_empty() => Err(SegmentError::Empty(name.to_owned())),
            Some(bytes) => Ok(Segment::new(name, bytes.clone())),
        }
    }

    fn delete(&self, name: &str) -> Result<(), SegmentError> {
        validate_name(name)?;
        self.table.lock().remove(name);
        Ok(())
    }

    fn list(&self) -> Result<Vec<String>, SegmentError> {
        Ok(self.table.lock().keys().cloned().collect())
    }
}
