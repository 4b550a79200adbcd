//! State and segment management common to both container shapes.
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::hash::Hash;

use shm_segment::{Segment, SegmentError};

use crate::{lock, Encoded, Error, Item, Kind, Namespace, Result, Scalar, ShDict, ShList, Value};

/// The type of the key tokens of a container.
pub(crate) trait Key: Clone + Eq + Hash + fmt::Display {
    fn to_scalar(&self) -> Scalar;
    fn from_scalar(scalar: Scalar) -> Option<Self>;
}

/// The view of a container from one process.
///
/// `keys` is our last observation of the keys segment, `vals` the value segments we opened
/// since. Neither is trusted. Every operation reloads the keys, and every read reopens the
/// value segment it returns.
pub(crate) struct Structure<K> {
    pub(crate) ns: Namespace,
    pub(crate) name: String,
    pub(crate) keys: Vec<K>,
    vals: HashMap<K, Segment>,
}

impl Key for usize {
    fn to_scalar(&self) -> Scalar {
        // Indices are contiguous from zero, they do not get anywhere near `i64::MAX`.
        Scalar::Int(*self as i64)
    }

    fn from_scalar(scalar: Scalar) -> Option<Self> {
        match scalar {
            Scalar::Int(idx) => usize::try_from(idx).ok(),
            _ => None,
        }
    }
}

impl Key for String {
    fn to_scalar(&self) -> Scalar {
        Scalar::Str(self.clone())
    }

    fn from_scalar(scalar: Scalar) -> Option<Self> {
        match scalar {
            Scalar::Str(key) => Some(key),
            _ => None,
        }
    }
}

impl<K: Key> Structure<K> {
    /// A view with no keys. Call [`Self::load`] or write data afterwards.
    pub(crate) fn new(ns: &Namespace, name: String) -> Result<Self> {
        if name.is_empty() {
            return Err(Error::InvalidName {
                name,
                reason: "container name must not be empty",
            });
        }

        Ok(Structure {
            ns: ns.clone(),
            name,
            keys: vec![],
            vals: HashMap::new(),
        })
    }

    /// Delete every segment of a previous container by this name.
    ///
    /// This is done before writing new data, without a lock. It also matches other containers
    /// whose names start with `<name>_`, which includes our own sub-containers.
    pub(crate) fn purge(&mut self) -> Result<()> {
        tracing::info!(container = %self.name, "saving/overriding data");
        self.ns.purge(&format!("{}_", self.name))?;
        self.keys.clear();
        self.vals.clear();
        Ok(())
    }

    /// Reload the key list, another process may have changed it.
    pub(crate) fn load(&mut self) -> Result<()> {
        let slots = match self.ns.read(&self.keys_name()) {
            Ok((_, slots)) => slots,
            Err(Error::Segment(SegmentError::NotFound(_))) => {
                self.keys.clear();
                return Ok(());
            }
            Err(err) => return Err(err),
        };

        let mut keys = Vec::with_capacity(slots.len());
        for slot in slots {
            let key = K::from_scalar(slot).ok_or_else(|| Error::Corrupt {
                segment: self.keys_name(),
                reason: "key of the wrong type",
            })?;
            keys.push(key);
        }

        self.keys = keys;
        Ok(())
    }

    /// Take the write lock of this container.
    pub(crate) fn lock(&self) -> Result<lock::WriteGuard> {
        lock::lock_for_writing(&self.ns, &self.name)
    }

    /// Wait until we may read this container.
    pub(crate) fn admit(&self) -> Result<()> {
        lock::wait_readable(&self.ns, &self.name)
    }

    pub(crate) fn contains(&self, key: &K) -> bool {
        self.keys.contains(key)
    }

    /// Replace the persisted key list.
    ///
    /// Skipped if the new keys are the same set as the current ones. Must hold the lock.
    pub(crate) fn save_keys(&mut self, keys: Vec<K>) -> Result<()> {
        let new: HashSet<&K> = keys.iter().collect();
        let old: HashSet<&K> = self.keys.iter().collect();
        if new == old {
            return Ok(());
        }

        let name = self.keys_name();
        let slots: Vec<Scalar> = keys.iter().map(Key::to_scalar).collect();
        self.ns.delete(&name)?;
        self.ns.create(&name, &slots)?;

        self.keys = keys;
        Ok(())
    }

    /// Write the value of a key. Must hold the lock.
    ///
    /// Nested containers are written before the previous value segment is deleted, so a value
    /// that fails to encode leaves the old one in place. Segments are never updated in place.
    pub(crate) fn save_value(&mut self, key: &K, value: Value) -> Result<()> {
        let name = self.val_name(key);
        let encoded = self.encode(value)?;
        let fresh = match &encoded {
            Encoded::Ref(_, sub) => Some(sub.clone()),
            Encoded::Scalar(_) => None,
        };

        self.vals.remove(key);
        let written = match self.ns.delete(&name) {
            Ok(()) => self.ns.create(&name, &[encoded.into_scalar()]),
            Err(err) => Err(err),
        };

        if let Err(err) = written {
            if let Some(sub) = fresh {
                self.discard_sub(&sub);
            }
            return Err(err.into());
        }

        Ok(())
    }

    /// Write all values of a container that has no keys yet, then its key list. Must hold the
    /// lock.
    ///
    /// On failure the values written so far are removed again, with their sub-containers.
    pub(crate) fn save_entries(&mut self, entries: Vec<(K, Value)>) -> Result<()> {
        let mut keys = Vec::with_capacity(entries.len());
        for (key, value) in entries {
            if let Err(err) = self.save_value(&key, value) {
                self.discard_values(&keys);
                return Err(err);
            }
            keys.push(key);
        }

        if let Err(err) = self.save_keys(keys.clone()) {
            self.discard_values(&keys);
            return Err(err);
        }

        Ok(())
    }

    /// Remove value segments that are not listed in the keys. Must hold the lock.
    pub(crate) fn discard_values(&mut self, keys: &[K]) {
        for key in keys {
            if let Err(err) = self.discard_value(key) {
                tracing::warn!(container = %self.name, %key, %err, "failed to remove value");
            }
        }
    }

    fn discard_value(&mut self, key: &K) -> Result<()> {
        let name = self.val_name(key);
        self.vals.remove(key);

        match self.ns.read(&name) {
            Ok((_, slots)) => {
                for slot in slots {
                    if let Encoded::Ref(_, sub) = Encoded::from_scalar(slot) {
                        self.discard_sub(&sub);
                    }
                }
            }
            Err(Error::Segment(SegmentError::NotFound(_))) => {}
            Err(err) => return Err(err),
        }

        self.ns.delete(&name)?;
        Ok(())
    }

    /// Remove a sub-container written by this view that nothing refers to.
    fn discard_sub(&self, sub: &str) {
        // A string scalar can look like a reference, only touch our own sub-containers.
        if !sub.starts_with(&format!("{}_", self.name)) {
            return;
        }

        if let Err(err) = self.ns.purge(&format!("{sub}_")) {
            tracing::warn!(container = %self.name, sub, %err, "failed to remove sub-container");
        }
    }

    /// Delete the value segment of a key. Must hold the lock.
    pub(crate) fn delete_value(&mut self, key: &K) -> Result<()> {
        self.vals.remove(key);
        self.ns.delete(&self.val_name(key))?;
        Ok(())
    }

    /// Read a key after reloading the key list.
    pub(crate) fn read_item(&mut self, key: &K) -> Result<Item> {
        self.admit()?;
        self.load()?;

        if !self.contains(key) {
            return Err(Error::KeyNotFound(key.to_string()));
        }

        self.read_value(key)
    }

    /// Open the value segment of a key, without checking the key list.
    pub(crate) fn read_value(&mut self, key: &K) -> Result<Item> {
        let (segment, slots) = self.ns.read(&self.val_name(key))?;

        let slot = match <[Scalar; 1]>::try_from(slots) {
            Ok([slot]) => slot,
            Err(_) => {
                return Err(Error::Corrupt {
                    segment: segment.name().to_owned(),
                    reason: "value segment must hold exactly one slot",
                })
            }
        };

        self.vals.insert(key.clone(), segment);
        self.decode(Encoded::from_scalar(slot))
    }

    /// Represent a value as a slot, writing nested containers to their own segments.
    fn encode(&self, value: Value) -> Result<Encoded> {
        match value {
            Value::Scalar(scalar) => Ok(Encoded::Scalar(scalar)),
            Value::Dict(map) => {
                let dict = ShDict::create(&self.ns, self.sub_name(), map)?;
                Ok(Encoded::Ref(Kind::Dict, dict.name().to_owned()))
            }
            Value::List(items) => {
                let list = ShList::create(&self.ns, self.sub_name(), items)?;
                Ok(Encoded::Ref(Kind::List, list.name().to_owned()))
            }
        }
    }

    fn decode(&self, encoded: Encoded) -> Result<Item> {
        match encoded {
            Encoded::Scalar(scalar) => Ok(Item::Scalar(scalar)),
            Encoded::Ref(Kind::Dict, name) => ShDict::open(&self.ns, name).map(Item::Dict),
            Encoded::Ref(Kind::List, name) => ShList::open(&self.ns, name).map(Item::List),
        }
    }

    fn keys_name(&self) -> String {
        format!("{}_keys", self.name)
    }

    fn val_name(&self, key: &K) -> String {
        format!("{}_val_{key}", self.name)
    }

    fn sub_name(&self) -> String {
        format!("{}_{}", self.name, uuid::Uuid::new_v4().simple())
    }
}
