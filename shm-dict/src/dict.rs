use std::collections::{BTreeMap, HashSet};

use crate::structure::Structure;
use crate::{Error, Item, Namespace, Result, Value};

/// A string keyed map in shared memory.
///
/// Keys are persisted in a list. After creation it is sorted, later insertions are appended to
/// the end, and iteration follows that order.
pub struct ShDict {
    inner: Structure<String>,
}

/// Iterator over the entries of a [`ShDict`], see [`ShDict::items`].
pub struct Items<'lt> {
    inner: &'lt mut Structure<String>,
    keys: std::vec::IntoIter<String>,
}

impl ShDict {
    /// Open the map by this name as it currently exists.
    ///
    /// A name that was never written is an empty map.
    pub fn open(ns: &Namespace, name: impl Into<String>) -> Result<Self> {
        let mut inner = Structure::new(ns, name.into())?;
        inner.load()?;
        Ok(ShDict { inner })
    }

    /// Write a new map by this name, replacing all previous data.
    pub fn create(
        ns: &Namespace,
        name: impl Into<String>,
        data: BTreeMap<String, Value>,
    ) -> Result<Self> {
        let mut inner = Structure::new(ns, name.into())?;
        inner.purge()?;

        let mut dict = ShDict { inner };
        dict.save_structure(data)?;
        Ok(dict)
    }

    pub fn name(&self) -> &str {
        &self.inner.name
    }

    pub fn namespace(&self) -> &Namespace {
        &self.inner.ns
    }

    /// Replace the map by this name with new data.
    pub fn reconstruct(&self, data: BTreeMap<String, Value>) -> Result<Self> {
        self.inner.admit()?;
        Self::create(&self.inner.ns, self.inner.name.clone(), data)
    }

    fn save_structure(&mut self, data: BTreeMap<String, Value>) -> Result<()> {
        let _guard = self.inner.lock()?;

        if data.is_empty() {
            return Ok(());
        }

        // Iteration order of the map is sorted already.
        self.inner.save_entries(data.into_iter().collect())
    }

    /// Insert or replace the value of a key.
    ///
    /// On error the previous value stays. See the crate docs for the nesting depth that fits
    /// into segment names.
    pub fn set(&mut self, key: impl Into<String>, value: impl Into<Value>) -> Result<()> {
        let key = key.into();
        let _guard = self.inner.lock()?;
        self.inner.load()?;

        self.inner.save_value(&key, value.into())?;
        if self.inner.contains(&key) {
            return Ok(());
        }

        let mut keys = self.inner.keys.clone();
        keys.push(key.clone());
        if let Err(err) = self.inner.save_keys(keys) {
            self.inner.discard_values(&[key]);
            return Err(err);
        }

        Ok(())
    }

    /// Remove a key and its value, returning if it was present.
    pub fn delete(&mut self, key: &str) -> Result<bool> {
        let key = key.to_owned();
        let _guard = self.inner.lock()?;
        self.inner.load()?;

        let present = self.inner.contains(&key);
        if present {
            let keys = self.inner.keys.iter().filter(|k| **k != key).cloned().collect();
            self.inner.save_keys(keys)?;
        }

        // Also if not present, in case a previous writer died between the two steps.
        self.inner.delete_value(&key)?;
        Ok(present)
    }

    /// Read the value of a key.
    ///
    /// Fails with [`Error::KeyNotFound`] if there is none.
    pub fn get_item(&mut self, key: &str) -> Result<Item> {
        self.inner.read_item(&key.to_owned())
    }

    /// Read the value of a key, if there is one.
    pub fn get(&mut self, key: &str) -> Result<Option<Item>> {
        match self.get_item(key) {
            Ok(item) => Ok(Some(item)),
            Err(Error::KeyNotFound(_)) => Ok(None),
            Err(err) => Err(err),
        }
    }

    /// Read the value of a key, or `default` if there is none.
    pub fn get_or(&mut self, key: &str, default: Item) -> Result<Item> {
        Ok(self.get(key)?.unwrap_or(default))
    }

    /// Read the value of a key, first inserting `default` if there is none.
    pub fn setdefault(&mut self, key: &str, default: impl Into<Value>) -> Result<Item> {
        self.inner.admit()?;
        self.inner.load()?;

        if !self.inner.contains(&key.to_owned()) {
            self.set(key, default)?;
        }

        self.get_item(key)
    }

    /// Set every key of `data`, one after another.
    pub fn update<K, V>(&mut self, data: impl IntoIterator<Item = (K, V)>) -> Result<()>
    where
        K: Into<String>,
        V: Into<Value>,
    {
        self.inner.admit()?;
        self.inner.load()?;

        for (key, value) in data {
            self.set(key, value)?;
        }

        Ok(())
    }

    pub fn contains_key(&mut self, key: &str) -> Result<bool> {
        self.inner.admit()?;
        self.inner.load()?;
        Ok(self.inner.contains(&key.to_owned()))
    }

    /// The keys, in iteration order.
    pub fn keys(&mut self) -> Result<Vec<String>> {
        self.inner.admit()?;
        self.inner.load()?;
        Ok(self.inner.keys.clone())
    }

    pub fn len(&mut self) -> Result<usize> {
        self.inner.admit()?;
        self.inner.load()?;
        Ok(self.inner.keys.len())
    }

    pub fn is_empty(&mut self) -> Result<bool> {
        self.len().map(|len| len == 0)
    }

    /// Iterate over all entries.
    ///
    /// The keys are determined once, when this is called. Each value is read when it is yielded,
    /// a key removed in the meantime yields [`Error::KeyNotFound`].
    pub fn items(&mut self) -> Result<Items<'_>> {
        self.inner.admit()?;
        self.inner.load()?;

        let keys = self.inner.keys.clone().into_iter();
        Ok(Items {
            inner: &mut self.inner,
            keys,
        })
    }

    /// Read all entries, recursively.
    pub fn to_map(&mut self) -> Result<BTreeMap<String, Value>> {
        self.collect_map(&mut HashSet::new())
    }

    pub(crate) fn collect_map(
        &mut self,
        path: &mut HashSet<String>,
    ) -> Result<BTreeMap<String, Value>> {
        if !path.insert(self.inner.name.clone()) {
            return Err(Error::Cycle(self.inner.name.clone()));
        }

        let mut map = BTreeMap::new();
        for entry in self.items()? {
            let (key, item) = entry?;
            map.insert(key, item.materialize(path)?);
        }

        path.remove(&self.inner.name);
        Ok(map)
    }
}

impl Iterator for Items<'_> {
    type Item = Result<(String, Item)>;

    fn next(&mut self) -> Option<Self::Item> {
        let key = self.keys.next()?;
        Some(self.inner.read_item(&key).map(|item| (key, item)))
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        self.keys.size_hint()
    }
}

impl core::fmt::Debug for ShDict {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("ShDict").field("name", &self.inner.name).finish()
    }
}
