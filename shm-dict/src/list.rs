use std::collections::HashSet;

use crate::structure::Structure;
use crate::{Item, Namespace, Result, Value};

/// A list in shared memory.
///
/// Elements are indexed contiguously from zero. The list can only grow.
pub struct ShList {
    inner: Structure<usize>,
}

/// Iterator over the elements of a [`ShList`], see [`ShList::iter`].
pub struct Iter<'lt> {
    inner: &'lt mut Structure<usize>,
    keys: std::vec::IntoIter<usize>,
}

impl ShList {
    /// Open the list by this name as it currently exists.
    ///
    /// A name that was never written is an empty list.
    pub fn open(ns: &Namespace, name: impl Into<String>) -> Result<Self> {
        let mut inner = Structure::new(ns, name.into())?;
        inner.load()?;
        Ok(ShList { inner })
    }

    /// Write a new list by this name, replacing all previous data.
    pub fn create(ns: &Namespace, name: impl Into<String>, data: Vec<Value>) -> Result<Self> {
        let mut inner = Structure::new(ns, name.into())?;
        inner.purge()?;

        let mut list = ShList { inner };
        list.save_structure(data)?;
        Ok(list)
    }

    pub fn name(&self) -> &str {
        &self.inner.name
    }

    pub fn namespace(&self) -> &Namespace {
        &self.inner.ns
    }

    /// Replace the list by this name with new data.
    pub fn reconstruct(&self, data: Vec<Value>) -> Result<Self> {
        self.inner.admit()?;
        Self::create(&self.inner.ns, self.inner.name.clone(), data)
    }

    fn save_structure(&mut self, data: Vec<Value>) -> Result<()> {
        let _guard = self.inner.lock()?;

        if data.is_empty() {
            return Ok(());
        }

        self.inner.save_entries(data.into_iter().enumerate().collect())
    }

    pub fn append(&mut self, value: impl Into<Value>) -> Result<()> {
        let _guard = self.inner.lock()?;
        self.inner.load()?;

        let len = self.inner.keys.len();
        self.inner.save_value(&len, value.into())?;
        if let Err(err) = self.inner.save_keys((0..=len).collect()) {
            self.inner.discard_values(&[len]);
            return Err(err);
        }

        Ok(())
    }

    pub fn len(&mut self) -> Result<usize> {
        self.inner.admit()?;
        self.inner.load()?;
        Ok(self.inner.keys.len())
    }

    pub fn is_empty(&mut self) -> Result<bool> {
        self.len().map(|len| len == 0)
    }

    /// Read the element at `index`.
    ///
    /// Fails with [`Error::KeyNotFound`](crate::Error::KeyNotFound) if out of bounds.
    pub fn get_item(&mut self, index: usize) -> Result<Item> {
        self.inner.read_item(&index)
    }

    /// Iterate over the elements in order.
    ///
    /// The length is determined once, when this is called. Each element is read when it is
    /// yielded, so with concurrent writers later elements may be newer than earlier ones.
    pub fn iter(&mut self) -> Result<Iter<'_>> {
        self.inner.admit()?;
        self.inner.load()?;

        let keys = self.inner.keys.clone().into_iter();
        Ok(Iter {
            inner: &mut self.inner,
            keys,
        })
    }

    /// Read all elements, recursively.
    pub fn to_values(&mut self) -> Result<Vec<Value>> {
        self.collect_values(&mut HashSet::new())
    }

    pub(crate) fn collect_values(&mut self, path: &mut HashSet<String>) -> Result<Vec<Value>> {
        if !path.insert(self.inner.name.clone()) {
            return Err(crate::Error::Cycle(self.inner.name.clone()));
        }

        let mut values = vec![];
        for item in self.iter()? {
            values.push(item?.materialize(path)?);
        }

        path.remove(&self.inner.name);
        Ok(values)
    }
}

impl Iterator for Iter<'_> {
    type Item = Result<Item>;

    fn next(&mut self) -> Option<Self::Item> {
        let key = self.keys.next()?;
        Some(self.inner.read_value(&key))
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        self.keys.size_hint()
    }
}

impl core::fmt::Debug for ShList {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("ShList").field("name", &self.inner.name).finish()
    }
}
