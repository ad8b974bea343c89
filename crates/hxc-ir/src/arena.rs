//! Arena storage addressed by typed handles.
//!
//! Every node of a compilation lives in one of the arenas owned by
//! [`Module`](crate::Module). Nodes are never freed individually; the whole
//! module is dropped at once when compilation ends.

use std::cmp::Ordering;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::marker::PhantomData;
use std::ops::{Index, IndexMut};

use indexmap::IndexSet;

use crate::error::IrError;

/// A typed index into an [`Arena`] or [`UniqueArena`].
pub struct Handle<T> {
    index: usize,
    _phantom: PhantomData<T>,
}

impl<T> Clone for Handle<T> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<T> Copy for Handle<T> {}

impl<T> PartialEq for Handle<T> {
    fn eq(&self, other: &Self) -> bool {
        self.index == other.index
    }
}

impl<T> Eq for Handle<T> {}

impl<T> PartialOrd for Handle<T> {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl<T> Ord for Handle<T> {
    fn cmp(&self, other: &Self) -> Ordering {
        self.index.cmp(&other.index)
    }
}

impl<T> Hash for Handle<T> {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.index.hash(state);
    }
}

impl<T> fmt::Debug for Handle<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}]", self.index)
    }
}

impl<T> Handle<T> {
    pub(crate) fn new(index: usize) -> Self {
        Self {
            index,
            _phantom: PhantomData,
        }
    }

    /// Returns the zero-based index of this handle.
    pub fn index(self) -> usize {
        self.index
    }
}

#[cfg(feature = "serde")]
impl<T> serde::Serialize for Handle<T> {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(self.index as u64)
    }
}

#[cfg(feature = "serde")]
impl<'de, T> serde::Deserialize<'de> for Handle<T> {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let index = <u64 as serde::Deserialize>::deserialize(deserializer)?;
        usize::try_from(index)
            .map(Self::new)
            .map_err(|_| serde::de::Error::custom(format!("handle {index} does not fit this target")))
    }
}

/// An append-only arena.
#[derive(Clone, Debug, PartialEq)]
#[cfg_attr(
    feature = "serde",
    derive(serde::Serialize, serde::Deserialize),
    serde(transparent)
)]
pub struct Arena<T> {
    data: Vec<T>,
}

impl<T> Default for Arena<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> Arena<T> {
    /// Creates an empty arena.
    pub fn new() -> Self {
        Self { data: Vec::new() }
    }

    /// Returns the number of values in the arena.
    pub fn len(&self) -> usize {
        self.data.len()
    }

    /// Returns `true` if the arena holds no values.
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Appends a value and returns its handle.
    pub fn append(&mut self, value: T) -> Handle<T> {
        let handle = Handle::new(self.data.len());
        self.data.push(value);
        handle
    }

    /// Returns the value for `handle`, or `None` if it is out of bounds.
    pub fn try_get(&self, handle: Handle<T>) -> Option<&T> {
        self.data.get(handle.index())
    }

    /// Fails with [`IrError::BadHandle`] if `handle` does not belong to this arena.
    pub fn check_contains(&self, handle: Handle<T>, kind: &'static str) -> Result<(), IrError> {
        if handle.index() < self.data.len() {
            Ok(())
        } else {
            Err(IrError::BadHandle {
                kind,
                index: handle.index(),
                size: self.data.len(),
            })
        }
    }

    /// Iterates over `(handle, &value)` pairs in allocation order.
    pub fn iter(&self) -> impl Iterator<Item = (Handle<T>, &T)> {
        self.data
            .iter()
            .enumerate()
            .map(|(i, v)| (Handle::new(i), v))
    }

    /// Iterates over `(handle, &mut value)` pairs in allocation order.
    pub fn iter_mut(&mut self) -> impl Iterator<Item = (Handle<T>, &mut T)> {
        self.data
            .iter_mut()
            .enumerate()
            .map(|(i, v)| (Handle::new(i), v))
    }

    /// Iterates over all handles in allocation order.
    pub fn handles(&self) -> impl Iterator<Item = Handle<T>> {
        (0..self.data.len()).map(Handle::new)
    }
}

impl<T> Index<Handle<T>> for Arena<T> {
    type Output = T;
    fn index(&self, handle: Handle<T>) -> &T {
        &self.data[handle.index()]
    }
}

impl<T> IndexMut<Handle<T>> for Arena<T> {
    fn index_mut(&mut self, handle: Handle<T>) -> &mut T {
        &mut self.data[handle.index()]
    }
}

/// An arena that interns its values: inserting a value equal to one already
/// present returns the existing handle.
#[derive(Clone, Debug)]
#[cfg_attr(
    feature = "serde",
    derive(serde::Serialize, serde::Deserialize),
    serde(transparent)
)]
pub struct UniqueArena<T: Eq + Hash> {
    set: IndexSet<T>,
}

impl<T: Eq + Hash> Default for UniqueArena<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Eq + Hash> UniqueArena<T> {
    /// Creates an empty unique arena.
    pub fn new() -> Self {
        Self {
            set: IndexSet::new(),
        }
    }

    /// Returns the number of distinct values.
    pub fn len(&self) -> usize {
        self.set.len()
    }

    /// Returns `true` if the arena holds no values.
    pub fn is_empty(&self) -> bool {
        self.set.is_empty()
    }

    /// Inserts `value`, returning the handle of the equal value if one exists.
    pub fn insert(&mut self, value: T) -> Handle<T> {
        let (index, _) = self.set.insert_full(value);
        Handle::new(index)
    }

    /// Looks up the handle of a value without inserting it.
    pub fn get(&self, value: &T) -> Option<Handle<T>> {
        self.set.get_index_of(value).map(Handle::new)
    }

    /// Returns the value for `handle`, or `None` if it is out of bounds.
    pub fn try_get(&self, handle: Handle<T>) -> Option<&T> {
        self.set.get_index(handle.index())
    }

    /// Fails with [`IrError::BadHandle`] if `handle` does not belong to this arena.
    pub fn check_contains(&self, handle: Handle<T>, kind: &'static str) -> Result<(), IrError> {
        if handle.index() < self.set.len() {
            Ok(())
        } else {
            Err(IrError::BadHandle {
                kind,
                index: handle.index(),
                size: self.set.len(),
            })
        }
    }

    /// Iterates over `(handle, &value)` pairs in insertion order.
    pub fn iter(&self) -> impl Iterator<Item = (Handle<T>, &T)> {
        self.set.iter().enumerate().map(|(i, v)| (Handle::new(i), v))
    }
}

impl<T: Eq + Hash> Index<Handle<T>> for UniqueArena<T> {
    type Output = T;
    fn index(&self, handle: Handle<T>) -> &T {
        &self.set[handle.index()]
    }
}
