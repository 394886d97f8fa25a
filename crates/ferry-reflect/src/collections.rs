//! Host collection contracts
//!
//! Collections are shared interfaces so that an adapter over a script array or
//! object can stand in for a host collection without copying. `Vec`-backed
//! implementations are provided for host code that owns its data.

use std::any::Any;

use parking_lot::RwLock;

use crate::error::{HostError, HostResult};
use crate::value::HostValue;

/// Read-only sequence
pub trait HostIterable: Send + Sync {
    /// Materialize the current elements
    fn snapshot(&self) -> HostResult<Vec<HostValue>>;

    fn as_any(&self) -> &dyn Any;
}

/// Indexed, growable sequence
pub trait HostList: Send + Sync {
    fn len(&self) -> HostResult<usize>;

    fn get(&self, index: usize) -> HostResult<HostValue>;

    fn set(&self, index: usize, value: HostValue) -> HostResult<()>;

    fn push(&self, value: HostValue) -> HostResult<()>;

    fn remove_at(&self, index: usize) -> HostResult<HostValue>;

    fn clear(&self) -> HostResult<()>;

    fn is_empty(&self) -> HostResult<bool> {
        Ok(self.len()? == 0)
    }

    fn contains(&self, value: &HostValue) -> HostResult<bool> {
        Ok(self.snapshot()?.iter().any(|v| v == value))
    }

    fn snapshot(&self) -> HostResult<Vec<HostValue>> {
        (0..self.len()?).map(|i| self.get(i)).collect()
    }

    fn as_any(&self) -> &dyn Any;
}

/// Collection of distinct values
pub trait HostSet: Send + Sync {
    fn len(&self) -> HostResult<usize>;

    fn contains(&self, value: &HostValue) -> HostResult<bool>;

    /// Returns `false` if the value was already present
    fn add(&self, value: HostValue) -> HostResult<bool>;

    fn remove(&self, value: &HostValue) -> HostResult<bool>;

    fn snapshot(&self) -> HostResult<Vec<HostValue>>;

    fn as_any(&self) -> &dyn Any;
}

/// Key/value dictionary
pub trait HostMap: Send + Sync {
    fn len(&self) -> HostResult<usize>;

    fn get(&self, key: &HostValue) -> HostResult<Option<HostValue>>;

    /// Returns the previous value
    fn insert(&self, key: HostValue, value: HostValue) -> HostResult<Option<HostValue>>;

    fn remove(&self, key: &HostValue) -> HostResult<Option<HostValue>>;

    fn keys(&self) -> HostResult<Vec<HostValue>>;

    fn contains_key(&self, key: &HostValue) -> HostResult<bool> {
        Ok(self.get(key)?.is_some())
    }

    fn as_any(&self) -> &dyn Any;
}

fn out_of_range(index: usize, len: usize) -> HostError {
    HostError::IndexOutOfRange { index, len }
}

#[derive(Default)]
pub struct VecList {
    items: RwLock<Vec<HostValue>>,
}

impl VecList {
    pub fn new(items: Vec<HostValue>) -> Self {
        Self {
            items: RwLock::new(items),
        }
    }
}

impl HostList for VecList {
    fn len(&self) -> HostResult<usize> {
        Ok(self.items.read().len())
    }

    fn get(&self, index: usize) -> HostResult<HostValue> {
        let items = self.items.read();
        items.get(index).cloned().ok_or_else(|| out_of_range(index, items.len()))
    }

    fn set(&self, index: usize, value: HostValue) -> HostResult<()> {
        let mut items = self.items.write();
        let len = items.len();
        match items.get_mut(index) {
            Some(slot) => {
                *slot = value;
                Ok(())
            }
            None => Err(out_of_range(index, len)),
        }
    }

    fn push(&self, value: HostValue) -> HostResult<()> {
        self.items.write().push(value);
        Ok(())
    }

    fn remove_at(&self, index: usize) -> HostResult<HostValue> {
        let mut items = self.items.write();
        if index < items.len() {
            Ok(items.remove(index))
        } else {
            Err(out_of_range(index, items.len()))
        }
    }

    fn clear(&self) -> HostResult<()> {
        self.items.write().clear();
        Ok(())
    }

    fn snapshot(&self) -> HostResult<Vec<HostValue>> {
        Ok(self.items.read().clone())
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

impl HostIterable for VecList {
    fn snapshot(&self) -> HostResult<Vec<HostValue>> {
        Ok(self.items.read().clone())
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

#[derive(Default)]
pub struct VecSet {
    items: RwLock<Vec<HostValue>>,
}

impl VecSet {
    pub fn new(items: impl IntoIterator<Item = HostValue>) -> Self {
        let set = Self::default();
        {
            let mut inner = set.items.write();
            for item in items {
                if !inner.contains(&item) {
                    inner.push(item);
                }
            }
        }
        set
    }
}

impl HostSet for VecSet {
    fn len(&self) -> HostResult<usize> {
        Ok(self.items.read().len())
    }

    fn contains(&self, value: &HostValue) -> HostResult<bool> {
        Ok(self.items.read().contains(value))
    }

    fn add(&self, value: HostValue) -> HostResult<bool> {
        let mut items = self.items.write();
        if items.contains(&value) {
            Ok(false)
        } else {
            items.push(value);
            Ok(true)
        }
    }

    fn remove(&self, value: &HostValue) -> HostResult<bool> {
        let mut items = self.items.write();
        match items.iter().position(|v| v == value) {
            Some(i) => {
                items.remove(i);
                Ok(true)
            }
            None => Ok(false),
        }
    }

    fn snapshot(&self) -> HostResult<Vec<HostValue>> {
        Ok(self.items.read().clone())
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

/// Insertion-ordered map with linear key lookup (keys need not be hashable)
#[derive(Default)]
pub struct VecMap {
    entries: RwLock<Vec<(HostValue, HostValue)>>,
}

impl VecMap {
    pub fn new(entries: impl IntoIterator<Item = (HostValue, HostValue)>) -> Self {
        let map = Self::default();
        for (k, v) in entries {
            let _ = map.insert(k, v);
        }
        map
    }
}

impl HostMap for VecMap {
    fn len(&self) -> HostResult<usize> {
        Ok(self.entries.read().len())
    }

    fn get(&self, key: &HostValue) -> HostResult<Option<HostValue>> {
        Ok(self
            .entries
            .read()
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.clone()))
    }

    fn insert(&self, key: HostValue, value: HostValue) -> HostResult<Option<HostValue>> {
        let mut entries = self.entries.write();
        match entries.iter_mut().find(|(k, _)| *k == key) {
            Some((_, slot)) => Ok(Some(std::mem::replace(slot, value))),
            None => {
                entries.push((key, value));
                Ok(None)
            }
        }
    }

    fn remove(&self, key: &HostValue) -> HostResult<Option<HostValue>> {
        let mut entries = self.entries.write();
        Ok(entries
            .iter()
            .position(|(k, _)| k == key)
            .map(|i| entries.remove(i).1))
    }

    fn keys(&self) -> HostResult<Vec<HostValue>> {
        Ok(self.entries.read().iter().map(|(k, _)| k.clone()).collect())
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_vec_list_bounds() {
        let list = VecList::new(vec![HostValue::I32(1)]);
        assert!(matches!(
            list.get(3),
            Err(HostError::IndexOutOfRange { index: 3, len: 1 })
        ));
        list.push(HostValue::I32(2)).unwrap();
        assert_eq!(HostList::snapshot(&list).unwrap(), vec![HostValue::I32(1), HostValue::I32(2)]);
    }

    #[test]
    fn test_vec_set_dedups() {
        let set = VecSet::new([HostValue::from("a"), HostValue::from("a")]);
        assert_eq!(set.len().unwrap(), 1);
        assert!(!set.add(HostValue::from("a")).unwrap());
        assert!(set.remove(&HostValue::from("a")).unwrap());
    }

    #[test]
    fn test_vec_map_replace() {
        let map = VecMap::new([(HostValue::from("k"), HostValue::I32(1))]);
        let previous = map.insert(HostValue::from("k"), HostValue::I32(2)).unwrap();
        assert_eq!(previous, Some(HostValue::I32(1)));
        assert_eq!(map.get(&HostValue::from("k")).unwrap(), Some(HostValue::I32(2)));
    }
}
