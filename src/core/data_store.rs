use std::{
	collections::HashMap,
	sync::{Arc, RwLock},
};

pub type Key = String;
pub type Value = String;

/// Thread-safe key-value table.
///
/// A node holds two of these: the shard it owns and the replica of its
/// predecessor's shard. Each table carries its own lock; no operation
/// here takes more than one lock, so the two tables can never deadlock
/// against each other.
#[derive(Clone, Default)]
pub struct DataStore {
	data: Arc<RwLock<HashMap<Key, Value>>>,
}

impl DataStore {
	pub fn new() -> Self {
		Self::default()
	}

	pub fn get(&self, key: &str) -> Option<Value> {
		self.data.read().unwrap().get(key).cloned()
	}

	pub fn put(&self, key: Key, value: Value) {
		self.data.write().unwrap().insert(key, value);
	}

	pub fn remove(&self, key: &str) -> Option<Value> {
		self.data.write().unwrap().remove(key)
	}

	/// Deep copy of the current contents.
	pub fn snapshot(&self) -> HashMap<Key, Value> {
		self.data.read().unwrap().clone()
	}

	/// Drop the current contents and install `entries` instead.
	pub fn replace(&self, entries: HashMap<Key, Value>) {
		*self.data.write().unwrap() = entries;
	}

	/// Merge `entries` in, overwriting existing keys.
	pub fn merge(&self, entries: HashMap<Key, Value>) {
		self.data.write().unwrap().extend(entries);
	}

	pub fn remove_keys<'a>(&self, keys: impl IntoIterator<Item = &'a Key>) {
		let mut data = self.data.write().unwrap();
		for key in keys {
			data.remove(key);
		}
	}

	/// Take the whole contents out, leaving the table empty.
	pub fn take(&self) -> HashMap<Key, Value> {
		std::mem::take(&mut *self.data.write().unwrap())
	}

	/// Remove and return every entry whose key matches `pred`.
	pub fn extract<F: Fn(&Key) -> bool>(&self, pred: F) -> HashMap<Key, Value> {
		let mut data = self.data.write().unwrap();
		let mut out = HashMap::new();
		data.retain(|k, v| {
			if pred(k) {
				out.insert(k.clone(), v.clone());
				false
			} else {
				true
			}
		});
		out
	}

	pub fn len(&self) -> usize {
		self.data.read().unwrap().len()
	}

	pub fn is_empty(&self) -> bool {
		self.data.read().unwrap().is_empty()
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn test_put_get_remove() {
		let store = DataStore::new();
		store.put("a".into(), "1".into());
		assert_eq!(store.get("a"), Some("1".into()));
		// put is idempotent
		store.put("a".into(), "1".into());
		assert_eq!(store.len(), 1);
		assert_eq!(store.remove("a"), Some("1".into()));
		assert_eq!(store.remove("a"), None);
		assert!(store.is_empty());
	}

	#[test]
	fn test_merge_overwrites() {
		let store = DataStore::new();
		store.put("a".into(), "old".into());
		let entries = HashMap::from([("a".into(), "new".into()), ("b".into(), "2".into())]);
		store.merge(entries.clone());
		assert_eq!(store.get("a"), Some("new".into()));
		assert_eq!(store.get("b"), Some("2".into()));
		// merging the same entries again changes nothing
		store.merge(entries);
		assert_eq!(store.len(), 2);
	}

	#[test]
	fn test_remove_keys_idempotent() {
		let store = DataStore::new();
		store.put("a".into(), "1".into());
		store.put("b".into(), "2".into());
		let doomed: HashMap<String, String> =
			HashMap::from([("a".into(), "1".into()), ("c".into(), "3".into())]);
		store.remove_keys(doomed.keys());
		assert_eq!(store.get("a"), None);
		assert_eq!(store.get("b"), Some("2".into()));
		store.remove_keys(doomed.keys());
		assert_eq!(store.len(), 1);
	}

	#[test]
	fn test_extract_splits() {
		let store = DataStore::new();
		store.put("keep".into(), "1".into());
		store.put("move".into(), "2".into());
		let moved = store.extract(|k| k.starts_with("move"));
		assert_eq!(moved, HashMap::from([("move".into(), "2".into())]));
		assert_eq!(store.get("keep"), Some("1".into()));
		assert_eq!(store.get("move"), None);
	}

	#[test]
	fn test_take_empties() {
		let store = DataStore::new();
		store.put("a".into(), "1".into());
		let taken = store.take();
		assert_eq!(taken.len(), 1);
		assert!(store.is_empty());
		assert!(store.take().is_empty());
	}
}
