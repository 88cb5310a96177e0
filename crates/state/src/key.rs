//! Slice keys: typed capability tokens naming one field of [`AppState`].

use std::any::Any;
use std::collections::HashMap;
use std::fmt;
use std::marker::PhantomData;
use std::sync::{Arc, OnceLock};

use parking_lot::Mutex;

use crate::app_state::AppState;
use crate::slice::Slice;

/// Process-wide name counter that keeps generated keys unique.
#[derive(Debug, Default)]
pub(crate) struct KeyRegistry {
	counters: Mutex<HashMap<String, usize>>,
}

impl KeyRegistry {
	/// Returns the shared registry.
	pub fn global() -> &'static Self {
		static GLOBAL: OnceLock<KeyRegistry> = OnceLock::new();
		GLOBAL.get_or_init(KeyRegistry::default)
	}

	/// Reserves a fresh key for `name`: `name$`, then `name$1`, `name$2`, ...
	pub fn create_key(&self, name: &str) -> String {
		let mut counters = self.counters.lock();
		let count = counters.entry(name.to_string()).or_insert(0);
		let key = if *count == 0 { format!("{name}$") } else { format!("{name}${count}") };
		*count += 1;
		key
	}
}

/// Typed handle to one slice's state.
///
/// Creating a key reserves a unique name. Every slice built from the same
/// key claims the same field, so two distinct slices sharing a key is a
/// configuration error.
pub struct SliceKey<T> {
	key: Arc<str>,
	_marker: PhantomData<fn() -> T>,
}

impl<T> Clone for SliceKey<T> {
	fn clone(&self) -> Self {
		Self {
			key: Arc::clone(&self.key),
			_marker: PhantomData,
		}
	}
}

impl<T> fmt::Debug for SliceKey<T> {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.debug_tuple("SliceKey").field(&self.key).finish()
	}
}

impl<T> PartialEq for SliceKey<T> {
	fn eq(&self, other: &Self) -> bool {
		self.key == other.key
	}
}

impl<T> Eq for SliceKey<T> {}

impl<T> SliceKey<T>
where
	T: Any + Send + Sync,
{
	/// Creates a key with a unique name derived from `name`.
	pub fn new(name: &str) -> Self {
		Self {
			key: KeyRegistry::global().create_key(name).into(),
			_marker: PhantomData,
		}
	}

	/// Returns the unique key string.
	pub fn key(&self) -> &str {
		&self.key
	}

	/// Returns this slice's value in `state`, if present and of type `T`.
	pub fn get_slice_state(&self, state: &AppState) -> Option<Arc<T>> {
		state.get_slice_state_as::<T>(&self.key)
	}

	/// Returns the slice registered under this key in `state`.
	pub fn get_slice(&self, state: &AppState) -> Option<Slice> {
		state.get_slice_by_key(&self.key)
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn generated_keys_are_unique_per_name() {
		let registry = KeyRegistry::default();
		assert_eq!(registry.create_key("editor"), "editor$");
		assert_eq!(registry.create_key("editor"), "editor$1");
		assert_eq!(registry.create_key("editor"), "editor$2");
		assert_eq!(registry.create_key("files"), "files$");
	}

	#[test]
	fn keys_with_same_name_differ() {
		let a = SliceKey::<u32>::new("key-test-counter");
		let b = SliceKey::<u32>::new("key-test-counter");
		assert_ne!(a, b);
		assert_eq!(a.clone(), a);
		assert!(a.key().starts_with("key-test-counter$"));
	}
}
