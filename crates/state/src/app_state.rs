//! Immutable application state snapshots.
//!
//! An [`AppState`] pairs a shared [`AppStateConfig`] (built once per slice
//! list) with the current value of every slice that declares state. Applying
//! an action always yields a new snapshot over the same config; the previous
//! snapshot is never mutated.

use std::any::Any;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use indexmap::IndexMap;
use serde_json::{Map, Value};

use crate::action::Action;
use crate::error::{ConfigError, StateJsonError};
use crate::slice::{ApplyFn, InitFn, Slice, SliceValue};

/// Name-to-slice map selecting which slices take part in JSON (de)serialization.
///
/// The names become the keys of the JSON object. Slices missing from the map
/// are skipped on both sides.
pub type SliceFields = IndexMap<String, Slice>;

/// Opaque options handed to every `init` and effect factory.
#[derive(Clone, Default)]
pub struct StateOpts(Option<Arc<dyn Any + Send + Sync>>);

impl StateOpts {
	/// Wraps `opts` for every `init` and effect factory.
	pub fn new<T: Any + Send + Sync>(opts: T) -> Self {
		Self(Some(Arc::new(opts)))
	}

	/// No options.
	pub fn none() -> Self {
		Self(None)
	}

	/// Returns the options if they are a `T`.
	pub fn get<T: Any>(&self) -> Option<&T> {
		self.0.as_deref().and_then(|opts| opts.downcast_ref::<T>())
	}
}

impl fmt::Debug for StateOpts {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.debug_tuple("StateOpts").field(&self.0.is_some()).finish()
	}
}

/// One state-bearing slice, with its hooks bound.
#[derive(Clone)]
pub(crate) struct FieldDesc {
	pub name: Arc<str>,
	pub slice: Slice,
	pub init: InitFn,
	pub apply: Option<ApplyFn>,
}

/// Slice list shared by every snapshot derived from it.
pub struct AppStateConfig {
	slices: Vec<Slice>,
	slices_by_key: HashMap<Arc<str>, Slice>,
	fields: Vec<FieldDesc>,
	opts: StateOpts,
}

impl AppStateConfig {
	/// Validates and indexes `slices`.
	///
	/// The same slice instance listed twice is kept once; two distinct
	/// instances sharing a key is an error.
	pub fn new(slices: impl IntoIterator<Item = Slice>, opts: StateOpts) -> Result<Self, ConfigError> {
		let mut ordered = Vec::new();
		let mut slices_by_key: HashMap<Arc<str>, Slice> = HashMap::new();
		let mut fields = Vec::new();

		for slice in slices {
			if let Some(existing) = slices_by_key.get(slice.key()) {
				if existing.ptr_eq(&slice) {
					continue;
				}
				return Err(ConfigError::DuplicateSliceKey {
					key: slice.key().to_string(),
				});
			}
			let key: Arc<str> = slice.key().into();
			if let Some(desc) = slice.state_desc() {
				fields.push(FieldDesc {
					name: Arc::clone(&key),
					slice: slice.clone(),
					init: Arc::clone(&desc.init),
					apply: desc.apply.clone(),
				});
			}
			slices_by_key.insert(key, slice.clone());
			ordered.push(slice);
		}

		Ok(Self {
			slices: ordered,
			slices_by_key,
			fields,
			opts,
		})
	}

	/// Slices in declaration order.
	pub fn slices(&self) -> &[Slice] {
		&self.slices
	}

	/// Slice registered under `key`.
	pub fn slice_by_key(&self, key: &str) -> Option<&Slice> {
		self.slices_by_key.get(key)
	}

	/// Options every `init` and effect factory received.
	pub fn opts(&self) -> &StateOpts {
		&self.opts
	}

	/// Names of state-bearing fields in declaration order.
	pub fn field_names(&self) -> impl Iterator<Item = &str> {
		self.fields.iter().map(|field| &*field.name)
	}
}

impl fmt::Debug for AppStateConfig {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.debug_struct("AppStateConfig")
			.field("slices", &self.slices.iter().map(Slice::key).collect::<Vec<_>>())
			.field("fields", &self.fields.len())
			.finish()
	}
}

/// Immutable snapshot of every slice's value.
#[derive(Clone)]
pub struct AppState {
	config: Arc<AppStateConfig>,
	values: Arc<IndexMap<String, SliceValue>>,
}

impl AppState {
	/// Builds a fresh state, running every field's `init` in declaration order.
	pub fn create(slices: impl IntoIterator<Item = Slice>, opts: StateOpts) -> Result<Self, ConfigError> {
		let config = Arc::new(AppStateConfig::new(slices, opts)?);
		tracing::debug!(slices = config.slices.len(), fields = config.fields.len(), "state.create");
		Ok(Self::build(config, |field, state| (field.init)(state.opts(), state)))
	}

	/// Builds a state over `config`, computing each field in order. `compute`
	/// sees the partially built state.
	fn build<F>(config: Arc<AppStateConfig>, mut compute: F) -> Self
	where
		F: FnMut(&FieldDesc, &AppState) -> SliceValue,
	{
		let fields = config.fields.clone();
		let mut state = Self {
			values: Arc::new(IndexMap::with_capacity(fields.len())),
			config,
		};
		for field in &fields {
			let value = compute(field, &state);
			Arc::make_mut(&mut state.values).insert(field.name.to_string(), value);
		}
		state
	}

	/// Slice list this snapshot was built over.
	pub fn config(&self) -> &Arc<AppStateConfig> {
		&self.config
	}

	/// True when both snapshots derive from the same slice list.
	pub fn same_shape(&self, other: &AppState) -> bool {
		Arc::ptr_eq(&self.config, &other.config)
	}

	/// Slices in declaration order.
	pub fn slices(&self) -> &[Slice] {
		self.config.slices()
	}

	/// Options of the underlying [`AppStateConfig`].
	pub fn opts(&self) -> &StateOpts {
		self.config.opts()
	}

	/// Erased value of the slice under `key`; `None` for unknown or stateless slices.
	pub fn get_slice_state(&self, key: &str) -> Option<SliceValue> {
		self.values.get(key).cloned()
	}

	/// Typed value of the slice under `key`.
	pub fn get_slice_state_as<T: Any + Send + Sync>(&self, key: &str) -> Option<Arc<T>> {
		self.get_slice_state(key)?.downcast::<T>().ok()
	}

	/// Slice registered under `key`, including stateless ones.
	pub fn get_slice_by_key(&self, key: &str) -> Option<Slice> {
		self.config.slice_by_key(key).cloned()
	}

	/// Applies `action`, then lets every slice append follow-up actions until
	/// none does. Appended actions are tagged with the original action's name.
	pub fn apply_action(&self, action: &Action) -> AppState {
		let mut state = self.apply_single(action);
		let mut seen = vec![action.clone()];

		loop {
			let mut appended = false;
			for slice in self.config.slices() {
				let Some(mut next) = slice.append_action(&seen, &state) else {
					continue;
				};
				next.appended_from = Some(action.name.clone());
				tracing::trace!(slice = slice.key(), action = %next.name, appended_from = %action.name, "state.append_action");
				state = state.apply_single(&next);
				seen.push(next);
				appended = true;
			}
			if !appended {
				return state;
			}
		}
	}

	/// Runs every field's `apply` for one action. Fields without `apply`
	/// carry the previous value forward by reference.
	fn apply_single(&self, action: &Action) -> AppState {
		Self::build(Arc::clone(&self.config), |field, next| {
			let prev = self.values.get(&*field.name).cloned();
			match (&field.apply, prev) {
				(Some(apply), Some(prev)) => apply(action, &prev, next),
				(None, Some(prev)) => prev,
				(_, None) => (field.init)(next.opts(), next),
			}
		})
	}

	/// Rebuilds the state over a new slice list. Slice instances present in
	/// both lists keep their value; new ones are initialized.
	pub fn reconfigure(&self, slices: impl IntoIterator<Item = Slice>) -> Result<AppState, ConfigError> {
		let config = Arc::new(AppStateConfig::new(slices, self.config.opts.clone())?);
		tracing::debug!(
			before = self.config.slices.len(),
			after = config.slices.len(),
			"state.reconfigure"
		);
		Ok(Self::build(config, |field, next| {
			let carried = self
				.config
				.slice_by_key(&field.name)
				.filter(|old| old.ptr_eq(&field.slice))
				.and_then(|_| self.values.get(&*field.name).cloned());
			carried.unwrap_or_else(|| (field.init)(next.opts(), next))
		}))
	}

	/// Serializes the slices named in `slice_fields` that declare a JSON encoder.
	pub fn state_to_json(&self, slice_fields: &SliceFields) -> Result<Map<String, Value>, StateJsonError> {
		let mut json = Map::new();
		for (name, slice) in slice_fields {
			let Some(to_json) = slice.state_desc().and_then(|desc| desc.to_json.as_ref()) else {
				continue;
			};
			let Some(value) = self.values.get(slice.key()) else {
				continue;
			};
			let encoded = to_json(value).map_err(|source| StateJsonError {
				field: name.clone(),
				source,
			})?;
			json.insert(name.clone(), encoded);
		}
		Ok(json)
	}

	/// Restores a state from JSON produced by [`state_to_json`](Self::state_to_json).
	///
	/// A field is decoded when its slice instance appears in `slice_fields`,
	/// declares a decoder, and `json` holds its name; otherwise it is
	/// initialized.
	pub fn state_from_json(
		slices: impl IntoIterator<Item = Slice>,
		json: &Map<String, Value>,
		slice_fields: &SliceFields,
		opts: StateOpts,
	) -> Result<AppState, ConfigError> {
		let config = Arc::new(AppStateConfig::new(slices, opts)?);
		Ok(Self::build(config, |field, state| {
			let restored = slice_fields
				.iter()
				.filter(|(_, slice)| slice.ptr_eq(&field.slice))
				.find_map(|(name, slice)| {
					let from_json = slice.state_desc()?.from_json.as_ref()?;
					let value = json.get(name)?;
					Some(from_json(state.opts(), value, state))
				});
			restored.unwrap_or_else(|| (field.init)(state.opts(), state))
		}))
	}
}

impl fmt::Debug for AppState {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.debug_struct("AppState")
			.field("fields", &self.values.keys().collect::<Vec<_>>())
			.finish()
	}
}
