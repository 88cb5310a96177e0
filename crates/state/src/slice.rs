//! Slice descriptors.
//!
//! A [`Slice`] is an immutable capability interpreted by [`AppState`] and
//! [`ApplicationStore`]: it owns one field of state (optional), derives
//! follow-up actions, contributes side effects and action codecs, and may
//! recover errors. Slices are built through [`SliceBuilder`] with typed
//! closures and erased once built so heterogeneous slices share one list.

use std::any::Any;
use std::fmt;
use std::sync::Arc;

use indexmap::IndexMap;
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;

use crate::action::{Action, ActionSerializer};
use crate::app_state::{AppState, StateOpts};
use crate::effect::{EffectFactory, SideEffect};
use crate::error::EffectError;
use crate::key::{KeyRegistry, SliceKey};
use crate::store::ApplicationStore;

/// Type-erased slice value as stored in [`AppState`].
pub type SliceValue = Arc<dyn Any + Send + Sync>;

pub(crate) type InitFn = Arc<dyn Fn(&StateOpts, &AppState) -> SliceValue + Send + Sync>;
pub(crate) type ApplyFn = Arc<dyn Fn(&Action, &SliceValue, &AppState) -> SliceValue + Send + Sync>;
pub(crate) type ToJsonFn = Arc<dyn Fn(&SliceValue) -> Result<Value, serde_json::Error> + Send + Sync>;
pub(crate) type FromJsonFn = Arc<dyn Fn(&StateOpts, &Value, &AppState) -> SliceValue + Send + Sync>;
pub(crate) type AppendActionFn = Arc<dyn Fn(&[Action], &AppState) -> Option<Action> + Send + Sync>;
pub(crate) type OnErrorFn = Arc<dyn Fn(&EffectError, &ApplicationStore) -> bool + Send + Sync>;

/// Erased state descriptor consumed by [`AppState`].
#[derive(Clone)]
pub(crate) struct ErasedState {
	pub init: InitFn,
	pub apply: Option<ApplyFn>,
	pub to_json: Option<ToJsonFn>,
	pub from_json: Option<FromJsonFn>,
}

type TypedInit<T> = Arc<dyn Fn(&StateOpts, &AppState) -> T + Send + Sync>;
type TypedApply<T> = Arc<dyn Fn(&Action, &Arc<T>, &AppState) -> Arc<T> + Send + Sync>;
type TypedToJson<T> = Arc<dyn Fn(&T) -> Result<Value, serde_json::Error> + Send + Sync>;
type TypedFromJson<T> = Arc<dyn Fn(&StateOpts, &Value, &AppState) -> T + Send + Sync>;

/// State descriptor for a slice holding a `T`.
///
/// `apply` receives the previous value as an `Arc<T>`; returning that same
/// `Arc` keeps the value reference-equal across the transition, which effect
/// diffing relies on. Without `apply` the value is carried forward unchanged.
pub struct SliceState<T> {
	init: TypedInit<T>,
	apply: Option<TypedApply<T>>,
	to_json: Option<TypedToJson<T>>,
	from_json: Option<TypedFromJson<T>>,
}

impl<T> SliceState<T>
where
	T: Any + Send + Sync,
{
	/// Creates a descriptor from its initializer.
	pub fn new<F>(init: F) -> Self
	where
		F: Fn(&StateOpts, &AppState) -> T + Send + Sync + 'static,
	{
		Self {
			init: Arc::new(init),
			apply: None,
			to_json: None,
			from_json: None,
		}
	}

	/// Sets the reducer.
	pub fn apply<F>(mut self, apply: F) -> Self
	where
		F: Fn(&Action, &Arc<T>, &AppState) -> Arc<T> + Send + Sync + 'static,
	{
		self.apply = Some(Arc::new(apply));
		self
	}

	/// Sets the JSON encoder.
	pub fn state_to_json<F>(mut self, to_json: F) -> Self
	where
		F: Fn(&T) -> Result<Value, serde_json::Error> + Send + Sync + 'static,
	{
		self.to_json = Some(Arc::new(to_json));
		self
	}

	/// Sets the JSON decoder. It is expected to validate any version tag it
	/// embeds and fall back to an initial value itself.
	pub fn state_from_json<F>(mut self, from_json: F) -> Self
	where
		F: Fn(&StateOpts, &Value, &AppState) -> T + Send + Sync + 'static,
	{
		self.from_json = Some(Arc::new(from_json));
		self
	}

	/// Wires both JSON directions through serde. Undecodable JSON restores the
	/// initial value.
	pub fn serde_json(self) -> Self
	where
		T: Serialize + DeserializeOwned,
	{
		let init = Arc::clone(&self.init);
		self.state_to_json(|value| serde_json::to_value(value))
			.state_from_json(move |opts, json, state| match serde_json::from_value::<T>(json.clone()) {
				Ok(value) => value,
				Err(error) => {
					tracing::debug!(%error, "slice.state_from_json.fallback");
					init(opts, state)
				}
			})
	}

	fn erase(self) -> ErasedState {
		let init = self.init;
		let apply = self.apply.map(|apply| -> ApplyFn {
			Arc::new(move |action: &Action, prev: &SliceValue, state: &AppState| {
				match Arc::clone(prev).downcast::<T>() {
					Ok(typed) => apply(action, &typed, state) as SliceValue,
					Err(untouched) => untouched,
				}
			})
		});
		let to_json = self.to_json.map(|to_json| -> ToJsonFn {
			Arc::new(move |value: &SliceValue| match value.downcast_ref::<T>() {
				Some(typed) => to_json(typed),
				None => Ok(Value::Null),
			})
		});
		let from_json = self.from_json.map(|from_json| -> FromJsonFn {
			Arc::new(move |opts: &StateOpts, json: &Value, state: &AppState| Arc::new(from_json(opts, json, state)) as SliceValue)
		});
		ErasedState {
			init: Arc::new(move |opts: &StateOpts, state: &AppState| Arc::new(init(opts, state)) as SliceValue),
			apply,
			to_json,
			from_json,
		}
	}
}

pub(crate) struct SliceInner {
	pub key: Arc<str>,
	pub state: Option<ErasedState>,
	pub append_action: Option<AppendActionFn>,
	pub side_effects: Vec<EffectFactory>,
	pub actions: IndexMap<String, ActionSerializer>,
	pub on_error: Option<OnErrorFn>,
}

/// Immutable, cheaply clonable slice descriptor.
///
/// Clones share identity; two slices are the same instance iff
/// [`Slice::ptr_eq`] holds.
#[derive(Clone)]
pub struct Slice {
	inner: Arc<SliceInner>,
}

impl Slice {
	/// Starts a slice claiming `key`.
	pub fn builder<T>(key: &SliceKey<T>) -> SliceBuilder<T>
	where
		T: Any + Send + Sync,
	{
		SliceBuilder::with_key(key.key().into())
	}

	/// Starts a slice under a freshly generated key derived from `name`.
	pub fn named<T>(name: &str) -> SliceBuilder<T>
	where
		T: Any + Send + Sync,
	{
		SliceBuilder::with_key(KeyRegistry::global().create_key(name).into())
	}

	/// Returns the slice key.
	pub fn key(&self) -> &str {
		&self.inner.key
	}

	/// Returns true if both handles refer to the same slice instance.
	pub fn ptr_eq(&self, other: &Slice) -> bool {
		Arc::ptr_eq(&self.inner, &other.inner)
	}

	/// Returns true if the slice contributes a field to [`AppState`].
	pub fn has_state(&self) -> bool {
		self.inner.state.is_some()
	}

	/// Returns true if the slice derives follow-up actions.
	pub fn has_append_action(&self) -> bool {
		self.inner.append_action.is_some()
	}

	/// Number of side-effect factories declared.
	pub fn side_effect_count(&self) -> usize {
		self.inner.side_effects.len()
	}

	/// Action names this slice can (de)serialize.
	pub fn action_names(&self) -> impl Iterator<Item = &str> {
		self.inner.actions.keys().map(String::as_str)
	}

	/// Runs the slice's error hook. Returns true if it handled `error`.
	pub fn on_error(&self, error: &EffectError, store: &ApplicationStore) -> bool {
		self.inner.on_error.as_ref().is_some_and(|on_error| on_error(error, store))
	}

	pub(crate) fn state_desc(&self) -> Option<&ErasedState> {
		self.inner.state.as_ref()
	}

	pub(crate) fn append_action(&self, actions: &[Action], state: &AppState) -> Option<Action> {
		self.inner.append_action.as_ref().and_then(|append| append(actions, state))
	}

	pub(crate) fn side_effects(&self) -> &[EffectFactory] {
		&self.inner.side_effects
	}

	pub(crate) fn actions(&self) -> &IndexMap<String, ActionSerializer> {
		&self.inner.actions
	}
}

impl fmt::Debug for Slice {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.debug_struct("Slice")
			.field("key", &self.inner.key)
			.field("has_state", &self.has_state())
			.field("side_effects", &self.inner.side_effects.len())
			.field("actions", &self.inner.actions.len())
			.finish()
	}
}

/// Builder for [`Slice`].
pub struct SliceBuilder<T> {
	key: Arc<str>,
	state: Option<SliceState<T>>,
	append_action: Option<AppendActionFn>,
	side_effects: Vec<EffectFactory>,
	actions: IndexMap<String, ActionSerializer>,
	on_error: Option<OnErrorFn>,
}

impl<T> SliceBuilder<T>
where
	T: Any + Send + Sync,
{
	fn with_key(key: Arc<str>) -> Self {
		Self {
			key,
			state: None,
			append_action: None,
			side_effects: Vec::new(),
			actions: IndexMap::new(),
			on_error: None,
		}
	}

	/// Declares the slice's field of state.
	pub fn state(mut self, state: SliceState<T>) -> Self {
		self.state = Some(state);
		self
	}

	/// Sets the follow-up action hook. It sees every action applied so far in
	/// the current dispatch and the latest state.
	///
	/// There is no cycle limit: a hook that keeps returning actions loops forever.
	pub fn append_action<F>(mut self, append: F) -> Self
	where
		F: Fn(&[Action], &AppState) -> Option<Action> + Send + Sync + 'static,
	{
		self.append_action = Some(Arc::new(append));
		self
	}

	/// Adds a side-effect factory.
	pub fn side_effect<F>(mut self, factory: F) -> Self
	where
		F: Fn(&AppState, &StateOpts) -> SideEffect + Send + Sync + 'static,
	{
		self.side_effects.push(Arc::new(factory));
		self
	}

	/// Adds prebuilt factories.
	pub fn side_effects(mut self, factories: impl IntoIterator<Item = EffectFactory>) -> Self {
		self.side_effects.extend(factories);
		self
	}

	/// Registers the wire codec for `name`.
	pub fn action(mut self, name: impl Into<String>, serializer: ActionSerializer) -> Self {
		self.actions.insert(name.into(), serializer);
		self
	}

	/// Sets the slice-local recovery hook; returning true stops propagation.
	pub fn on_error<F>(mut self, on_error: F) -> Self
	where
		F: Fn(&EffectError, &ApplicationStore) -> bool + Send + Sync + 'static,
	{
		self.on_error = Some(Arc::new(on_error));
		self
	}

	/// Finishes the slice.
	pub fn build(self) -> Slice {
		Slice {
			inner: Arc::new(SliceInner {
				key: self.key,
				state: self.state.map(SliceState::erase),
				append_action: self.append_action,
				side_effects: self.side_effects,
				actions: self.actions,
				on_error: self.on_error,
			}),
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn builder_records_capabilities() {
		let key = SliceKey::<u32>::new("slice-builder");
		let slice = Slice::builder(&key)
			.state(SliceState::new(|_, _| 0))
			.append_action(|_, _| None)
			.action("bump", ActionSerializer::serde::<u32>())
			.side_effect(|_, _| SideEffect::new())
			.build();

		assert_eq!(slice.key(), key.key());
		assert!(slice.has_state());
		assert!(slice.has_append_action());
		assert_eq!(slice.side_effect_count(), 1);
		assert_eq!(slice.action_names().collect::<Vec<_>>(), vec!["bump"]);
		assert!(slice.ptr_eq(&slice.clone()));
	}

	#[test]
	fn named_slices_get_distinct_keys() {
		let a = Slice::named::<()>("slice-named").build();
		let b = Slice::named::<()>("slice-named").build();
		assert_ne!(a.key(), b.key());
		assert!(!a.ptr_eq(&b));
		assert!(!a.has_state());
	}
}
