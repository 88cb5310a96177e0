//! Selector-diff effects.
//!
//! A [`Reactor`] computes a set of named values from every new state and
//! calls its callback with all of them whenever at least one differs from
//! the previous computation. It is an ordinary `update` effect, so it runs
//! in the synchronous pass with the same ordering and error routing.

use std::any::Any;
use std::fmt;
use std::sync::Arc;

use indexmap::IndexMap;
use parking_lot::Mutex;

use crate::app_state::{AppState, StateOpts};
use crate::effect::{EffectFactory, SideEffect};
use crate::error::EffectResult;
use crate::key::SliceKey;
use crate::store::ApplicationStore;

type Selected = Arc<dyn Any + Send + Sync>;
type SelectFn = Box<dyn Fn(&AppState) -> Selected + Send + Sync>;
type EqFn = fn(&Selected, &Selected) -> bool;
type CallbackFn = Box<dyn Fn(&AppState, &ApplicationStore, &SelectedValues) -> EffectResult + Send + Sync>;

struct Selector {
	name: String,
	select: SelectFn,
	eq: EqFn,
}

fn typed_eq<T: PartialEq + Any>(a: &Selected, b: &Selected) -> bool {
	match (a.downcast_ref::<T>(), b.downcast_ref::<T>()) {
		(Some(a), Some(b)) => a == b,
		_ => false,
	}
}

/// Values computed by a reactor's selectors, by name.
#[derive(Clone, Default)]
pub struct SelectedValues {
	values: IndexMap<String, Selected>,
}

impl SelectedValues {
	/// Value selected under `name`, if it is a `T`.
	pub fn get<T: Any>(&self, name: &str) -> Option<&T> {
		self.values.get(name).and_then(|value| value.downcast_ref::<T>())
	}

	pub fn names(&self) -> impl Iterator<Item = &str> {
		self.values.keys().map(String::as_str)
	}

	pub fn len(&self) -> usize {
		self.values.len()
	}

	pub fn is_empty(&self) -> bool {
		self.values.is_empty()
	}
}

impl fmt::Debug for SelectedValues {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.debug_set().entries(self.values.keys()).finish()
	}
}

struct ReactorInner {
	selectors: Vec<Selector>,
	callback: CallbackFn,
}

impl ReactorInner {
	fn select_all(&self, state: &AppState) -> SelectedValues {
		SelectedValues {
			values: self
				.selectors
				.iter()
				.map(|selector| (selector.name.clone(), (selector.select)(state)))
				.collect(),
		}
	}

	fn changed(&self, prev: &SelectedValues, current: &SelectedValues) -> bool {
		self.selectors.iter().any(|selector| {
			match (prev.values.get(&selector.name), current.values.get(&selector.name)) {
				(Some(prev), Some(current)) => !(selector.eq)(prev, current),
				_ => true,
			}
		})
	}
}

/// Selector map plus change callback, installable as a side effect.
#[derive(Clone)]
pub struct Reactor {
	inner: Arc<ReactorInner>,
}

impl Reactor {
	/// Starts a reactor over the whole state.
	pub fn builder() -> ReactorBuilder {
		ReactorBuilder::default()
	}

	/// Instantiates the effect. The first comparison is against the values
	/// selected from `initial`.
	pub fn side_effect(&self, initial: &AppState) -> SideEffect {
		let inner = Arc::clone(&self.inner);
		let prev = Mutex::new(inner.select_all(initial));
		SideEffect::new().update(move |cx| {
			let current = inner.select_all(cx.state());
			let changed = {
				let mut prev = prev.lock();
				let changed = inner.changed(&prev, &current);
				*prev = current.clone();
				changed
			};
			if !changed {
				return Ok(());
			}
			tracing::trace!(slice = cx.slice_key(), selected = current.len(), "reactor.changed");
			(inner.callback)(cx.state(), cx.store(), &current)
		})
	}

	/// Factory form, for [`crate::SliceBuilder::side_effects`].
	pub fn into_factory(self) -> EffectFactory {
		Arc::new(move |state: &AppState, _: &StateOpts| self.side_effect(state))
	}
}

/// Builder for [`Reactor`].
#[derive(Default)]
pub struct ReactorBuilder {
	selectors: Vec<Selector>,
}

impl ReactorBuilder {
	/// Adds a selector under `name`. Selecting the same name twice keeps the
	/// latest selector.
	pub fn select<T, F>(mut self, name: impl Into<String>, select: F) -> Self
	where
		T: PartialEq + Any + Send + Sync,
		F: Fn(&AppState) -> T + Send + Sync + 'static,
	{
		let name = name.into();
		self.selectors.retain(|selector| selector.name != name);
		self.selectors.push(Selector {
			name,
			select: Box::new(move |state| Arc::new(select(state)) as Selected),
			eq: typed_eq::<T>,
		});
		self
	}

	/// Adds a selector over one slice's value. Selects `None` while the slice
	/// is absent from the state.
	pub fn select_slice<S, T, F>(self, name: impl Into<String>, key: &SliceKey<S>, select: F) -> Self
	where
		S: Any + Send + Sync,
		T: PartialEq + Any + Send + Sync,
		F: Fn(&S) -> T + Send + Sync + 'static,
	{
		let key = key.clone();
		self.select(name, move |state| key.get_slice_state(state).map(|value| select(&value)))
	}

	/// Finishes the reactor with the callback run on change.
	pub fn on_change<F>(self, callback: F) -> Reactor
	where
		F: Fn(&AppState, &ApplicationStore, &SelectedValues) -> EffectResult + Send + Sync + 'static,
	{
		Reactor {
			inner: Arc::new(ReactorInner {
				selectors: self.selectors,
				callback: Box::new(callback),
			}),
		}
	}
}

/// Reactor builder whose selectors read one slice's value.
pub struct SliceReactorBuilder<S> {
	key: SliceKey<S>,
	builder: ReactorBuilder,
}

impl<S> SliceReactorBuilder<S>
where
	S: Any + Send + Sync,
{
	pub fn select<T, F>(mut self, name: impl Into<String>, select: F) -> Self
	where
		T: PartialEq + Any + Send + Sync,
		F: Fn(&S) -> T + Send + Sync + 'static,
	{
		self.builder = self.builder.select_slice(name, &self.key, select);
		self
	}

	pub fn on_change<F>(self, callback: F) -> Reactor
	where
		F: Fn(&AppState, &ApplicationStore, &SelectedValues) -> EffectResult + Send + Sync + 'static,
	{
		self.builder.on_change(callback)
	}
}

impl<S> SliceKey<S>
where
	S: Any + Send + Sync,
{
	/// Starts a reactor selecting from this slice.
	pub fn reactor(&self) -> SliceReactorBuilder<S> {
		SliceReactorBuilder {
			key: self.clone(),
			builder: ReactorBuilder::default(),
		}
	}
}

#[cfg(test)]
mod tests {
	use std::sync::atomic::{AtomicUsize, Ordering};

	use super::*;
	use crate::slice::{Slice, SliceState};
	use crate::store::StoreOptions;

	#[derive(Debug, Clone, PartialEq)]
	struct Counters {
		a: u32,
		b: u32,
	}

	fn counters_slice(key: &SliceKey<Counters>, reactor: Reactor) -> Slice {
		Slice::builder(key)
			.state(
				SliceState::new(|_, _| Counters { a: 0, b: 0 }).apply(|action, prev, _| match action.name.as_str() {
					"bump-a" => Arc::new(Counters { a: prev.a + 1, ..**prev }),
					"bump-b" => Arc::new(Counters { b: prev.b + 1, ..**prev }),
					_ => Arc::clone(prev),
				}),
			)
			.side_effects([reactor.into_factory()])
			.build()
	}

	#[test]
	fn fires_only_when_a_selected_value_changes() {
		let key = SliceKey::<Counters>::new("reactor-counters");
		let calls = Arc::new(Mutex::new(Vec::new()));
		let seen = Arc::clone(&calls);
		let reactor = key.reactor().select("a", |c: &Counters| c.a).on_change(move |_, _, values| {
			seen.lock().push(*values.get::<Option<u32>>("a").unwrap());
			Ok(())
		});

		let state = AppState::create([counters_slice(&key, reactor)], StateOpts::none()).unwrap();
		let store = ApplicationStore::create(StoreOptions::new(state)).unwrap();

		store.dispatch("bump-b").unwrap();
		store.dispatch("noop").unwrap();
		assert!(calls.lock().is_empty());

		store.dispatch("bump-a").unwrap();
		store.dispatch("bump-b").unwrap();
		store.dispatch("bump-a").unwrap();
		assert_eq!(*calls.lock(), vec![Some(1), Some(2)]);
	}

	#[test]
	fn callback_gets_full_mapping() {
		let key = SliceKey::<Counters>::new("reactor-full");
		let fired = Arc::new(AtomicUsize::new(0));
		let counter = Arc::clone(&fired);
		let lookup = key.clone();
		let reactor = Reactor::builder()
			.select("a", move |state| lookup.get_slice_state(state).map(|c| c.a))
			.select_slice("b", &key, |c: &Counters| c.b)
			.on_change(move |_, _, values| {
				counter.fetch_add(1, Ordering::SeqCst);
				assert_eq!(values.len(), 2);
				assert_eq!(values.get::<Option<u32>>("a"), Some(&Some(0)));
				assert_eq!(values.get::<Option<u32>>("b"), Some(&Some(1)));
				Ok(())
			});

		let state = AppState::create([counters_slice(&key, reactor)], StateOpts::none()).unwrap();
		let store = ApplicationStore::create(StoreOptions::new(state)).unwrap();
		store.dispatch("bump-b").unwrap();
		assert_eq!(fired.load(Ordering::SeqCst), 1);
	}
}
