//! Side effects: per-slice reactive logic instantiated at store setup.
//!
//! A [`SideEffect`] bundles up to four optional hooks:
//!
//! * `update`: synchronous, runs after every state transition in slice
//!   declaration order. Must not suspend; may dispatch.
//! * `deferred_update`: asynchronous, batched by the store's scheduler and
//!   cancelled when a newer batch starts.
//! * `deferred_once`: asynchronous, started once at setup against the
//!   store-wide teardown signal.
//! * `destroy`: synchronous cleanup when effects are torn down.

use std::any::Any;
use std::future::Future;
use std::sync::Arc;

use futures::FutureExt;
use futures::future::BoxFuture;
use parking_lot::Mutex;

use crate::abort::{AbortController, AbortSignal};
use crate::action::Action;
use crate::app_state::{AppState, StateOpts};
use crate::error::{EffectResult, Result};
use crate::store::ApplicationStore;

/// Future returned by asynchronous effect hooks.
pub type EffectFuture = BoxFuture<'static, EffectResult>;

/// Builds one [`SideEffect`] from the state at setup time.
pub type EffectFactory = Arc<dyn Fn(&AppState, &StateOpts) -> SideEffect + Send + Sync>;

type UpdateFn = Box<dyn Fn(&UpdateContext<'_>) -> EffectResult + Send + Sync>;
type DeferredUpdateFn = Box<dyn Fn(ApplicationStore, AppState, AbortSignal) -> EffectFuture + Send + Sync>;
type DeferredOnceFn = Box<dyn Fn(ApplicationStore, AbortSignal) -> EffectFuture + Send + Sync>;
type DestroyFn = Box<dyn Fn() + Send + Sync>;

/// Hook set produced by an [`EffectFactory`].
///
/// Hooks take `&self`-style closures; effect-local state lives behind the
/// closure's own synchronization since `update` may be re-entered by a
/// dispatch it triggers.
#[derive(Default)]
pub struct SideEffect {
	update: Option<UpdateFn>,
	deferred_update: Option<DeferredUpdateFn>,
	deferred_once: Option<DeferredOnceFn>,
	destroy: Option<DestroyFn>,
}

impl SideEffect {
	/// Creates an effect with no hooks.
	pub fn new() -> Self {
		Self::default()
	}

	/// Sets the synchronous hook.
	pub fn update<F>(mut self, update: F) -> Self
	where
		F: Fn(&UpdateContext<'_>) -> EffectResult + Send + Sync + 'static,
	{
		self.update = Some(Box::new(update));
		self
	}

	/// Sets the scheduled hook. Receives the store, the state this effect last
	/// saw in a deferred batch, and the batch's abort signal.
	pub fn deferred_update<F, Fut>(mut self, deferred: F) -> Self
	where
		F: Fn(ApplicationStore, AppState, AbortSignal) -> Fut + Send + Sync + 'static,
		Fut: Future<Output = EffectResult> + Send + 'static,
	{
		self.deferred_update = Some(Box::new(move |store, prev, signal| deferred(store, prev, signal).boxed()));
		self
	}

	/// Sets the hook started once at setup.
	pub fn deferred_once<F, Fut>(mut self, once: F) -> Self
	where
		F: Fn(ApplicationStore, AbortSignal) -> Fut + Send + Sync + 'static,
		Fut: Future<Output = EffectResult> + Send + 'static,
	{
		self.deferred_once = Some(Box::new(move |store, signal| once(store, signal).boxed()));
		self
	}

	/// Sets the teardown hook.
	pub fn destroy<F>(mut self, destroy: F) -> Self
	where
		F: Fn() + Send + Sync + 'static,
	{
		self.destroy = Some(Box::new(destroy));
		self
	}

	/// True when a synchronous hook is set.
	pub fn has_update(&self) -> bool {
		self.update.is_some()
	}

	/// True when a scheduled hook is set; the store then needs a scheduler.
	pub fn has_deferred_update(&self) -> bool {
		self.deferred_update.is_some()
	}

	/// True when a setup-time hook is set.
	pub fn has_deferred_once(&self) -> bool {
		self.deferred_once.is_some()
	}

	pub(crate) fn run_update(&self, cx: &UpdateContext<'_>) -> Option<EffectResult> {
		self.update.as_ref().map(|update| update(cx))
	}

	pub(crate) fn start_deferred_update(&self, store: ApplicationStore, prev: AppState, signal: AbortSignal) -> Option<EffectFuture> {
		self.deferred_update.as_ref().map(|deferred| deferred(store, prev, signal))
	}

	pub(crate) fn start_deferred_once(&self, store: ApplicationStore, signal: AbortSignal) -> Option<EffectFuture> {
		self.deferred_once.as_ref().map(|once| once(store, signal))
	}

	pub(crate) fn run_destroy(&self) {
		if let Some(destroy) = &self.destroy {
			destroy();
		}
	}
}

/// Arguments of one synchronous `update` call.
pub struct UpdateContext<'a> {
	pub(crate) store: &'a ApplicationStore,
	pub(crate) state: AppState,
	pub(crate) prev_state: &'a AppState,
	pub(crate) slice_key: &'a str,
}

impl UpdateContext<'_> {
	/// Store running this pass.
	pub fn store(&self) -> &ApplicationStore {
		self.store
	}

	/// Current state.
	pub fn state(&self) -> &AppState {
		&self.state
	}

	/// State this effect saw on its previous `update` (its initial state on
	/// the first call).
	pub fn prev_state(&self) -> &AppState {
		self.prev_state
	}

	/// Key of the slice owning this effect.
	pub fn slice_key(&self) -> &str {
		self.slice_key
	}

	/// Owning slice's current value.
	pub fn slice_state<T: Any + Send + Sync>(&self) -> Option<Arc<T>> {
		self.state.get_slice_state_as::<T>(self.slice_key)
	}

	/// Owning slice's value in [`prev_state`](Self::prev_state).
	pub fn prev_slice_state<T: Any + Send + Sync>(&self) -> Option<Arc<T>> {
		self.prev_state.get_slice_state_as::<T>(self.slice_key)
	}

	/// True when the owning slice's value is not reference-equal to the one
	/// in the previous state.
	pub fn slice_changed(&self) -> bool {
		match (self.state.get_slice_state(self.slice_key), self.prev_state.get_slice_state(self.slice_key)) {
			(Some(current), Some(prev)) => !Arc::ptr_eq(&current, &prev),
			(None, None) => false,
			_ => true,
		}
	}

	/// Dispatches through the store.
	pub fn dispatch(&self, action: impl Into<Action>) -> Result<()> {
		self.store.dispatch(action)
	}
}

/// Hook kinds, used for instrumentation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EffectPhase {
	/// Synchronous `update`, run on every dispatch.
	Update,
	/// `deferred_update`, run in scheduled batches.
	DeferredUpdate,
	/// `deferred_once`, started at setup.
	DeferredOnce,
	/// `destroy`, run at teardown.
	Destroy,
}

impl EffectPhase {
	pub(crate) const fn as_str(self) -> &'static str {
		match self {
			Self::Update => "update",
			Self::DeferredUpdate => "deferred_update",
			Self::DeferredOnce => "deferred_once",
			Self::Destroy => "destroy",
		}
	}
}

/// One live effect, created by `setup`.
pub(crate) struct EffectInstance {
	/// Stable arena slot within its [`EffectSet`].
	pub index: usize,
	pub key: Arc<str>,
	pub initial_state: AppState,
	pub effect: SideEffect,
}

/// Arena of effects built by one setup, with their last-seen-state caches.
///
/// The deferred cache is shared by every runner created over this set, so a
/// fresh runner continues from where the previous (aborted) one left off.
pub(crate) struct EffectSet {
	pub instances: Vec<EffectInstance>,
	last_seen: Mutex<Vec<Option<AppState>>>,
	deferred_last_seen: Mutex<Vec<Option<AppState>>>,
	/// Aborted when this set is torn down; parent of every `deferred_once` signal.
	pub teardown: AbortController,
}

impl EffectSet {
	pub fn new(instances: Vec<EffectInstance>, teardown: AbortController) -> Self {
		let len = instances.len();
		Self {
			instances,
			last_seen: Mutex::new(vec![None; len]),
			deferred_last_seen: Mutex::new(vec![None; len]),
			teardown,
		}
	}

	pub fn empty() -> Self {
		Self::new(Vec::new(), AbortController::new())
	}

	pub fn len(&self) -> usize {
		self.instances.len()
	}

	pub fn has_deferred_updates(&self) -> bool {
		self.instances.iter().any(|instance| instance.effect.has_deferred_update())
	}

	/// Records `current` as seen by the synchronous hook of `instance` and
	/// returns what it saw before.
	pub fn swap_last_seen(&self, instance: &EffectInstance, current: &AppState) -> AppState {
		Self::swap(&self.last_seen, instance, current)
	}

	/// Deferred counterpart of [`swap_last_seen`](Self::swap_last_seen).
	pub fn swap_deferred_last_seen(&self, instance: &EffectInstance, current: &AppState) -> AppState {
		Self::swap(&self.deferred_last_seen, instance, current)
	}

	fn swap(cache: &Mutex<Vec<Option<AppState>>>, instance: &EffectInstance, current: &AppState) -> AppState {
		let mut cache = cache.lock();
		cache[instance.index]
			.replace(current.clone())
			.unwrap_or_else(|| instance.initial_state.clone())
	}
}
