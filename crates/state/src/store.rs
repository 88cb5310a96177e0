//! The application store: owns the current [`AppState`], drives the effect
//! pipeline and routes effect failures.
//!
//! A dispatch runs in three steps:
//!
//! 1. Stamp the action with `<store_name>-<counter>` and hand it to the
//!    dispatch hook (by default [`ApplicationStore::apply_action`]).
//! 2. The next state is swapped in, rebuilding effects when the slice list
//!    changed, then every effect's `update` runs in declaration order.
//! 3. If a scheduler is configured, the in-flight deferred batch is aborted
//!    and a fresh [`DeferredSideEffectsRunner`] is armed.
//!
//! Every synchronous pass carries a run id. A dispatch issued from inside an
//! `update` runs its own pass to completion and bumps the id, which truncates
//! the outer pass when control returns to it.
//!
//! The read-apply-swap step runs under a commit lock, so dispatches from
//! several threads never lose updates. The lock is released before any effect
//! hook runs, so `update` hooks may dispatch.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;

use parking_lot::{Mutex, RwLock};
use tokio::time::Instant;

use crate::abort::{AbortController, AbortSignal, RunClock};
use crate::action::{Action, ActionSerializer, SerializedAction};
use crate::app_state::AppState;
use crate::config::StoreConfig;
use crate::effect::{EffectInstance, EffectPhase, EffectSet, UpdateContext};
use crate::error::{ConfigError, EffectError, Result, StoreError};
use crate::runner::DeferredSideEffectsRunner;
use crate::scheduler::Scheduler;
use crate::slice::Slice;


/// Replaces the default apply-then-update step of [`ApplicationStore::dispatch`].
///
/// Receives the stamped action. Implementations usually end with
/// `store.apply_action(&action)`.
pub type DispatchActionFn = Arc<dyn Fn(&ApplicationStore, Action) -> Result<()> + Send + Sync>;

/// Store-wide error hook, tried before any slice. Returning true handles the error.
pub type RootErrorHandler = Arc<dyn Fn(&EffectError, &ApplicationStore) -> bool + Send + Sync>;

/// Construction options for [`ApplicationStore::create`].
pub struct StoreOptions {
	state: AppState,
	config: StoreConfig,
	dispatch_action: Option<DispatchActionFn>,
	scheduler: Option<Arc<dyn Scheduler>>,
	on_error: Option<RootErrorHandler>,
}

impl StoreOptions {
	/// Options over `state` with default settings and no hooks.
	pub fn new(state: AppState) -> Self {
		Self {
			state,
			config: StoreConfig::default(),
			dispatch_action: None,
			scheduler: None,
			on_error: None,
		}
	}

	/// Replaces every declarative setting at once.
	pub fn config(mut self, config: StoreConfig) -> Self {
		self.config = config;
		self
	}

	/// Name used in action ids and on serialized actions.
	pub fn store_name(mut self, name: impl Into<String>) -> Self {
		self.config.store_name = name.into();
		self
	}

	/// Skips effect construction entirely. Actions still apply.
	pub fn disable_side_effects(mut self, disable: bool) -> Self {
		self.config.disable_side_effects = disable;
		self
	}

	/// Intercepts dispatch after id stamping.
	pub fn dispatch_action<F>(mut self, dispatch: F) -> Self
	where
		F: Fn(&ApplicationStore, Action) -> Result<()> + Send + Sync + 'static,
	{
		self.dispatch_action = Some(Arc::new(dispatch));
		self
	}

	/// Scheduler for deferred batches. Required when any effect declares
	/// `deferred_update`.
	pub fn scheduler<S>(mut self, scheduler: S) -> Self
	where
		S: Scheduler + 'static,
	{
		self.scheduler = Some(Arc::new(scheduler));
		self
	}

	/// Store-wide error hook, tried before any slice handler.
	pub fn on_error<F>(mut self, on_error: F) -> Self
	where
		F: Fn(&EffectError, &ApplicationStore) -> bool + Send + Sync + 'static,
	{
		self.on_error = Some(Arc::new(on_error));
		self
	}
}

#[derive(Default)]
struct ErrorGuard {
	count: u32,
	last_seen: Option<Instant>,
}

struct StoreInner {
	name: String,
	state: RwLock<AppState>,
	/// Serializes read-apply-swap. Never held while hooks that receive the
	/// store run.
	commit_lock: Mutex<()>,
	dispatch_action: Option<DispatchActionFn>,
	scheduler: Option<Arc<dyn Scheduler>>,
	on_error: Option<RootErrorHandler>,
	disable_side_effects: bool,
	error_sample: u32,
	error_threshold: Duration,
	destroyed: AtomicBool,
	action_counter: AtomicU64,
	run_clock: RunClock,
	effects: Mutex<Arc<EffectSet>>,
	runner: Mutex<Option<Arc<DeferredSideEffectsRunner>>>,
	destroy_controller: AbortController,
	serializers: RwLock<HashMap<String, ActionSerializer>>,
	error_guard: Mutex<ErrorGuard>,
}

/// Serializers and effects built for a state that is not live yet.
struct PreparedEffects {
	serializers: HashMap<String, ActionSerializer>,
	effects: Arc<EffectSet>,
}

/// What an effect swap displaced, retired once the commit lock is released.
struct EffectSwap {
	live: Arc<EffectSet>,
	retired: Arc<EffectSet>,
	runner: Option<Arc<DeferredSideEffectsRunner>>,
}

/// Shared handle to a store. Clones refer to the same store.
#[derive(Clone)]
pub struct ApplicationStore {
	inner: Arc<StoreInner>,
}

impl ApplicationStore {
	/// Builds a store and instantiates effects against `opts.state`.
	///
	/// Fails on invalid config, duplicate action serializers, or a
	/// `deferred_update` effect without a scheduler.
	pub fn create(opts: StoreOptions) -> Result<Self> {
		opts.config.validate()?;
		let StoreOptions {
			state,
			config,
			dispatch_action,
			scheduler,
			on_error,
		} = opts;
		let error_threshold = config.infinite_error_threshold();

		let store = Self {
			inner: Arc::new(StoreInner {
				name: config.store_name,
				state: RwLock::new(state.clone()),
				commit_lock: Mutex::new(()),
				dispatch_action,
				scheduler,
				on_error,
				disable_side_effects: config.disable_side_effects,
				error_sample: config.infinite_error_sample,
				error_threshold,
				destroyed: AtomicBool::new(false),
				action_counter: AtomicU64::new(0),
				run_clock: RunClock::new(),
				effects: Mutex::new(Arc::new(EffectSet::empty())),
				runner: Mutex::new(None),
				destroy_controller: AbortController::new(),
				serializers: RwLock::new(HashMap::new()),
				error_guard: Mutex::new(ErrorGuard::default()),
			}),
		};
		let prepared = store.prepare_side_effects(&state)?;
		let swap = store.install(prepared);
		store.finish_swap(swap);
		tracing::debug!(store = %store.inner.name, slices = state.slices().len(), "store.create");
		Ok(store)
	}

	/// Name stamped on action ids and serialized actions.
	pub fn store_name(&self) -> &str {
		&self.inner.name
	}

	/// Current state snapshot.
	pub fn state(&self) -> AppState {
		self.inner.state.read().clone()
	}

	/// True once [`destroy`](Self::destroy) ran or the error breaker tripped.
	pub fn is_destroyed(&self) -> bool {
		self.inner.destroyed.load(Ordering::Acquire)
	}

	/// Number of live side-effect instances.
	pub fn effect_count(&self) -> usize {
		self.inner.effects.lock().len()
	}

	/// Fires when the store is destroyed.
	pub fn destroy_signal(&self) -> AbortSignal {
		self.inner.destroy_controller.signal()
	}

	pub(crate) fn effect_set(&self) -> Arc<EffectSet> {
		Arc::clone(&self.inner.effects.lock())
	}

	/// Dispatches `action`. A no-op once the store is destroyed.
	///
	/// Errors are unhandled effect failures from the synchronous pass, a
	/// tripped infinite-error breaker, or configuration errors raised while
	/// rebuilding effects.
	pub fn dispatch(&self, action: impl Into<Action>) -> Result<()> {
		if self.is_destroyed() {
			return Ok(());
		}
		let mut action = action.into();
		let counter = self.inner.action_counter.fetch_add(1, Ordering::AcqRel);
		action.id = Some(format!("{}-{counter}", self.inner.name));
		tracing::trace!(store = %self.inner.name, action = %action.name, id = ?action.id, "store.dispatch");

		match &self.inner.dispatch_action {
			Some(dispatch) => dispatch(self, action),
			None => self.apply_action(&action),
		}
	}

	/// Applies `action` to the current state and runs the effect pass.
	///
	/// Reading the current state, applying and swapping happen under the
	/// commit lock, so prefer this over `update_state(state().apply_action(..))`
	/// inside a dispatch hook.
	pub fn apply_action(&self, action: &Action) -> Result<()> {
		if self.is_destroyed() {
			return Ok(());
		}
		let state = self.commit(|current| Ok(current.apply_action(action)))?;
		self.run_side_effects(&state)
	}

	/// Replaces the current state and runs the synchronous effect pass.
	///
	/// A state built over a different slice list gets its effects built
	/// against it first; the old effects are torn down only once that
	/// succeeded. On failure the store keeps its previous state and effects.
	pub fn update_state(&self, state: AppState) -> Result<()> {
		if self.is_destroyed() {
			return Ok(());
		}
		let state = self.commit(move |_| Ok(state))?;
		self.run_side_effects(&state)
	}

	/// Swaps in a new slice list. Slice instances present before keep their
	/// value; new ones are initialized; effects are rebuilt. Atomic: a
	/// configuration error leaves the store as it was.
	pub fn reconfigure(&self, slices: impl IntoIterator<Item = Slice>) -> Result<()> {
		if self.is_destroyed() {
			return Ok(());
		}
		let state = self.commit(|current| Ok(current.reconfigure(slices)?))?;
		self.run_side_effects(&state)
	}

	/// Computes the next state from the current one and makes it live.
	fn commit<F>(&self, next: F) -> Result<AppState>
	where
		F: FnOnce(&AppState) -> Result<AppState>,
	{
		let (state, swap) = {
			let _commit = self.inner.commit_lock.lock();
			let current = self.state();
			let state = next(&current)?;
			let swap = if current.same_shape(&state) {
				None
			} else {
				tracing::debug!(store = %self.inner.name, "store.state.reshaped");
				let prepared = self.prepare_side_effects(&state)?;
				Some(self.install(prepared))
			};
			*self.inner.state.write() = state.clone();
			(state, swap)
		};
		if let Some(swap) = swap {
			self.finish_swap(swap);
		}
		Ok(state)
	}

	fn run_side_effects(&self, state: &AppState) -> Result<()> {
		let run_id = self.inner.run_clock.tick();
		let effects = self.effect_set();

		for instance in &effects.instances {
			if self.inner.run_clock.current() != run_id {
				tracing::trace!(run_id, "store.effects.truncated");
				return Ok(());
			}
			if self.is_destroyed() {
				return Ok(());
			}
			if !instance.effect.has_update() {
				continue;
			}
			let prev = effects.swap_last_seen(instance, state);
			let cx = UpdateContext {
				store: self,
				state: state.clone(),
				prev_state: &prev,
				slice_key: &instance.key,
			};
			tracing::trace!(slice = %instance.key, run_id, "store.effect.update");
			if let Some(Err(error)) = instance.effect.run_update(&cx)
				&& let Err(err) = self.handle_error(error, Some(&*instance.key))
			{
				self.abort_deferred();
				return Err(err);
			}
		}

		if self.inner.run_clock.current() != run_id || self.is_destroyed() {
			return Ok(());
		}
		self.schedule_deferred(&effects)
	}

	/// Aborts the in-flight batch and arms a new one over `effects`.
	fn schedule_deferred(&self, effects: &Arc<EffectSet>) -> Result<()> {
		let Some(scheduler) = &self.inner.scheduler else {
			return Ok(());
		};
		if !effects.has_deferred_updates() || !Arc::ptr_eq(effects, &self.effect_set()) {
			return Ok(());
		}
		let runner = Arc::new(DeferredSideEffectsRunner::new(Arc::clone(effects), Arc::clone(scheduler)));
		let previous = self.inner.runner.lock().replace(Arc::clone(&runner));
		if let Some(previous) = previous {
			previous.abort();
		}
		runner.run(self)
	}

	fn abort_deferred(&self) {
		let runner = self.inner.runner.lock().take();
		if let Some(runner) = runner {
			runner.abort();
		}
	}

	/// Builds action serializers and instantiates every slice's effect
	/// factories against `state` without touching the live store.
	fn prepare_side_effects(&self, state: &AppState) -> Result<PreparedEffects> {
		let mut serializers = HashMap::new();
		for slice in state.slices() {
			for (name, serializer) in slice.actions() {
				if serializers.insert(name.clone(), serializer.clone()).is_some() {
					return Err(ConfigError::DuplicateActionSerializer {
						action: name.clone(),
						slice: slice.key().to_string(),
					}
					.into());
				}
			}
		}

		if self.inner.disable_side_effects {
			tracing::debug!(store = %self.inner.name, "store.setup.effects_disabled");
			return Ok(PreparedEffects {
				serializers,
				effects: Arc::new(EffectSet::empty()),
			});
		}

		let mut instances: Vec<EffectInstance> = Vec::new();
		for slice in state.slices() {
			for factory in slice.side_effects() {
				let effect = factory(state, state.opts());
				if effect.has_deferred_update() && self.inner.scheduler.is_none() {
					for built in &instances {
						built.effect.run_destroy();
					}
					effect.run_destroy();
					return Err(ConfigError::MissingScheduler {
						slice: slice.key().to_string(),
					}
					.into());
				}
				instances.push(EffectInstance {
					index: instances.len(),
					key: slice.key().into(),
					initial_state: state.clone(),
					effect,
				});
			}
		}

		let teardown = AbortController::child_of(&self.inner.destroy_controller.signal());
		Ok(PreparedEffects {
			serializers,
			effects: Arc::new(EffectSet::new(instances, teardown)),
		})
	}

	/// Makes `prepared` live and hands back what it displaced.
	fn install(&self, prepared: PreparedEffects) -> EffectSwap {
		*self.inner.serializers.write() = prepared.serializers;
		let retired = std::mem::replace(&mut *self.inner.effects.lock(), Arc::clone(&prepared.effects));
		let runner = self.inner.runner.lock().take();
		tracing::debug!(store = %self.inner.name, effects = prepared.effects.len(), "store.setup");
		EffectSwap {
			live: prepared.effects,
			retired,
			runner,
		}
	}

	/// Tears down the displaced effects and starts `deferred_once` hooks of
	/// the live ones.
	fn finish_swap(&self, swap: EffectSwap) {
		if let Some(runner) = swap.runner {
			runner.abort();
		}
		self.retire(&swap.retired);

		for instance in &swap.live.instances {
			let Some(fut) = instance.effect.start_deferred_once(self.clone(), swap.live.teardown.signal()) else {
				continue;
			};
			let store = self.clone();
			let key = Arc::clone(&instance.key);
			crate::spawn::spawn(EffectPhase::DeferredOnce, async move {
				if let Err(error) = fut.await {
					store.handle_detached_error(error, &key, EffectPhase::DeferredOnce);
				}
			});
		}
	}

	fn retire(&self, effects: &EffectSet) {
		effects.teardown.abort();
		if !effects.instances.is_empty() {
			tracing::debug!(store = %self.inner.name, effects = effects.len(), "store.teardown");
		}
		for instance in &effects.instances {
			instance.effect.run_destroy();
		}
	}

	fn teardown_side_effects(&self) {
		self.abort_deferred();
		let effects = std::mem::replace(&mut *self.inner.effects.lock(), Arc::new(EffectSet::empty()));
		self.retire(&effects);
	}

	/// Destroys the store: aborts deferred work, fires the destroy signal and
	/// runs every effect's `destroy`. Idempotent.
	pub fn destroy(&self) {
		if self.inner.destroyed.swap(true, Ordering::AcqRel) {
			return;
		}
		tracing::debug!(store = %self.inner.name, "store.destroy");
		self.inner.destroy_controller.abort();
		self.teardown_side_effects();
	}

	/// Routes an effect failure.
	///
	/// Cancellation is swallowed. Otherwise the root handler, then the
	/// originating slice, then every other slice in declaration order get a
	/// chance to handle it; the first returning true stops propagation. An
	/// error nobody handles comes back as [`StoreError::Unhandled`].
	///
	/// Every `infinite_error_sample`-th error is timed against the previous
	/// sample; two samples within the threshold destroy the store and fail
	/// with [`StoreError::InfiniteErrors`].
	pub fn handle_error(&self, error: EffectError, slice_key: Option<&str>) -> Result<()> {
		if self.is_destroyed() {
			return Ok(());
		}
		if self.trip_breaker() {
			tracing::warn!(store = %self.inner.name, error = %error, "store.infinite_errors");
			self.destroy();
			return Err(StoreError::InfiniteErrors);
		}
		if error.is_abort() {
			tracing::trace!(slice = ?slice_key, "store.error.aborted");
			return Ok(());
		}

		if let Some(on_error) = &self.inner.on_error
			&& on_error(&error, self)
		{
			return Ok(());
		}

		let state = self.state();
		let origin = slice_key.and_then(|key| state.get_slice_by_key(key));
		if let Some(origin) = &origin
			&& origin.on_error(&error, self)
		{
			return Ok(());
		}
		for slice in state.slices() {
			if origin.as_ref().is_some_and(|origin| origin.ptr_eq(slice)) {
				continue;
			}
			if slice.on_error(&error, self) {
				return Ok(());
			}
		}

		Err(StoreError::Unhandled {
			slice: slice_key.map(str::to_string),
			source: error,
		})
	}

	fn trip_breaker(&self) -> bool {
		let mut guard = self.inner.error_guard.lock();
		guard.count = guard.count.wrapping_add(1);
		if guard.count % self.inner.error_sample != 0 {
			return false;
		}
		let now = Instant::now();
		let tripped = guard
			.last_seen
			.is_some_and(|last| now.duration_since(last) <= self.inner.error_threshold);
		guard.last_seen = Some(now);
		tripped
	}

	/// Error path for work with no caller to propagate to.
	pub(crate) fn handle_detached_error(&self, error: EffectError, slice_key: &str, phase: EffectPhase) {
		if let Err(err) = self.handle_error(error, Some(slice_key)) {
			tracing::error!(
				store = %self.inner.name,
				slice = slice_key,
				effect_phase = phase.as_str(),
				error = %err,
				"store.effect.unhandled"
			);
		}
	}

	/// Encodes `action` for another store.
	///
	/// `None` when no slice registered a codec for the name, the codec refuses
	/// this instance, or the action was itself parsed from another store.
	pub fn serialize_action(&self, action: &Action) -> Option<SerializedAction> {
		if action.is_foreign() {
			tracing::debug!(action = %action.name, from_store = ?action.from_store, "store.serialize.foreign");
			return None;
		}
		let serializer = self.inner.serializers.read().get(&action.name).cloned()?;
		let serialized_value = match &action.value {
			None => None,
			Some(_) => Some(serializer.to_json(action)?),
		};
		Some(SerializedAction {
			name: action.name.clone(),
			store_name: self.inner.name.clone(),
			serialized_value,
		})
	}

	/// Decodes an action produced by [`serialize_action`](Self::serialize_action),
	/// marking it with its source store. Only an absent `serializedValue`
	/// means no payload; an explicit `null` goes through the codec.
	pub fn parse_action(&self, serialized: &SerializedAction) -> Option<Action> {
		let serializer = self.inner.serializers.read().get(&serialized.name).cloned()?;
		let value = match &serialized.serialized_value {
			None => None,
			Some(json) => Some(serializer.from_json(json)?),
		};
		Some(Action {
			value,
			from_store: Some(serialized.store_name.clone()),
			..Action::new(serialized.name.clone())
		})
	}
}

impl fmt::Debug for ApplicationStore {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.debug_struct("ApplicationStore")
			.field("name", &self.inner.name)
			.field("destroyed", &self.is_destroyed())
			.field("effects", &self.effect_count())
			.field("has_scheduler", &self.inner.scheduler.is_some())
			.finish()
	}
}
