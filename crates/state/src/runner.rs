//! One-shot executor for the deferred half of the effect pipeline.

use std::sync::Arc;

use futures::FutureExt;
use futures::future::join_all;
use parking_lot::Mutex;

use crate::abort::{AbortController, AbortSignal};
use crate::effect::{EffectPhase, EffectSet};
use crate::error::{Result, StoreError};
use crate::scheduler::{CancelFn, Scheduler};
use crate::store::ApplicationStore;

#[derive(Default)]
struct RunnerState {
	started: bool,
	cancel: Option<CancelFn>,
}

/// Runs every effect's `deferred_update` once, when the scheduler says so.
///
/// Single use: [`run`](Self::run) fails if called twice and does nothing if
/// the runner was already aborted. [`abort`](Self::abort) fires the batch's
/// abort signal and then calls the scheduler's cancel function, so a batch
/// that has not started is dropped by the scheduler itself and a running
/// batch observes the signal.
pub struct DeferredSideEffectsRunner {
	effects: Arc<EffectSet>,
	scheduler: Arc<dyn Scheduler>,
	controller: AbortController,
	state: Mutex<RunnerState>,
}

impl DeferredSideEffectsRunner {
	pub(crate) fn new(effects: Arc<EffectSet>, scheduler: Arc<dyn Scheduler>) -> Self {
		Self {
			effects,
			scheduler,
			controller: AbortController::new(),
			state: Mutex::new(RunnerState::default()),
		}
	}

	/// Hands the batch to the scheduler.
	pub fn run(&self, store: &ApplicationStore) -> Result<()> {
		{
			let mut state = self.state.lock();
			if state.started {
				return Err(StoreError::RunnerAlreadyStarted);
			}
			state.started = true;
		}
		if self.controller.is_aborted() {
			return Ok(());
		}

		let job = execute(Arc::clone(&self.effects), store.clone(), self.controller.signal()).boxed();
		tracing::trace!(effects = self.effects.len(), "runner.schedule");
		let cancel = self.scheduler.schedule(job);

		let mut state = self.state.lock();
		if self.controller.is_aborted() {
			drop(state);
			cancel();
		} else {
			state.cancel = Some(cancel);
		}
		Ok(())
	}

	/// Cancels the batch. Idempotent.
	pub fn abort(&self) {
		if self.controller.is_aborted() {
			return;
		}
		self.controller.abort();
		let cancel = self.state.lock().cancel.take();
		if let Some(cancel) = cancel {
			tracing::trace!("runner.abort");
			cancel();
		}
	}

	pub fn is_aborted(&self) -> bool {
		self.controller.is_aborted()
	}
}

/// Body of one scheduled batch.
///
/// Effects start in declaration order, each checking the signal first, and
/// then run concurrently. Each future is wrapped on its own so one failure
/// does not stop the others.
async fn execute(effects: Arc<EffectSet>, store: ApplicationStore, signal: AbortSignal) {
	let mut running = Vec::new();
	for instance in &effects.instances {
		if signal.is_aborted() {
			tracing::trace!("runner.aborted_before_start");
			break;
		}
		if !instance.effect.has_deferred_update() {
			continue;
		}
		let prev = effects.swap_deferred_last_seen(instance, &store.state());
		let Some(fut) = instance.effect.start_deferred_update(store.clone(), prev, signal.clone()) else {
			continue;
		};
		let store = store.clone();
		let key = Arc::clone(&instance.key);
		running.push(async move {
			if let Err(error) = fut.await {
				store.handle_detached_error(error, &key, EffectPhase::DeferredUpdate);
			}
		});
	}
	join_all(running).await;
}
