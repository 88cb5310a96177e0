//! Schedulers driving deferred side-effect batches.
//!
//! A scheduler receives one job per batch and returns a cancel function. The
//! store never touches timers itself: cancelling a batch always goes through
//! the cancel function the scheduler handed back.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use futures::future::BoxFuture;
use parking_lot::Mutex;
use tokio_util::sync::CancellationToken;

use crate::effect::EffectPhase;

/// One deferred batch, ready to be polled.
pub type SchedulerJob = BoxFuture<'static, ()>;

/// Cancels a job that has not started yet.
pub type CancelFn = Box<dyn FnOnce() + Send>;

/// Decides when deferred batches run.
pub trait Scheduler: Send + Sync {
	/// Arranges for `job` to run later and returns its cancel function.
	fn schedule(&self, job: SchedulerJob) -> CancelFn;
}

impl<F> Scheduler for F
where
	F: Fn(SchedulerJob) -> CancelFn + Send + Sync,
{
	fn schedule(&self, job: SchedulerJob) -> CancelFn {
		self(job)
	}
}

/// Runs each job on the tokio runtime after a fixed delay.
///
/// Cancelling before the delay elapses drops the job; once started, a job
/// runs to completion and relies on its abort signal to stop early.
#[derive(Debug, Clone, Copy)]
pub struct TimeoutScheduler {
	delay: Duration,
}

impl TimeoutScheduler {
	/// Scheduler running each batch `delay` after it was scheduled.
	pub fn new(delay: Duration) -> Self {
		Self { delay }
	}

	/// Delay between scheduling and running a batch.
	pub fn delay(&self) -> Duration {
		self.delay
	}
}

impl Default for TimeoutScheduler {
	fn default() -> Self {
		Self::new(Duration::from_millis(20))
	}
}

impl Scheduler for TimeoutScheduler {
	fn schedule(&self, job: SchedulerJob) -> CancelFn {
		let cancel = CancellationToken::new();
		let task_cancel = cancel.clone();
		let delay = self.delay;
		crate::spawn::spawn(EffectPhase::DeferredUpdate, async move {
			tokio::select! {
				biased;
				_ = task_cancel.cancelled() => {
					tracing::trace!("scheduler.timeout.cancelled");
					return;
				}
				_ = tokio::time::sleep(delay) => {}
			}
			job.await;
		});
		Box::new(move || cancel.cancel())
	}
}

#[derive(Default)]
struct ManualQueue {
	pending: VecDeque<(u64, SchedulerJob)>,
	next_id: u64,
	scheduled_total: u64,
	cancelled_total: u64,
	completed_total: u64,
}

/// Scheduler that only runs jobs when asked to.
///
/// Useful for deterministic tests and for hosts that drive deferred work from
/// their own loop (for example once per frame).
#[derive(Clone, Default)]
pub struct ManualScheduler {
	queue: Arc<Mutex<ManualQueue>>,
}

impl ManualScheduler {
	pub fn new() -> Self {
		Self::default()
	}

	/// Jobs scheduled and neither run nor cancelled.
	pub fn pending_count(&self) -> usize {
		self.queue.lock().pending.len()
	}

	pub fn scheduled_total(&self) -> u64 {
		self.queue.lock().scheduled_total
	}

	/// Jobs removed by their cancel function before running.
	pub fn cancelled_total(&self) -> u64 {
		self.queue.lock().cancelled_total
	}

	pub fn completed_total(&self) -> u64 {
		self.queue.lock().completed_total
	}

	/// Runs pending jobs in scheduling order, including jobs scheduled while
	/// draining, until the queue is empty. Returns how many ran.
	pub async fn run_pending(&self) -> usize {
		let mut ran = 0;
		loop {
			let next = self.queue.lock().pending.pop_front();
			let Some((_, job)) = next else {
				break;
			};
			job.await;
			ran += 1;
			self.queue.lock().completed_total += 1;
		}
		if ran > 0 {
			tracing::trace!(ran, "scheduler.manual.drain");
		}
		ran
	}
}

impl Scheduler for ManualScheduler {
	fn schedule(&self, job: SchedulerJob) -> CancelFn {
		let id = {
			let mut queue = self.queue.lock();
			let id = queue.next_id;
			queue.next_id += 1;
			queue.scheduled_total += 1;
			queue.pending.push_back((id, job));
			id
		};
		let queue = Arc::clone(&self.queue);
		Box::new(move || {
			let mut queue = queue.lock();
			if let Some(pos) = queue.pending.iter().position(|(pending, _)| *pending == id) {
				queue.pending.remove(pos);
				queue.cancelled_total += 1;
			}
		})
	}
}
