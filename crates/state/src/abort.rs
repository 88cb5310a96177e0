use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use tokio_util::sync::CancellationToken;

use crate::error::EffectError;

/// Monotonic counter shared by clones.
///
/// Backs effect-pass run ids and side-effect instance ids.
#[derive(Debug, Default, Clone)]
pub(crate) struct RunClock {
	next: Arc<AtomicU64>,
}

impl RunClock {
	/// Creates a new clock whose first tick is 1.
	pub fn new() -> Self {
		Self::default()
	}

	/// Advances the clock and returns the new value.
	pub fn tick(&self) -> u64 {
		self.next.fetch_add(1, Ordering::AcqRel).wrapping_add(1)
	}

	/// Returns the most recent tick without advancing.
	pub fn current(&self) -> u64 {
		self.next.load(Ordering::Acquire)
	}
}

/// Owner side of a cancellation scope.
#[derive(Debug, Clone, Default)]
pub struct AbortController {
	token: CancellationToken,
}

impl AbortController {
	/// Creates a new, live controller.
	pub fn new() -> Self {
		Self::default()
	}

	/// Creates a controller that is aborted whenever `parent` is.
	pub fn child_of(parent: &AbortSignal) -> Self {
		Self {
			token: parent.token.child_token(),
		}
	}

	/// Returns the signal handed to cancellable work.
	pub fn signal(&self) -> AbortSignal {
		AbortSignal {
			token: self.token.clone(),
		}
	}

	/// Requests cancellation. Idempotent.
	pub fn abort(&self) {
		self.token.cancel();
	}

	/// Returns true once [`abort`](Self::abort) has been called.
	pub fn is_aborted(&self) -> bool {
		self.token.is_cancelled()
	}
}

/// Read side of a cancellation scope, passed to every suspendable effect.
///
/// Effects check it at each await point; [`check`](Self::check) turns an abort
/// into [`EffectError::Aborted`] so it can be propagated with `?`.
#[derive(Debug, Clone)]
pub struct AbortSignal {
	token: CancellationToken,
}

impl AbortSignal {
	/// Returns true when cancellation was requested.
	pub fn is_aborted(&self) -> bool {
		self.token.is_cancelled()
	}

	/// Fails with [`EffectError::Aborted`] when cancelled.
	pub fn check(&self) -> Result<(), EffectError> {
		if self.is_aborted() { Err(EffectError::Aborted) } else { Ok(()) }
	}

	/// Resolves when cancellation is requested.
	pub async fn aborted(&self) {
		self.token.cancelled().await;
	}

	/// Runs `fut` until it completes or the signal fires, whichever is first.
	pub async fn guard<F, T>(&self, fut: F) -> Result<T, EffectError>
	where
		F: std::future::Future<Output = T>,
	{
		tokio::select! {
			biased;
			_ = self.token.cancelled() => Err(EffectError::Aborted),
			value = fut => Ok(value),
		}
	}
}
