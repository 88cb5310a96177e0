use std::future::Future;
use std::sync::OnceLock;

use tokio::runtime::{Builder, Handle, Runtime};
use tokio::task::JoinHandle;

use crate::effect::EffectPhase;

static FALLBACK: OnceLock<Runtime> = OnceLock::new();

/// Single-worker runtime for effects started outside any tokio context, for
/// example a store created from a plain `#[test]` or a GUI thread.
fn fallback() -> Handle {
	FALLBACK
		.get_or_init(|| {
			Builder::new_multi_thread()
				.enable_all()
				.worker_threads(1)
				.thread_name("xeno-state-effects")
				.build()
				.expect("failed to build xeno-state fallback tokio runtime")
		})
		.handle()
		.clone()
}

/// Spawns effect work on the ambient runtime, falling back to a shared
/// background runtime.
pub(crate) fn spawn<F>(phase: EffectPhase, fut: F) -> JoinHandle<F::Output>
where
	F: Future + Send + 'static,
	F::Output: Send + 'static,
{
	let handle = Handle::try_current().unwrap_or_else(|_| fallback());
	tracing::trace!(effect_phase = phase.as_str(), "effect.spawn");
	handle.spawn(fut)
}
