use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use parking_lot::Mutex;
use xeno_state::{Action, AppState, ApplicationStore, EffectError, SideEffect, Slice, StateOpts, StoreOptions, TimeoutScheduler};

use crate::common::{self, Keys, OPEN_FILE};

/// Counts files each deferred batch indexed, sleeping between files so a
/// newer batch can abort it.
fn indexer_slice(keys: &Keys, indexed: &Arc<Mutex<Vec<Vec<String>>>>, runs: &Arc<AtomicUsize>) -> Slice {
	let files = keys.files.clone();
	let indexed = Arc::clone(indexed);
	let runs = Arc::clone(runs);
	Slice::named::<()>("indexer")
		.side_effect(move |_, _| {
			let files = files.clone();
			let indexed = Arc::clone(&indexed);
			let runs = Arc::clone(&runs);
			SideEffect::new().deferred_update(move |store, prev, signal| {
				let files = files.clone();
				let indexed = Arc::clone(&indexed);
				let runs = Arc::clone(&runs);
				async move {
					runs.fetch_add(1, Ordering::SeqCst);
					let before = files.get_slice_state(&prev).map_or(0, |f| f.len());
					let current = files.get_slice_state(&store.state()).unwrap_or_default();
					let mut batch = Vec::new();
					for path in current.iter().skip(before) {
						signal.guard(tokio::time::sleep(Duration::from_millis(5))).await?;
						batch.push(path.clone());
					}
					indexed.lock().push(batch);
					Ok::<_, EffectError>(())
				}
			})
		})
		.build()
}

fn indexer_store(keys: &Keys, indexed: &Arc<Mutex<Vec<Vec<String>>>>, runs: &Arc<AtomicUsize>) -> ApplicationStore {
	let state = AppState::create(
		[common::files_slice(keys), indexer_slice(keys, indexed, runs)],
		StateOpts::none(),
	)
	.unwrap();
	ApplicationStore::create(StoreOptions::new(state).scheduler(TimeoutScheduler::new(Duration::from_millis(20)))).unwrap()
}

fn open(store: &ApplicationStore, path: &str) {
	store.dispatch(Action::with_value(OPEN_FILE, path.to_string())).unwrap();
}

#[tokio::test(start_paused = true)]
async fn burst_of_dispatches_runs_one_batch() {
	let keys = Keys::new();
	let indexed = Arc::new(Mutex::new(Vec::new()));
	let runs = Arc::new(AtomicUsize::new(0));
	let store = indexer_store(&keys, &indexed, &runs);

	open(&store, "a.rs");
	open(&store, "b.rs");
	open(&store, "c.rs");
	tokio::time::sleep(Duration::from_millis(100)).await;

	assert_eq!(runs.load(Ordering::SeqCst), 1);
	assert_eq!(*indexed.lock(), vec![vec!["a.rs".to_string(), "b.rs".to_string(), "c.rs".to_string()]]);
}

#[tokio::test(start_paused = true)]
async fn later_batches_continue_from_last_seen_state() {
	let keys = Keys::new();
	let indexed = Arc::new(Mutex::new(Vec::new()));
	let runs = Arc::new(AtomicUsize::new(0));
	let store = indexer_store(&keys, &indexed, &runs);

	open(&store, "a.rs");
	tokio::time::sleep(Duration::from_millis(100)).await;
	open(&store, "b.rs");
	tokio::time::sleep(Duration::from_millis(100)).await;

	assert_eq!(
		*indexed.lock(),
		vec![vec!["a.rs".to_string()], vec!["b.rs".to_string()]]
	);
}

#[tokio::test(start_paused = true)]
async fn running_batch_is_aborted_by_newer_dispatch() {
	let keys = Keys::new();
	let indexed = Arc::new(Mutex::new(Vec::new()));
	let runs = Arc::new(AtomicUsize::new(0));
	let store = indexer_store(&keys, &indexed, &runs);

	open(&store, "a.rs");
	open(&store, "b.rs");
	// Batch starts at 20ms and needs 10ms for two files.
	tokio::time::sleep(Duration::from_millis(22)).await;
	assert_eq!(runs.load(Ordering::SeqCst), 1);
	open(&store, "c.rs");
	tokio::time::sleep(Duration::from_millis(100)).await;

	assert_eq!(runs.load(Ordering::SeqCst), 2);
	// The aborted batch recorded nothing; the next one saw its cached state as previous.
	assert_eq!(*indexed.lock(), vec![vec!["c.rs".to_string()]]);
}

#[tokio::test(start_paused = true)]
async fn destroy_cancels_pending_batch() {
	let keys = Keys::new();
	let indexed = Arc::new(Mutex::new(Vec::new()));
	let runs = Arc::new(AtomicUsize::new(0));
	let store = indexer_store(&keys, &indexed, &runs);

	open(&store, "a.rs");
	store.destroy();
	tokio::time::sleep(Duration::from_millis(100)).await;

	assert_eq!(runs.load(Ordering::SeqCst), 0);
	assert!(store.destroy_signal().is_aborted());
}
