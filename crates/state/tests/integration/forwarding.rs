use std::sync::Arc;

use parking_lot::Mutex;
use pretty_assertions::assert_eq;
use xeno_state::{Action, AppState, ApplicationStore, SerializedAction, StateOpts, StoreOptions};

use crate::common::{self, Keys, OPEN_FILE, RENAME_WORKSPACE};

/// Two stores over the same slices; `main` forwards every serializable
/// action it applies to `worker` over a JSON channel.
fn linked_stores(keys: &Keys) -> (ApplicationStore, ApplicationStore, Arc<Mutex<Vec<String>>>) {
	let slices = || [common::workspace_slice(keys), common::files_slice(keys), common::recent_slice(keys)];
	let worker = ApplicationStore::create(
		StoreOptions::new(AppState::create(slices(), StateOpts::none()).unwrap()).store_name("worker"),
	)
	.unwrap();

	let wire_log = Arc::new(Mutex::new(Vec::new()));
	let log = Arc::clone(&wire_log);
	let peer = worker.clone();
	let main = ApplicationStore::create(
		StoreOptions::new(AppState::create(slices(), StateOpts::none()).unwrap())
			.store_name("main")
			.dispatch_action(move |store, action| {
				if let Some(wire) = store.serialize_action(&action)
					&& let Ok(text) = serde_json::to_string(&wire)
				{
					log.lock().push(text.clone());
					if let Ok(wire) = serde_json::from_str::<SerializedAction>(&text)
						&& let Some(parsed) = peer.parse_action(&wire)
					{
						peer.dispatch(parsed)?;
					}
				}
				store.apply_action(&action)
			}),
	)
	.unwrap();
	(main, worker, wire_log)
}

#[test]
fn forwarded_actions_replay_on_peer() {
	let keys = Keys::new();
	let (main, worker, wire_log) = linked_stores(&keys);

	main.dispatch(Action::with_value(OPEN_FILE, "lib.rs".to_string())).unwrap();
	main.dispatch(Action::with_value(RENAME_WORKSPACE, "shared".to_string())).unwrap();
	main.dispatch("not-serializable").unwrap();

	for store in [&main, &worker] {
		let state = store.state();
		assert_eq!(keys.files.get_slice_state(&state).as_deref(), Some(&vec!["lib.rs".to_string()]));
		assert_eq!(keys.recent.get_slice_state(&state).as_deref(), Some(&vec!["lib.rs".to_string()]));
		assert_eq!(keys.workspace.get_slice_state(&state).map(|ws| ws.name.clone()), Some("shared".to_string()));
	}
	assert_eq!(
		*wire_log.lock(),
		vec![
			r#"{"name":"open-file","storeName":"main","serializedValue":"lib.rs"}"#.to_string(),
			r#"{"name":"rename-workspace","storeName":"main","serializedValue":"shared"}"#.to_string(),
		]
	);
}

#[test]
fn foreign_actions_are_not_forwarded_back() {
	let keys = Keys::new();
	let (main, worker, _) = linked_stores(&keys);

	let wire = main
		.serialize_action(&Action::with_value(OPEN_FILE, "x.rs".to_string()))
		.unwrap();
	let parsed = worker.parse_action(&wire).unwrap();
	assert_eq!(parsed.from_store.as_deref(), Some("main"));
	assert!(parsed.id.is_none());
	assert!(worker.serialize_action(&parsed).is_none());
	assert!(main.serialize_action(&parsed).is_none());
}
