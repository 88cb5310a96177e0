use std::sync::Arc;

use pretty_assertions::assert_eq;
use xeno_state::{Action, AppState, ApplicationStore, Slice, SliceFields, SliceKey, SliceState, StateOpts, StoreConfig, StoreOptions};

use crate::common::{self, Keys, OPEN_FILE, RENAME_WORKSPACE, Workspace};

const SET_STATUS: &str = "set-status";

fn status_slice(keys: &Keys, status: &SliceKey<String>) -> Slice {
	let reactor = keys
		.files
		.reactor()
		.select("count", |files: &Vec<String>| files.len())
		.on_change(|_, store, values| {
			let count = values.get::<Option<usize>>("count").copied().flatten().unwrap_or(0);
			store.dispatch(Action::with_value(SET_STATUS, format!("{count} open")))?;
			Ok(())
		});
	Slice::builder(status)
		.state(SliceState::new(|_, _| String::new()).apply(|action, status, _| {
			match (action.name.as_str(), action.value_as::<String>()) {
				(SET_STATUS, Some(text)) => Arc::new(text.clone()),
				_ => Arc::clone(status),
			}
		}))
		.side_effects([reactor.into_factory()])
		.build()
}

fn editor_store(keys: &Keys, status: &SliceKey<String>) -> ApplicationStore {
	let state = AppState::create(
		[
			common::workspace_slice(keys),
			common::files_slice(keys),
			common::recent_slice(keys),
			status_slice(keys, status),
		],
		StateOpts::none(),
	)
	.unwrap();
	ApplicationStore::create(StoreOptions::new(state).store_name("editor")).unwrap()
}

#[test]
fn opening_files_updates_recent_and_status() {
	common::init_tracing();
	let keys = Keys::new();
	let status = SliceKey::<String>::new("status");
	let store = editor_store(&keys, &status);

	store.dispatch(Action::with_value(OPEN_FILE, "src/lib.rs".to_string())).unwrap();
	store.dispatch(Action::with_value(OPEN_FILE, "src/store.rs".to_string())).unwrap();
	store.dispatch(Action::with_value(OPEN_FILE, "src/lib.rs".to_string())).unwrap();

	let state = store.state();
	assert_eq!(
		keys.files.get_slice_state(&state).as_deref(),
		Some(&vec!["src/lib.rs".to_string(), "src/store.rs".to_string()])
	);
	assert_eq!(
		keys.recent.get_slice_state(&state).as_deref(),
		Some(&vec!["src/lib.rs".to_string(), "src/store.rs".to_string()])
	);
	assert_eq!(status.get_slice_state(&state).as_deref().map(String::as_str), Some("2 open"));
}

#[test]
fn persisted_fields_restore_into_a_new_store() {
	let keys = Keys::new();
	let status = SliceKey::<String>::new("status");
	let store = editor_store(&keys, &status);
	store.dispatch(Action::with_value(RENAME_WORKSPACE, "notes".to_string())).unwrap();
	store.dispatch(Action::with_value(OPEN_FILE, "todo.md".to_string())).unwrap();

	let state = store.state();
	let slices = state.slices().to_vec();
	let fields: SliceFields = [
		("workspace".to_string(), state.get_slice_by_key(keys.workspace.key()).unwrap()),
		("files".to_string(), state.get_slice_by_key(keys.files.key()).unwrap()),
	]
	.into_iter()
	.collect();
	let json = state.state_to_json(&fields).unwrap();
	let mut names = json.keys().map(String::as_str).collect::<Vec<_>>();
	names.sort_unstable();
	assert_eq!(names, vec!["files", "workspace"]);

	let restored = AppState::state_from_json(slices, &json, &fields, StateOpts::none()).unwrap();
	assert_eq!(
		keys.workspace.get_slice_state(&restored).as_deref(),
		Some(&Workspace {
			version: 1,
			name: "notes".into()
		})
	);
	assert_eq!(
		keys.files.get_slice_state(&restored).as_deref(),
		Some(&vec!["todo.md".to_string()])
	);
	assert_eq!(keys.recent.get_slice_state(&restored).map(|r| r.len()), Some(0));

	let reopened = ApplicationStore::create(StoreOptions::new(restored)).unwrap();
	reopened.dispatch(Action::with_value(OPEN_FILE, "done.md".to_string())).unwrap();
	assert_eq!(keys.files.get_slice_state(&reopened.state()).map(|f| f.len()), Some(2));
}

#[test]
fn store_settings_load_from_toml() {
	let config = StoreConfig::from_toml_str(
		r#"
store_name = "sidebar"
disable_side_effects = true
"#,
	)
	.unwrap();
	let keys = Keys::new();
	let status = SliceKey::<String>::new("status");
	let state = AppState::create(
		[common::files_slice(&keys), status_slice(&keys, &status)],
		StateOpts::none(),
	)
	.unwrap();
	let store = ApplicationStore::create(StoreOptions::new(state).config(config)).unwrap();

	assert_eq!(store.store_name(), "sidebar");
	store.dispatch(Action::with_value(OPEN_FILE, "a.rs".to_string())).unwrap();
	assert_eq!(store.effect_count(), 0);
	assert_eq!(status.get_slice_state(&store.state()).as_deref().map(String::as_str), Some(""));
	assert_eq!(
		store
			.serialize_action(&Action::with_value(OPEN_FILE, "a.rs".to_string()))
			.map(|wire| wire.store_name),
		Some("sidebar".to_string())
	);
}
