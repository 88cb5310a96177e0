//! Slices shared by the store integration tests: a workspace name, an
//! open-files list and a recent-files list fed by `append_action`.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use xeno_state::{Action, ActionSerializer, Slice, SliceKey, SliceState};

pub const OPEN_FILE: &str = "open-file";
pub const RENAME_WORKSPACE: &str = "rename-workspace";
pub const RECORD_RECENT: &str = "record-recent";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Workspace {
	pub version: u32,
	pub name: String,
}

impl Default for Workspace {
	fn default() -> Self {
		Self {
			version: 1,
			name: "scratch".into(),
		}
	}
}

pub struct Keys {
	pub workspace: SliceKey<Workspace>,
	pub files: SliceKey<Vec<String>>,
	pub recent: SliceKey<Vec<String>>,
}

impl Keys {
	pub fn new() -> Self {
		Self::default()
	}
}

impl Default for Keys {
	fn default() -> Self {
		Self {
			workspace: SliceKey::new("workspace"),
			files: SliceKey::new("open-files"),
			recent: SliceKey::new("recent-files"),
		}
	}
}

pub fn init_tracing() {
	let _ = tracing_subscriber::fmt().with_test_writer().try_init();
}

pub fn workspace_slice(keys: &Keys) -> Slice {
	Slice::builder(&keys.workspace)
		.state(
			SliceState::new(|_, _| Workspace::default())
				.apply(|action, ws, _| match (action.name.as_str(), action.value_as::<String>()) {
					(RENAME_WORKSPACE, Some(name)) => Arc::new(Workspace {
						name: name.clone(),
						..(**ws).clone()
					}),
					_ => Arc::clone(ws),
				})
				.serde_json(),
		)
		.action(RENAME_WORKSPACE, ActionSerializer::serde::<String>())
		.build()
}

pub fn files_slice(keys: &Keys) -> Slice {
	Slice::builder(&keys.files)
		.state(
			SliceState::new(|_, _| Vec::new())
				.apply(|action, files, _| match (action.name.as_str(), action.value_as::<String>()) {
					(OPEN_FILE, Some(path)) if !files.contains(path) => {
						let mut files = (**files).clone();
						files.push(path.clone());
						Arc::new(files)
					}
					_ => Arc::clone(files),
				})
				.serde_json(),
		)
		.action(OPEN_FILE, ActionSerializer::serde::<String>())
		.build()
}

/// Records every opened file, most recent first, through a follow-up action.
pub fn recent_slice(keys: &Keys) -> Slice {
	Slice::builder(&keys.recent)
		.state(
			SliceState::new(|_, _| Vec::new()).apply(|action, recent, _| match (action.name.as_str(), action.value_as::<String>()) {
				(RECORD_RECENT, Some(path)) => {
					let mut recent: Vec<String> = recent.iter().filter(|p| *p != path).cloned().collect();
					recent.insert(0, path.clone());
					Arc::new(recent)
				}
				_ => Arc::clone(recent),
			}),
		)
		.append_action(|actions, _| {
			let last = actions.last()?;
			if last.name != OPEN_FILE {
				return None;
			}
			let path = last.value_as::<String>()?;
			Some(Action::with_value(RECORD_RECENT, path.clone()))
		})
		.build()
}
