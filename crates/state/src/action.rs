//! Actions and their JSON wire codecs.

use std::any::Any;
use std::fmt;
use std::sync::Arc;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

/// Type-erased action payload.
pub type ActionValue = Arc<dyn Any + Send + Sync>;

/// A named message applied to transition state.
#[derive(Clone)]
pub struct Action {
	/// Action name, also the key of its serializer.
	pub name: String,
	/// Optional payload.
	pub value: Option<ActionValue>,
	/// Assigned by the store at dispatch time as `<store>-<counter>`.
	pub id: Option<String>,
	/// Set on actions parsed from another store's wire format.
	pub from_store: Option<String>,
	/// Name of the action an `append_action` hook derived this one from.
	pub appended_from: Option<String>,
}

impl Action {
	/// Creates an action without a payload.
	pub fn new(name: impl Into<String>) -> Self {
		Self {
			name: name.into(),
			value: None,
			id: None,
			from_store: None,
			appended_from: None,
		}
	}

	/// Creates an action carrying `value`.
	pub fn with_value<T>(name: impl Into<String>, value: T) -> Self
	where
		T: Any + Send + Sync,
	{
		Self {
			value: Some(Arc::new(value)),
			..Self::new(name)
		}
	}

	/// Returns the payload if it is a `T`.
	pub fn value_as<T: Any>(&self) -> Option<&T> {
		self.value.as_deref().and_then(|value| value.downcast_ref::<T>())
	}

	/// Returns true if this action was parsed from another store.
	pub fn is_foreign(&self) -> bool {
		self.from_store.is_some()
	}
}

impl fmt::Debug for Action {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.debug_struct("Action")
			.field("name", &self.name)
			.field("has_value", &self.value.is_some())
			.field("id", &self.id)
			.field("from_store", &self.from_store)
			.field("appended_from", &self.appended_from)
			.finish()
	}
}

impl From<&str> for Action {
	fn from(name: &str) -> Self {
		Self::new(name)
	}
}

impl From<String> for Action {
	fn from(name: String) -> Self {
		Self::new(name)
	}
}

/// Wire representation produced by [`crate::ApplicationStore::serialize_action`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SerializedAction {
	/// Action name, also the key of the codec on the receiving side.
	pub name: String,
	/// Store the action was serialized by.
	pub store_name: String,
	/// Encoded payload. Absent when the action carried none; an explicit
	/// `null` is a payload like any other.
	#[serde(default, skip_serializing_if = "Option::is_none", deserialize_with = "present")]
	pub serialized_value: Option<Value>,
}

fn present<'de, D>(deserializer: D) -> Result<Option<Value>, D::Error>
where
	D: Deserializer<'de>,
{
	Value::deserialize(deserializer).map(Some)
}

type ToJsonFn = Arc<dyn Fn(&Action) -> Option<Value> + Send + Sync>;
type FromJsonFn = Arc<dyn Fn(&Value) -> Option<ActionValue> + Send + Sync>;

/// JSON codec for one action name.
///
/// Either direction may refuse with `None`, meaning the instance is not
/// serializable (for example a payload in an unexpected shape).
#[derive(Clone)]
pub struct ActionSerializer {
	to_json: ToJsonFn,
	from_json: FromJsonFn,
}

impl ActionSerializer {
	/// Builds a codec from explicit conversion functions.
	pub fn new<T, F>(to_json: T, from_json: F) -> Self
	where
		T: Fn(&Action) -> Option<Value> + Send + Sync + 'static,
		F: Fn(&Value) -> Option<ActionValue> + Send + Sync + 'static,
	{
		Self {
			to_json: Arc::new(to_json),
			from_json: Arc::new(from_json),
		}
	}

	/// Codec for payloads of type `T` via serde.
	///
	/// Payloads of another type refuse. The store never hands a codec an
	/// action without a payload.
	pub fn serde<T>() -> Self
	where
		T: Serialize + DeserializeOwned + Any + Send + Sync,
	{
		Self::new(
			|action| {
				let typed = action.value.as_deref()?.downcast_ref::<T>()?;
				serde_json::to_value(typed).ok()
			},
			|json| {
				serde_json::from_value::<T>(json.clone())
					.ok()
					.map(|value| Arc::new(value) as ActionValue)
			},
		)
	}

	/// Serializes `action`'s payload.
	pub fn to_json(&self, action: &Action) -> Option<Value> {
		(self.to_json)(action)
	}

	/// Reconstructs a payload from JSON.
	pub fn from_json(&self, json: &Value) -> Option<ActionValue> {
		(self.from_json)(json)
	}
}

impl fmt::Debug for ActionSerializer {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.debug_struct("ActionSerializer").finish_non_exhaustive()
	}
}
