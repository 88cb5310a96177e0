//! Error types for the state container and its effect runtime.

use thiserror::Error;

/// Fatal configuration problems detected while building state or wiring effects.
///
/// These are never routed through `on_error` handlers.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ConfigError {
	/// Two distinct slice instances registered the same key.
	#[error("duplicate slice key: {key}")]
	DuplicateSliceKey {
		/// The key claimed twice.
		key: String,
	},

	/// Two slices declared a serializer for the same action name.
	#[error("action serializer for {action} already registered (second declaration in slice {slice})")]
	DuplicateActionSerializer {
		/// Action name with more than one codec.
		action: String,
		/// Slice holding the second declaration.
		slice: String,
	},

	/// A slice declares a deferred update but the store has no scheduler.
	#[error("slice {slice} declares a deferred update but no scheduler was provided")]
	MissingScheduler {
		/// Slice whose effect needs scheduling.
		slice: String,
	},

	/// Declarative store configuration could not be parsed or is invalid.
	#[error("invalid store config: {0}")]
	InvalidConfig(String),
}

/// Failure raised by a side effect.
#[derive(Debug, Error)]
pub enum EffectError {
	/// Cooperative cancellation. Always swallowed by the store.
	#[error("operation aborted")]
	Aborted,

	/// Any other effect failure.
	#[error(transparent)]
	Failed(#[from] anyhow::Error),
}

impl EffectError {
	/// Builds a failure from a displayable message.
	pub fn msg<M>(message: M) -> Self
	where
		M: std::fmt::Display + std::fmt::Debug + Send + Sync + 'static,
	{
		Self::Failed(anyhow::Error::msg(message))
	}

	/// Returns true for cancellation errors.
	pub fn is_abort(&self) -> bool {
		match self {
			Self::Aborted => true,
			Self::Failed(err) => err.downcast_ref::<EffectError>().is_some_and(EffectError::is_abort),
		}
	}
}

impl From<StoreError> for EffectError {
	fn from(err: StoreError) -> Self {
		Self::Failed(anyhow::Error::new(err))
	}
}

/// Errors surfaced by [`crate::ApplicationStore`] operations.
#[derive(Debug, Error)]
pub enum StoreError {
	/// Fatal configuration error.
	#[error(transparent)]
	Config(#[from] ConfigError),

	/// The circuit breaker tripped; the store has been destroyed.
	#[error("avoiding possible infinite errors")]
	InfiniteErrors,

	/// No handler recovered an effect error.
	#[error("unhandled effect error{}: {source}", slice_suffix(.slice))]
	Unhandled {
		/// Slice whose effect raised the error, when known.
		slice: Option<String>,
		/// The original effect error.
		#[source]
		source: EffectError,
	},

	/// A deferred runner was started twice.
	#[error("deferred side effects runner already started")]
	RunnerAlreadyStarted,
}

fn slice_suffix(slice: &Option<String>) -> String {
	slice.as_deref().map(|s| format!(" in slice {s}")).unwrap_or_default()
}

impl StoreError {
	/// Returns the unhandled effect error, if this is one.
	pub fn effect_error(&self) -> Option<&EffectError> {
		match self {
			Self::Unhandled { source, .. } => Some(source),
			_ => None,
		}
	}
}

/// Failure serializing one slice's state to JSON.
#[derive(Debug, Error)]
#[error("failed to serialize state of field {field}: {source}")]
pub struct StateJsonError {
	/// Field name the slice was registered under.
	pub field: String,
	/// Underlying serde failure.
	#[source]
	pub source: serde_json::Error,
}

/// Result of a side effect invocation.
pub type EffectResult = std::result::Result<(), EffectError>;

/// Result type for store operations.
pub type Result<T> = std::result::Result<T, StoreError>;
