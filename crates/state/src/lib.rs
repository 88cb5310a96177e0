#![cfg_attr(test, allow(unused_crate_dependencies))]
//! Slice-based application state container with a scheduled side-effect runtime.
//!
//! State is split into [`Slice`]s, each owning one field of an immutable
//! [`AppState`]. An [`ApplicationStore`] holds the current state, applies
//! dispatched [`Action`]s and drives every slice's side effects.
//!
//! # Main Types
//!
//! - [`SliceKey`] - Typed handle naming one slice's field
//! - [`Slice`] - State descriptor, follow-up actions, effects, action codecs, error hook
//! - [`AppState`] - Immutable snapshot of every slice's value
//! - [`ApplicationStore`] - Dispatch, effect pipeline and error routing
//! - [`Reactor`] - Selector-diff effect
//!
//! # Effect pipeline
//!
//! ```text
//! dispatch(action)
//! ├── id = "<store>-<n>"
//! ├── commit                         // under the store's commit lock
//! │   ├── state.apply_action(action)   // plus append_action cascade
//! │   ├── build effects                // only when the slice list changed
//! │   └── swap state
//! ├── update() per effect              // declaration order, truncated by nested dispatch
//! └── runner.abort(); runner = new     // deferred_update batch via Scheduler
//! ```

/// Cancellation scopes for deferred effects.
pub mod abort;
/// Actions and action codecs.
pub mod action;
/// Immutable state snapshots.
pub mod app_state;
/// Declarative store settings.
pub mod config;
pub mod effect;
pub mod error;
pub mod key;
/// Selector-diff effects.
pub mod reactor;
/// Deferred side-effect batches.
pub mod runner;
/// Pluggable batch schedulers.
pub mod scheduler;
pub mod slice;
mod spawn;
pub mod store;

pub use abort::{AbortController, AbortSignal};
pub use action::{Action, ActionSerializer, ActionValue, SerializedAction};
pub use app_state::{AppState, AppStateConfig, SliceFields, StateOpts};
pub use config::{INFINITE_ERROR_SAMPLE, INFINITE_ERROR_THRESHOLD_TIME, StoreConfig};
pub use effect::{EffectFactory, EffectFuture, EffectPhase, SideEffect, UpdateContext};
pub use error::{ConfigError, EffectError, EffectResult, Result, StateJsonError, StoreError};
pub use key::SliceKey;
pub use reactor::{Reactor, ReactorBuilder, SelectedValues, SliceReactorBuilder};
pub use runner::DeferredSideEffectsRunner;
pub use scheduler::{CancelFn, ManualScheduler, Scheduler, SchedulerJob, TimeoutScheduler};
pub use slice::{Slice, SliceBuilder, SliceState, SliceValue};
pub use store::{ApplicationStore, DispatchActionFn, RootErrorHandler, StoreOptions};
