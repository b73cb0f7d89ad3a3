//! Canopy view crate.
//!
//! A [`View`] takes a tree from `canopy-core` through the lifecycle stages and
//! hands the resolved result to a host paint callback:
//!
//! - `renderer`: full and partial (scoped) render pipelines.
//! - `lifecycle`: stages and host hooks.
//! - `action`: `_action_` descriptors turned into listeners that capture
//!   their hierarchy; `set_context` is the built-in mutation action.
//! - `template`: template managers and the keyed repeater.
//! - `adapter` + `style`: raw-tree normalization before publishing and
//!   style flattening before paint.
//! - `config`: JSON view configuration.

pub mod action;
pub mod adapter;
pub mod config;
pub mod error;
pub mod lifecycle;
pub mod renderer;
pub mod set_context;
pub mod style;
pub mod template;
pub mod view;

pub use action::{
    ActionCall, ActionExecutor, ActionHandler, ActionHandlers, AnalyticsRecord, AnalyticsSink,
    DeferredAction,
};
pub use adapter::{Adapter, Adapters};
pub use config::ViewConfig;
pub use error::{ConfigError, ContextError, RenderError};
pub use lifecycle::{Hook, LifecycleHooks, RenderStage};
pub use renderer::positional_id;
pub use set_context::set_context;
pub use template::{TemplateCase, TemplateManager, expand, repeat, suffix_ids};
pub use view::{Paint, RenderStats, View, ViewBuilder, WeakView};
