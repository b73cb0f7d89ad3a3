//! A view owns one retained tree and the host tables used to render it.

use crate::action::{ActionCall, ActionHandlers, AnalyticsRecord, AnalyticsSink};
use crate::adapter::Adapters;
use crate::config::ViewConfig;
use crate::error::RenderError;
use crate::lifecycle::{LifecycleHooks, RenderStage};
use canopy_core::{DataContext, GlobalContext, Operation, Operations, TreeNode, TreeUpdateMode};
use serde::Serialize;
use std::cell::{Cell, RefCell};
use std::fmt;
use std::rc::{Rc, Weak};
use tracing::error;

/// Host paint callback: the resolved scope, its anchor id and update mode.
pub type Paint = Box<dyn Fn(&TreeNode, Option<&str>, TreeUpdateMode)>;

/// Render counters. Redundant re-renders show up here.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RenderStats {
    pub full: usize,
    pub partial: usize,
    pub template: usize,
    pub template_skipped: usize,
}

pub(crate) struct ViewShared {
    pub(crate) config: ViewConfig,
    pub(crate) hooks: LifecycleHooks,
    pub(crate) adapters: Adapters,
    handlers: Rc<ActionHandlers>,
    operations: Rc<Operations>,
    analytics: Option<AnalyticsSink>,
    global: GlobalContext,
    global_subscription: Cell<Option<usize>>,
    navigation: RefCell<Option<DataContext>>,
    pub(crate) tree: RefCell<Option<TreeNode>>,
    pub(crate) paint: Paint,
    stage: Cell<RenderStage>,
    stats: Cell<RenderStats>,
}

impl Drop for ViewShared {
    fn drop(&mut self) {
        if let Some(token) = self.global_subscription.take() {
            self.global.unsubscribe(token);
        }
    }
}

/// Cheap, shared handle to a view.
#[derive(Clone)]
pub struct View(pub(crate) Rc<ViewShared>);

/// Non-owning handle, held by action listeners.
#[derive(Clone, Default)]
pub struct WeakView(Weak<ViewShared>);

impl WeakView {
    pub fn upgrade(&self) -> Option<View> {
        self.0.upgrade().map(View)
    }
}

impl fmt::Debug for WeakView {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("WeakView")
    }
}

impl fmt::Debug for View {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("View")
            .field("stage", &self.stage())
            .field("stats", &self.stats())
            .field("config", &self.0.config)
            .field("hooks", &self.0.hooks)
            .field("handlers", &self.0.handlers)
            .finish()
    }
}

impl View {
    pub fn builder(paint: impl Fn(&TreeNode, Option<&str>, TreeUpdateMode) + 'static) -> ViewBuilder {
        ViewBuilder::new(paint)
    }

    pub fn downgrade(&self) -> WeakView {
        WeakView(Rc::downgrade(&self.0))
    }

    /// Clone of the retained tree, as published at `Snapshotted` and updated
    /// by partial renders.
    pub fn tree(&self) -> Option<TreeNode> {
        self.0.tree.borrow().clone()
    }

    pub fn stage(&self) -> RenderStage {
        self.0.stage.get()
    }

    pub(crate) fn set_stage(&self, stage: RenderStage) {
        self.0.stage.set(stage);
    }

    pub fn stats(&self) -> RenderStats {
        self.0.stats.get()
    }

    pub(crate) fn count(&self, f: impl FnOnce(&mut RenderStats)) {
        let mut stats = self.0.stats.get();
        f(&mut stats);
        self.0.stats.set(stats);
    }

    pub fn config(&self) -> &ViewConfig {
        &self.0.config
    }

    pub fn global(&self) -> &GlobalContext {
        &self.0.global
    }

    pub fn navigation_context(&self) -> Option<DataContext> {
        self.0.navigation.borrow().clone()
    }

    /// Replace the navigation context. No render is triggered.
    pub fn set_navigation_context(&self, context: Option<DataContext>) {
        *self.0.navigation.borrow_mut() = context;
    }

    /// Process-scoped contexts in precedence order: navigation, then global.
    pub fn process_contexts(&self) -> Vec<DataContext> {
        let mut out = Vec::with_capacity(2);
        if let Some(nav) = self.navigation_context() {
            out.push(nav);
        }
        out.push(self.0.global.as_context());
        out
    }

    pub fn operations(&self) -> Rc<Operations> {
        self.0.operations.clone()
    }

    pub fn handlers(&self) -> Rc<ActionHandlers> {
        self.0.handlers.clone()
    }

    pub fn analytics(&self) -> Option<AnalyticsSink> {
        self.0.analytics.clone()
    }

    /// Partial render of the whole retained tree; a no-op before the first
    /// full render.
    pub fn rerender(&self) -> Result<(), RenderError> {
        match self.tree() {
            Some(tree) => self.update(tree, None, TreeUpdateMode::ReplaceComponent),
            None => Ok(()),
        }
    }
}

/// Collects the host tables, then builds the [`View`].
pub struct ViewBuilder {
    config: ViewConfig,
    hooks: LifecycleHooks,
    adapters: Adapters,
    handlers: ActionHandlers,
    operations: Operations,
    analytics: Option<AnalyticsSink>,
    global: Option<GlobalContext>,
    navigation: Option<DataContext>,
    paint: Paint,
}

impl ViewBuilder {
    pub fn new(paint: impl Fn(&TreeNode, Option<&str>, TreeUpdateMode) + 'static) -> Self {
        Self {
            config: ViewConfig::default(),
            hooks: LifecycleHooks::new(),
            adapters: Adapters::standard(),
            handlers: ActionHandlers::new(),
            operations: Operations::new(),
            analytics: None,
            global: None,
            navigation: None,
            paint: Box::new(paint),
        }
    }

    pub fn config(mut self, config: ViewConfig) -> Self {
        self.config = config;
        self
    }

    pub fn hooks(mut self, hooks: LifecycleHooks) -> Self {
        self.hooks = hooks;
        self
    }

    pub fn stage_hook(
        mut self,
        stage: RenderStage,
        hook: impl Fn(&mut TreeNode) -> Result<Option<TreeNode>, String> + 'static,
    ) -> Self {
        self.hooks.on_stage(stage, hook);
        self
    }

    pub fn type_hook(
        mut self,
        stage: RenderStage,
        node_type: &str,
        hook: impl Fn(&mut TreeNode) -> Result<Option<TreeNode>, String> + 'static,
    ) -> Self {
        self.hooks.on_type(stage, node_type, hook);
        self
    }

    pub fn adapters(mut self, adapters: Adapters) -> Self {
        self.adapters = adapters;
        self
    }

    pub fn adapter(mut self, node_type: &str, adapter: impl Fn(&mut TreeNode) + 'static) -> Self {
        self.adapters.register(node_type, adapter);
        self
    }

    pub fn handlers(mut self, handlers: ActionHandlers) -> Self {
        self.handlers = handlers;
        self
    }

    pub fn handler(mut self, kind: &str, handler: impl Fn(&ActionCall<'_>) + 'static) -> Self {
        self.handlers.register(kind, handler);
        self
    }

    pub fn operations(mut self, operations: Operations) -> Self {
        self.operations = operations;
        self
    }

    pub fn operation(mut self, name: &str, operation: Operation) -> Self {
        self.operations.register(name, operation);
        self
    }

    pub fn analytics(mut self, sink: impl Fn(&AnalyticsRecord) + 'static) -> Self {
        self.analytics = Some(Rc::new(sink));
        self
    }

    /// Share a global store between views. Each view gets its own otherwise.
    pub fn global(mut self, global: GlobalContext) -> Self {
        self.global = Some(global);
        self
    }

    pub fn navigation(mut self, context: DataContext) -> Self {
        self.navigation = Some(context);
        self
    }

    pub fn build(self) -> View {
        let global = self
            .global
            .unwrap_or_else(|| GlobalContext::new(serde_json::json!({})));
        let shared = Rc::new(ViewShared {
            config: self.config,
            hooks: self.hooks,
            adapters: self.adapters,
            handlers: Rc::new(self.handlers),
            operations: Rc::new(self.operations),
            analytics: self.analytics,
            global: global.clone(),
            global_subscription: Cell::new(None),
            navigation: RefCell::new(self.navigation),
            tree: RefCell::new(None),
            paint: self.paint,
            stage: Cell::new(RenderStage::Idle),
            stats: Cell::new(RenderStats::default()),
        });

        let weak = Rc::downgrade(&shared);
        let token = global.subscribe(move || {
            let Some(shared) = weak.upgrade() else {
                return;
            };
            if let Err(err) = View(shared).rerender() {
                error!(error = %err, "re-render after global change failed");
            }
        });
        shared.global_subscription.set(Some(token));
        View(shared)
    }
}
