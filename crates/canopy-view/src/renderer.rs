//! The render pipeline.
//!
//! Full render: `BeforeStart → IdAssigned → BeforeViewSnapshot → Snapshotted →
//! AfterViewSnapshot → BeforeRender → Painted`. Partial render substitutes its
//! scope into the retained tree and enters at `AfterViewSnapshot`.
//!
//! Each stage runs the stage-global hook on the scope root, then the per-type
//! hooks over the scope in pre-order. The hooks run before the stage's own
//! work, except at `IdAssigned` and `AfterViewSnapshot` where they see its
//! result. The work is done on an owned copy; the retained tree is only
//! written when publishing and substituting, and no borrow of it is held
//! while hooks or the paint callback run.

use crate::action;
use crate::error::RenderError;
use crate::lifecycle::RenderStage;
use crate::style;
use crate::view::View;
use canopy_core::expression::{contains_markers, resolve_value_except};
use canopy_core::tree::{self, insert_into_tree, try_replace_each};
use canopy_core::{DataContext, TreeError, TreeNode, TreeUpdateMode, context};
use tracing::{debug, error};

/// Id for a node that arrived without one: a pure function of its parent's
/// id, its index among its siblings and its type.
pub fn positional_id(parent: &str, index: usize, node_type: &str) -> String {
    format!("{parent}/{index}:{}", node_type.to_ascii_lowercase())
}

/// Give every id-less descendant of `node` a positional id.
pub(crate) fn assign_descendant_ids(node: &mut TreeNode) {
    let parent = node.id_str().to_string();
    for (i, child) in node.child_nodes_mut().enumerate() {
        if child.id.is_none() {
            child.id = Some(positional_id(&parent, i, &child.node_type));
        }
        assign_descendant_ids(child);
    }
}

fn hook_error(stage: RenderStage, node: &TreeNode, message: String) -> RenderError {
    RenderError::Hook {
        stage,
        node_type: node.node_type.clone(),
        node_id: node.id_str().to_string(),
        message,
    }
}

impl View {
    /// Full render of a whole tree, replacing the retained one.
    pub fn render(&self, tree: TreeNode) -> Result<(), RenderError> {
        self.render_at(tree, None, TreeUpdateMode::ReplaceComponent)
    }

    /// Full render of `tree` placed at `anchor` by `mode`, or of the whole
    /// tree without an anchor.
    pub fn render_at(
        &self,
        tree: TreeNode,
        anchor: Option<&str>,
        mode: TreeUpdateMode,
    ) -> Result<(), RenderError> {
        self.count(|s| s.full += 1);
        debug!(anchor, ?mode, "full render");
        let result = self.full_pipeline(tree, anchor, mode);
        self.set_stage(RenderStage::Idle);
        result
    }

    /// Partial render: skips component checks, id assignment and adaptation.
    ///
    /// The scope is substituted into the retained tree before any hook runs.
    /// That substitution is the commit point: a later hook failure returns
    /// `Err` with the retained tree already updated and nothing painted.
    pub fn update(
        &self,
        tree: TreeNode,
        anchor: Option<&str>,
        mode: TreeUpdateMode,
    ) -> Result<(), RenderError> {
        self.count(|s| s.partial += 1);
        debug!(anchor, ?mode, "partial render");
        let result = self.partial_pipeline(tree, anchor, mode);
        self.set_stage(RenderStage::Idle);
        result
    }

    fn full_pipeline(
        &self,
        scope: TreeNode,
        anchor: Option<&str>,
        mode: TreeUpdateMode,
    ) -> Result<(), RenderError> {
        self.set_stage(RenderStage::BeforeStart);
        let scope = self.run_hooks(RenderStage::BeforeStart, scope)?;
        self.validate_components(&scope)?;

        self.set_stage(RenderStage::IdAssigned);
        let mut scope = scope;
        self.assign_ids(&mut scope, anchor, mode);
        let scope = self.run_hooks(RenderStage::IdAssigned, scope)?;

        self.set_stage(RenderStage::BeforeViewSnapshot);
        let mut scope = self.run_hooks(RenderStage::BeforeViewSnapshot, scope)?;
        tree::for_each_mut(&mut scope, |node, _| self.0.adapters.apply(node));

        self.set_stage(RenderStage::Snapshotted);
        let scope = self.run_hooks(RenderStage::Snapshotted, scope)?;
        self.publish(&scope, anchor, mode)?;

        self.finish(scope, anchor, mode)
    }

    fn partial_pipeline(
        &self,
        mut scope: TreeNode,
        anchor: Option<&str>,
        mode: TreeUpdateMode,
    ) -> Result<(), RenderError> {
        if mode == TreeUpdateMode::ReplaceComponent
            && scope.id.is_none()
            && let Some(anchor) = anchor
        {
            scope.id = Some(anchor.to_string());
        }
        if self.0.tree.borrow().is_none() && anchor.is_some() {
            return Err(RenderError::NotRendered);
        }
        self.publish(&scope, anchor, mode)?;
        self.finish(scope, anchor, mode)
    }

    fn finish(
        &self,
        scope: TreeNode,
        anchor: Option<&str>,
        mode: TreeUpdateMode,
    ) -> Result<(), RenderError> {
        self.set_stage(RenderStage::AfterViewSnapshot);
        let inherited = self.inherited_for(&scope, anchor, mode);
        let mut scope = scope;
        self.resolve_scope(&mut scope, &inherited);
        let scope = self.run_hooks(RenderStage::AfterViewSnapshot, scope)?;

        self.set_stage(RenderStage::BeforeRender);
        let mut scope = self.run_hooks(RenderStage::BeforeRender, scope)?;
        style::flatten_tree(&mut scope, &self.0.config.style_property);

        self.set_stage(RenderStage::Painted);
        (self.0.paint)(&scope, anchor, mode);
        Ok(())
    }

    fn run_hooks(&self, stage: RenderStage, scope: TreeNode) -> Result<TreeNode, RenderError> {
        let hooks = &self.0.hooks;
        let mut scope = scope;
        if let Some(hook) = hooks.global(stage) {
            match hook(&mut scope) {
                Ok(Some(replacement)) => scope = replacement,
                Ok(None) => {}
                Err(message) => return Err(hook_error(stage, &scope, message)),
            }
        }
        if !hooks.has_type_hooks(stage) {
            return Ok(scope);
        }
        try_replace_each(scope, |mut node, _| {
            let Some(hook) = hooks.for_type(stage, &node.node_type) else {
                return Ok(node);
            };
            match hook(&mut node) {
                Ok(Some(replacement)) => Ok(replacement),
                Ok(None) => Ok(node),
                Err(message) => Err(hook_error(stage, &node, message)),
            }
        })
    }

    fn validate_components(&self, scope: &TreeNode) -> Result<(), RenderError> {
        let config = &self.0.config;
        for node in tree::iter(scope) {
            if config.is_known_component(&node.node_type) {
                continue;
            }
            if config.strict_components {
                return Err(RenderError::UnknownComponent {
                    node_type: node.node_type.clone(),
                    node_id: node.id_str().to_string(),
                });
            }
            error!(
                node_type = %node.node_type,
                node_id = node.id_str(),
                "unknown component type"
            );
        }
        Ok(())
    }

    fn assign_ids(&self, scope: &mut TreeNode, anchor: Option<&str>, mode: TreeUpdateMode) {
        if scope.id.is_none() {
            let id = match (anchor, mode) {
                (Some(anchor), TreeUpdateMode::ReplaceComponent) => anchor.to_string(),
                (Some(anchor), TreeUpdateMode::Replace) => {
                    positional_id(anchor, 0, &scope.node_type)
                }
                (Some(anchor), TreeUpdateMode::Append | TreeUpdateMode::Prepend) => {
                    let siblings = self
                        .0
                        .tree
                        .borrow()
                        .as_ref()
                        .and_then(|t| tree::find_by_id(t, anchor))
                        .map(|a| a.child_nodes().count())
                        .unwrap_or(0);
                    positional_id(anchor, siblings, &scope.node_type)
                }
                (None, _) => positional_id(&self.0.config.id_prefix, 0, &scope.node_type),
            };
            scope.id = Some(id);
        }
        assign_descendant_ids(scope);
    }

    /// Write the scope into the retained tree: whole tree without an anchor,
    /// otherwise at the anchor by `mode`.
    fn publish(
        &self,
        scope: &TreeNode,
        anchor: Option<&str>,
        mode: TreeUpdateMode,
    ) -> Result<(), RenderError> {
        let mut retained = self.0.tree.borrow_mut();
        let Some(anchor) = anchor else {
            *retained = Some(scope.clone());
            return Ok(());
        };
        let base = retained
            .as_mut()
            .ok_or_else(|| TreeError::AnchorNotFound(anchor.to_string()))?;
        insert_into_tree(base, scope.clone(), anchor, mode)?;
        Ok(())
    }

    /// Contexts handed down to the scope root from outside the scope, plus
    /// the process contexts.
    fn inherited_for(
        &self,
        scope: &TreeNode,
        anchor: Option<&str>,
        mode: TreeUpdateMode,
    ) -> Vec<DataContext> {
        let mut out = {
            let retained = self.0.tree.borrow();
            match (anchor, retained.as_ref()) {
                (Some(anchor), Some(base)) => {
                    let found = if mode == TreeUpdateMode::ReplaceComponent {
                        scope
                            .id
                            .as_deref()
                            .and_then(|id| context::inherited_at(base, id))
                    } else {
                        context::hierarchy_of(base, anchor)
                    };
                    found.unwrap_or_default()
                }
                _ => Vec::new(),
            }
        };
        out.extend(self.process_contexts());
        out
    }

    /// Deserialize actions, then resolve every remaining property except
    /// deferred ones. Descriptors nested inside a property keep their markers.
    fn resolve_scope(&self, scope: &mut TreeNode, inherited: &[DataContext]) {
        let operations = self.operations();
        let config = &self.0.config;
        context::walk_mut(scope, inherited, |node, hierarchy| {
            action::deserialize(node, hierarchy, self);
            for (key, value) in node.props.iter_mut() {
                if config.is_deferred(key) || !contains_markers(value) {
                    continue;
                }
                *value =
                    resolve_value_except(value, hierarchy, &operations, &action::is_descriptor);
            }
        });
    }
}
