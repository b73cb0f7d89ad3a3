//! The built-in `setContext` action:
//! `{"_action_": "setContext", "contextId"?: id, "path"?: "a.b[0]", "value": v}`.
//!
//! The target is looked up from the originating node in a hierarchy computed
//! fresh from the view's retained tree, so a node that was re-rendered away
//! is detected. Without `contextId` the nearest context is written.

use crate::action::ActionCall;
use crate::error::ContextError;
use crate::view::View;
use canopy_core::context::{self, GLOBAL_CONTEXT_ID, NAVIGATION_CONTEXT_ID};
use canopy_core::path::{self, parse_path};
use canopy_core::{PathError, TreeNode, TreeUpdateMode, tree};
use serde_json::Value;
use tracing::{debug, error, warn};

fn write(target: &mut Value, at: Option<&str>, value: Value) -> Result<(), PathError> {
    let segments = match at {
        Some(p) => parse_path(p)?,
        None => Vec::new(),
    };
    path::set(target, &segments, value)
}

/// Apply a `setContext` descriptor on behalf of `node`, then re-render what
/// the change affects.
pub fn set_context(view: &View, node: &TreeNode, action: &Value) -> Result<(), ContextError> {
    let node_id = node.id.as_deref().ok_or_else(|| ContextError::MissingNodeId {
        node_type: node.node_type.clone(),
    })?;
    let detached = || ContextError::Detached {
        node_type: node.node_type.clone(),
        node_id: node_id.to_string(),
    };
    let context_id = action.get("contextId").and_then(Value::as_str);
    let at = action
        .get("path")
        .and_then(Value::as_str)
        .filter(|p| !p.is_empty());
    let value = action.get("value").cloned().unwrap_or(Value::Null);

    let retained = view.tree().ok_or_else(detached)?;
    let map = context::evaluate(&retained, &view.process_contexts());
    let hierarchy = map.get(node_id).ok_or_else(detached)?;
    let target = context::find(hierarchy, context_id).ok_or_else(|| ContextError::NotFound {
        node_id: node_id.to_string(),
        context_id: context_id.unwrap_or_default().to_string(),
    })?;
    if target.readonly {
        return Err(ContextError::Readonly {
            node_id: node_id.to_string(),
            context_id: target.id.clone(),
        });
    }
    debug!(node_id, context_id = %target.id, path = at, "setContext");

    match target.id.as_str() {
        GLOBAL_CONTEXT_ID => {
            // subscribers re-render
            view.global().set(value, at)?;
        }
        NAVIGATION_CONTEXT_ID => {
            let mut navigation = target.clone();
            write(&mut navigation.value, at, value)?;
            view.set_navigation_context(Some(navigation.clone()));
            navigation.notify_change();
            view.rerender()?;
        }
        _ => {
            let target_id = target.id.clone();
            let mut copy = retained;
            let declaring =
                context::declaring_node_mut(&mut copy, node_id, &target_id).ok_or_else(detached)?;
            let scope_id = declaring.id.clone();
            let ctx = context::context_mut(declaring, &target_id).ok_or_else(detached)?;
            write(&mut ctx.value, at, value)?;
            let changed = ctx.clone();
            changed.notify_change();

            let scope = match &scope_id {
                Some(id) => tree::find_by_id(&copy, id).cloned(),
                None => None,
            };
            match (scope, scope_id.as_deref()) {
                (Some(scope), Some(id)) => {
                    view.update(scope, Some(id), TreeUpdateMode::ReplaceComponent)?
                }
                _ => view.update(copy, None, TreeUpdateMode::ReplaceComponent)?,
            }
        }
    }
    Ok(())
}

/// Handler registered for the `setContext` kind.
pub(crate) fn handle(call: &ActionCall<'_>) {
    let context_id = call
        .action
        .get("contextId")
        .and_then(Value::as_str)
        .unwrap_or_default();
    match set_context(call.view, call.node, call.action) {
        Ok(()) => {}
        Err(ContextError::Render(err)) => error!(
            node_type = %call.node.node_type,
            node_id = call.node.id_str(),
            context_id,
            error = %err,
            "re-render after setContext failed"
        ),
        Err(err @ ContextError::Detached { .. }) => warn!(
            node_type = %call.node.node_type,
            node_id = call.node.id_str(),
            context_id,
            error = %err,
            "setContext from a detached node"
        ),
        Err(err) => warn!(
            node_type = %call.node.node_type,
            node_id = call.node.id_str(),
            context_id,
            error = %err,
            "setContext rejected"
        ),
    }
}
