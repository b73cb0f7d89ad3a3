//! Data contexts and per-node context hierarchies.
//!
//! A node sees, nearest first: its own explicit `context`, its implicit
//! contexts, then everything its ancestors declared the same way, and finally
//! whatever process-scoped contexts the caller appends (navigation, global).

use crate::tree::TreeNode;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::borrow::Cow;
use std::collections::HashMap;
use std::fmt;
use std::rc::Rc;

pub const GLOBAL_CONTEXT_ID: &str = "global";
pub const NAVIGATION_CONTEXT_ID: &str = "navigationContext";

/// Contexts visible to one node, highest precedence first.
pub type ContextHierarchy = Vec<DataContext>;
/// Node id to the hierarchy visible at that node.
pub type ContextMap = HashMap<String, ContextHierarchy>;

/// Side effect run after a context value was mutated.
#[derive(Clone)]
pub struct ChangeHook(Rc<dyn Fn(&Value)>);

impl ChangeHook {
    pub fn new(f: impl Fn(&Value) + 'static) -> Self {
        Self(Rc::new(f))
    }

    pub fn call(&self, value: &Value) {
        (self.0)(value)
    }
}

impl fmt::Debug for ChangeHook {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("ChangeHook")
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DataContext {
    pub id: String,
    #[serde(default)]
    pub value: Value,
    #[serde(default, skip_serializing_if = "is_false")]
    pub readonly: bool,
    #[serde(skip)]
    pub on_change: Option<ChangeHook>,
}

fn is_false(b: &bool) -> bool {
    !*b
}

impl PartialEq for DataContext {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id && self.value == other.value && self.readonly == other.readonly
    }
}

impl DataContext {
    pub fn new(id: impl Into<String>, value: Value) -> Self {
        Self {
            id: id.into(),
            value,
            readonly: false,
            on_change: None,
        }
    }

    pub fn readonly(id: impl Into<String>, value: Value) -> Self {
        Self {
            readonly: true,
            ..Self::new(id, value)
        }
    }

    pub fn with_on_change(mut self, f: impl Fn(&Value) + 'static) -> Self {
        self.on_change = Some(ChangeHook::new(f));
        self
    }

    /// Run the change hook, if any, with the current value.
    pub fn notify_change(&self) {
        if let Some(hook) = &self.on_change {
            hook.call(&self.value);
        }
    }
}

/// Contexts a node declares itself: explicit first, then implicit ones.
pub fn declared(node: &TreeNode) -> Vec<DataContext> {
    let mut out = Vec::new();
    if let Some(ctx) = &node.context {
        out.push(ctx.clone());
    }
    if let Some(implicit) = &node.implicit_contexts {
        out.extend(implicit.iter().cloned());
    }
    out
}

fn declares_any(node: &TreeNode) -> bool {
    node.context.is_some() || node.implicit_contexts.as_ref().is_some_and(|v| !v.is_empty())
}

fn stacked<'a>(node: &TreeNode, inherited: &'a [DataContext]) -> Cow<'a, [DataContext]> {
    if !declares_any(node) {
        return Cow::Borrowed(inherited);
    }
    let mut own = declared(node);
    own.extend_from_slice(inherited);
    Cow::Owned(own)
}

/// Pre-order walk handing every node the hierarchy visible to it.
///
/// `inherited` is what the root's ancestors (plus any process contexts)
/// contribute; it ends up at the tail of every hierarchy.
pub fn walk(
    tree: &TreeNode,
    inherited: &[DataContext],
    mut visit: impl FnMut(&TreeNode, &[DataContext]),
) {
    fn go(
        node: &TreeNode,
        inherited: &[DataContext],
        visit: &mut impl FnMut(&TreeNode, &[DataContext]),
    ) {
        let hierarchy = stacked(node, inherited);
        visit(node, &hierarchy);
        for child in node.child_nodes() {
            go(child, &hierarchy, visit);
        }
    }
    go(tree, inherited, &mut visit);
}

/// Mutable [`walk`]. The hierarchy is taken before `visit` runs and is what
/// the node's children inherit.
pub fn walk_mut(
    tree: &mut TreeNode,
    inherited: &[DataContext],
    mut visit: impl FnMut(&mut TreeNode, &[DataContext]),
) {
    fn go(
        node: &mut TreeNode,
        inherited: &[DataContext],
        visit: &mut impl FnMut(&mut TreeNode, &[DataContext]),
    ) {
        let hierarchy = stacked(node, inherited).into_owned();
        visit(node, &hierarchy);
        for child in node.child_nodes_mut() {
            go(child, &hierarchy, visit);
        }
    }
    go(tree, inherited, &mut visit);
}

/// Hierarchy of every identified node; `extra` is appended to each.
pub fn evaluate(tree: &TreeNode, extra: &[DataContext]) -> ContextMap {
    let mut map = ContextMap::new();
    walk(tree, extra, |node, hierarchy| {
        if let Some(id) = &node.id {
            map.insert(id.clone(), hierarchy.to_vec());
        }
    });
    map
}

/// First context with `id`, or the nearest one when `id` is `None`.
pub fn find<'a>(hierarchy: &'a [DataContext], id: Option<&str>) -> Option<&'a DataContext> {
    match id {
        Some(id) => hierarchy.iter().find(|ctx| ctx.id == id),
        None => hierarchy.first(),
    }
}

/// Root-to-node chain of child positions leading to `id`.
fn position_path(tree: &TreeNode, id: &str) -> Option<Vec<usize>> {
    if tree.id.as_deref() == Some(id) {
        return Some(Vec::new());
    }
    for (i, child) in tree.child_nodes().enumerate() {
        if let Some(mut rest) = position_path(child, id) {
            rest.insert(0, i);
            return Some(rest);
        }
    }
    None
}

fn chain<'a>(tree: &'a TreeNode, positions: &[usize]) -> Vec<&'a TreeNode> {
    let mut out = vec![tree];
    let mut cur = tree;
    for &i in positions {
        match cur.child_nodes().nth(i) {
            Some(next) => {
                out.push(next);
                cur = next;
            }
            None => break,
        }
    }
    out
}

/// Hierarchy the ancestors of `id` hand down to it (its own contexts excluded).
pub fn inherited_at(tree: &TreeNode, id: &str) -> Option<ContextHierarchy> {
    let positions = position_path(tree, id)?;
    let nodes = chain(tree, &positions);
    let mut out = Vec::new();
    for node in nodes.iter().rev().skip(1) {
        out.extend(declared(node));
    }
    Some(out)
}

/// Hierarchy visible at `id`, its own contexts included.
pub fn hierarchy_of(tree: &TreeNode, id: &str) -> Option<ContextHierarchy> {
    let positions = position_path(tree, id)?;
    let nodes = chain(tree, &positions);
    let mut out = Vec::new();
    for node in nodes.iter().rev() {
        out.extend(declared(node));
    }
    Some(out)
}

/// Nearest node at or above `origin` that declares `context_id`.
pub fn declaring_node_mut<'a>(
    tree: &'a mut TreeNode,
    origin: &str,
    context_id: &str,
) -> Option<&'a mut TreeNode> {
    let positions = position_path(tree, origin)?;
    let depth = {
        let nodes = chain(tree, &positions);
        nodes
            .iter()
            .rposition(|node| declares_context(node, context_id))?
    };
    let mut cur = tree;
    for &i in &positions[..depth] {
        cur = cur.child_nodes_mut().nth(i)?;
    }
    Some(cur)
}

fn declares_context(node: &TreeNode, context_id: &str) -> bool {
    node.context.as_ref().is_some_and(|c| c.id == context_id)
        || node
            .implicit_contexts
            .as_ref()
            .is_some_and(|v| v.iter().any(|c| c.id == context_id))
}

/// Mutable access to a context declared directly on `node`.
pub fn context_mut<'a>(node: &'a mut TreeNode, context_id: &str) -> Option<&'a mut DataContext> {
    if let Some(ctx) = node.context.as_mut().filter(|c| c.id == context_id) {
        return Some(ctx);
    }
    node.implicit_contexts
        .as_mut()?
        .iter_mut()
        .find(|c| c.id == context_id)
}
