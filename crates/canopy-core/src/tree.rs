//! Tree model: nodes as they arrive from a backend, plus generic traversal.
//!
//! A [`TreeNode`] is type-tagged (`type`, compared case-insensitively), may
//! carry a stable `id`, an explicit `context`, implicit contexts and either a
//! `children` list or a single `child` slot. Every other JSON key lands in
//! [`TreeNode::props`].
//!
//! Traversal is always pre-order: a parent is visited before its children and
//! siblings in declaration order (the `child` slot first, then `children`).

use crate::context::DataContext;
use crate::error::TreeError;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::convert::Infallible;
use std::fmt;
use std::rc::Rc;

/// Something a host can fire with an event payload, such as a deserialized
/// action list sitting on an event property.
pub trait Listener: fmt::Debug {
    fn invoke(&self, payload: &Value);
}

/// Shared handle to a listener attached to a node.
pub type ListenerRef = Rc<dyn Listener>;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TreeNode {
    #[serde(rename = "type")]
    pub node_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub context: Option<DataContext>,
    #[serde(
        rename = "_implicitContexts_",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub implicit_contexts: Option<Vec<DataContext>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub children: Option<Vec<TreeNode>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub child: Option<Box<TreeNode>>,
    #[serde(flatten)]
    pub props: Map<String, Value>,
    /// Event listeners produced by action deserialization. Never serialized.
    #[serde(skip)]
    pub listeners: BTreeMap<String, ListenerRef>,
}

impl TreeNode {
    pub fn new(node_type: impl Into<String>) -> Self {
        Self {
            node_type: node_type.into(),
            ..Self::default()
        }
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = Some(id.into());
        self
    }

    pub fn with_prop(mut self, key: impl Into<String>, value: Value) -> Self {
        self.props.insert(key.into(), value);
        self
    }

    pub fn with_context(mut self, context: DataContext) -> Self {
        self.context = Some(context);
        self
    }

    pub fn with_children(mut self, children: Vec<TreeNode>) -> Self {
        self.children = Some(children);
        self
    }

    /// Parse a node from its JSON representation.
    pub fn from_value(value: Value) -> Result<Self, serde_json::Error> {
        serde_json::from_value(value)
    }

    /// JSON representation; listeners are dropped.
    pub fn to_value(&self) -> Value {
        serde_json::to_value(self).unwrap_or(Value::Null)
    }

    /// Case-insensitive type comparison.
    pub fn is_type(&self, node_type: &str) -> bool {
        self.node_type.eq_ignore_ascii_case(node_type)
    }

    /// Lower-cased type, the key every type-indexed table uses.
    pub fn type_key(&self) -> String {
        self.node_type.to_ascii_lowercase()
    }

    pub fn id_str(&self) -> &str {
        self.id.as_deref().unwrap_or("")
    }

    pub fn child_nodes(&self) -> impl Iterator<Item = &TreeNode> {
        self.child
            .as_deref()
            .into_iter()
            .chain(self.children.iter().flatten())
    }

    pub fn child_nodes_mut(&mut self) -> impl Iterator<Item = &mut TreeNode> {
        self.child
            .as_deref_mut()
            .into_iter()
            .chain(self.children.iter_mut().flatten())
    }

    pub fn listener(&self, event: &str) -> Option<&ListenerRef> {
        self.listeners.get(event)
    }

    /// Fire the listener bound to `event`; false when there is none.
    pub fn dispatch(&self, event: &str, payload: &Value) -> bool {
        match self.listeners.get(event) {
            Some(listener) => {
                listener.invoke(payload);
                true
            }
            None => false,
        }
    }
}

/// Where a rendered subtree goes relative to its anchor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum TreeUpdateMode {
    /// The subtree replaces the anchor node itself.
    #[default]
    ReplaceComponent,
    /// The subtree becomes the anchor's only child.
    Replace,
    Append,
    Prepend,
}

/// Pre-order visit. `f` receives each node and its index among its siblings.
pub fn for_each(tree: &TreeNode, mut f: impl FnMut(&TreeNode, usize)) {
    fn visit(node: &TreeNode, index: usize, f: &mut impl FnMut(&TreeNode, usize)) {
        f(node, index);
        for (i, child) in node.child_nodes().enumerate() {
            visit(child, i, f);
        }
    }
    visit(tree, 0, &mut f);
}

/// Pre-order visit with mutable access. Children are read after `f` returns,
/// so nodes added by `f` are visited too.
pub fn for_each_mut(tree: &mut TreeNode, mut f: impl FnMut(&mut TreeNode, usize)) {
    fn visit(node: &mut TreeNode, index: usize, f: &mut impl FnMut(&mut TreeNode, usize)) {
        f(node, index);
        for (i, child) in node.child_nodes_mut().enumerate() {
            visit(child, i, f);
        }
    }
    visit(tree, 0, &mut f);
}

/// Pre-order replacement: `f` maps each node to a new one, then the children
/// of the returned node are processed.
pub fn replace_each(tree: TreeNode, mut f: impl FnMut(TreeNode, usize) -> TreeNode) -> TreeNode {
    match try_replace_each(tree, |node, index| Ok::<_, Infallible>(f(node, index))) {
        Ok(tree) => tree,
        Err(never) => match never {},
    }
}

/// Fallible [`replace_each`]; the first error stops the walk.
pub fn try_replace_each<E>(
    tree: TreeNode,
    mut f: impl FnMut(TreeNode, usize) -> Result<TreeNode, E>,
) -> Result<TreeNode, E> {
    fn visit<E>(
        node: TreeNode,
        index: usize,
        f: &mut impl FnMut(TreeNode, usize) -> Result<TreeNode, E>,
    ) -> Result<TreeNode, E> {
        let mut node = f(node, index)?;
        let mut i = 0usize;
        if let Some(child) = node.child.take() {
            node.child = Some(Box::new(visit(*child, i, f)?));
            i += 1;
        }
        if let Some(children) = node.children.take() {
            let mut out = Vec::with_capacity(children.len());
            for child in children {
                out.push(visit(child, i, f)?);
                i += 1;
            }
            node.children = Some(out);
        }
        Ok(node)
    }
    visit(tree, 0, &mut f)
}

/// Lazy depth-first (pre-order) iterator.
pub fn iter(tree: &TreeNode) -> TreeIter<'_> {
    TreeIter { stack: vec![tree] }
}

#[derive(Debug)]
pub struct TreeIter<'a> {
    stack: Vec<&'a TreeNode>,
}

impl<'a> Iterator for TreeIter<'a> {
    type Item = &'a TreeNode;

    fn next(&mut self) -> Option<Self::Item> {
        let node = self.stack.pop()?;
        let children: Vec<&TreeNode> = node.child_nodes().collect();
        self.stack.extend(children.into_iter().rev());
        Some(node)
    }
}

pub fn find_by_id<'a>(tree: &'a TreeNode, id: &str) -> Option<&'a TreeNode> {
    iter(tree).find(|node| node.id.as_deref() == Some(id))
}

pub fn find_by_id_mut<'a>(tree: &'a mut TreeNode, id: &str) -> Option<&'a mut TreeNode> {
    if tree.id.as_deref() == Some(id) {
        return Some(tree);
    }
    for child in tree.child_nodes_mut() {
        if let Some(found) = find_by_id_mut(child, id) {
            return Some(found);
        }
    }
    None
}

/// Place `node` into `base` relative to the node identified by `anchor`.
pub fn insert_into_tree(
    base: &mut TreeNode,
    node: TreeNode,
    anchor: &str,
    mode: TreeUpdateMode,
) -> Result<(), TreeError> {
    let target =
        find_by_id_mut(base, anchor).ok_or_else(|| TreeError::AnchorNotFound(anchor.to_string()))?;
    match mode {
        TreeUpdateMode::ReplaceComponent => *target = node,
        TreeUpdateMode::Replace => {
            target.child = None;
            target.children = Some(vec![node]);
        }
        TreeUpdateMode::Append => target.children.get_or_insert_with(Vec::new).push(node),
        TreeUpdateMode::Prepend => target.children.get_or_insert_with(Vec::new).insert(0, node),
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn sample() -> TreeNode {
        TreeNode::from_value(json!({
            "type": "container",
            "id": "root",
            "children": [
                {"type": "text", "id": "a", "text": "hello"},
                {"type": "container", "id": "b", "children": [
                    {"type": "button", "id": "b1"},
                    {"type": "text", "id": "b2"}
                ]},
                {"type": "card", "id": "c", "child": {"type": "text", "id": "c1"}}
            ]
        }))
        .unwrap()
    }

    fn ids(tree: &TreeNode) -> Vec<String> {
        iter(tree).map(|n| n.id_str().to_string()).collect()
    }

    #[test]
    fn parses_wire_shape() {
        let tree = TreeNode::from_value(json!({
            "type": "Input",
            "id": "name",
            "placeholder": "Your name",
            "context": {"id": "form", "value": {"name": ""}},
            "_implicitContexts_": [{"id": "item", "value": 1, "readonly": true}]
        }))
        .unwrap();
        assert!(tree.is_type("input"));
        assert_eq!(tree.props.get("placeholder"), Some(&json!("Your name")));
        assert_eq!(tree.context.as_ref().map(|c| c.id.as_str()), Some("form"));
        let implicit = tree.implicit_contexts.as_ref().unwrap();
        assert!(implicit[0].readonly);
        assert_eq!(tree.to_value()["placeholder"], json!("Your name"));
    }

    #[test]
    fn iterator_is_pre_order() {
        assert_eq!(ids(&sample()), vec!["root", "a", "b", "b1", "b2", "c", "c1"]);
    }

    #[test]
    fn for_each_reports_sibling_index() {
        let mut seen = Vec::new();
        for_each(&sample(), |node, index| seen.push((node.id_str().to_string(), index)));
        assert_eq!(seen[0], ("root".to_string(), 0));
        assert_eq!(seen[2], ("b".to_string(), 1));
        assert_eq!(seen[4], ("b2".to_string(), 1));
    }

    #[test]
    fn for_each_mut_edits_in_place() {
        let mut tree = sample();
        for_each_mut(&mut tree, |node, _| {
            node.props.insert("seen".into(), json!(true));
        });
        assert!(iter(&tree).all(|n| n.props.get("seen") == Some(&json!(true))));
    }

    #[test]
    fn replace_each_visits_children_of_the_replacement() {
        let tree = sample();
        let out = replace_each(tree, |node, _| {
            if node.id_str() == "b" {
                TreeNode::new("list")
                    .with_id("b")
                    .with_children(vec![TreeNode::new("text").with_id("new")])
            } else {
                node
            }
        });
        assert_eq!(ids(&out), vec!["root", "a", "b", "new", "c", "c1"]);
    }

    #[test]
    fn try_replace_each_stops_at_first_error() {
        let mut visited = 0;
        let out = try_replace_each(sample(), |node, _| {
            visited += 1;
            if node.id_str() == "b" {
                Err("boom")
            } else {
                Ok(node)
            }
        });
        assert_eq!(out.unwrap_err(), "boom");
        assert_eq!(visited, 3);
    }

    #[test]
    fn find_by_id_reaches_child_slot() {
        let tree = sample();
        assert_eq!(find_by_id(&tree, "c1").map(|n| n.node_type.as_str()), Some("text"));
        assert!(find_by_id(&tree, "zzz").is_none());
    }

    #[test]
    fn insert_into_tree_modes() {
        let mut tree = sample();
        insert_into_tree(&mut tree, TreeNode::new("x").with_id("x"), "b", TreeUpdateMode::Append)
            .unwrap();
        insert_into_tree(&mut tree, TreeNode::new("y").with_id("y"), "b", TreeUpdateMode::Prepend)
            .unwrap();
        assert_eq!(ids(&tree), vec!["root", "a", "b", "y", "b1", "b2", "x", "c", "c1"]);

        insert_into_tree(&mut tree, TreeNode::new("z").with_id("z"), "c", TreeUpdateMode::Replace)
            .unwrap();
        assert_eq!(ids(find_by_id(&tree, "c").unwrap()), vec!["c", "z"]);

        insert_into_tree(
            &mut tree,
            TreeNode::new("w").with_id("a"),
            "a",
            TreeUpdateMode::ReplaceComponent,
        )
        .unwrap();
        assert!(find_by_id(&tree, "a").unwrap().is_type("W"));

        let err = insert_into_tree(&mut tree, TreeNode::new("q"), "nope", TreeUpdateMode::Append);
        assert_eq!(err, Err(TreeError::AnchorNotFound("nope".into())));
    }
}
