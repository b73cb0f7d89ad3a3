//! Data-driven children: a template manager expanded over a data source, and
//! the keyed single-template repeater built on it.

use crate::error::RenderError;
use crate::renderer::{assign_descendant_ids, positional_id};
use crate::view::View;
use canopy_core::expression::{self, has_marker};
use canopy_core::path::{self, parse_path};
use canopy_core::{DataContext, Operations, TreeError, TreeNode, TreeUpdateMode, context, tree, truthy};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use tracing::{debug, warn};

/// Set on each item root by [`suffix_ids`].
pub const INDEX_PROPERTY: &str = "__index__";
/// Set on each repeater child; compared to skip unchanged data.
pub const KEY_PROPERTY: &str = "__key__";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TemplateCase {
    /// `@{...}` marker or bare expression, evaluated per item.
    pub case: String,
    pub view: TreeNode,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TemplateManager {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default: Option<TreeNode>,
    #[serde(default)]
    pub templates: Vec<TemplateCase>,
}

impl TemplateManager {
    /// One template for every item.
    pub fn single(view: TreeNode) -> Self {
        Self {
            default: Some(view),
            templates: Vec::new(),
        }
    }

    pub fn from_value(value: Value) -> Result<Self, serde_json::Error> {
        serde_json::from_value(value)
    }

    /// First case that holds for `hierarchy`, else the default.
    pub fn select(&self, hierarchy: &[DataContext], operations: &Operations) -> Option<&TreeNode> {
        self.templates
            .iter()
            .find(|t| case_holds(&t.case, hierarchy, operations))
            .map(|t| &t.view)
            .or(self.default.as_ref())
    }
}

fn case_holds(case: &str, hierarchy: &[DataContext], operations: &Operations) -> bool {
    let value = if has_marker(case) {
        expression::resolve_str(case, hierarchy, operations)
    } else {
        match expression::evaluate(case, hierarchy, operations) {
            Ok(value) => value,
            Err(err) => {
                warn!(case, error = %err, "template case failed");
                Value::Null
            }
        }
    };
    truthy(&value)
}

/// Rebuild the children of `anchor_id` from `data_source`, one entry of
/// per-item contexts per item, then partial-render the anchor.
///
/// Items no template matches produce no child. Each child gets the readonly
/// index context `index_context_id` and the item's contexts as implicit
/// contexts, ahead of any the template declares itself.
pub fn expand(
    view: &View,
    manager: &TemplateManager,
    anchor_id: &str,
    data_source: &[Vec<DataContext>],
    index_context_id: &str,
    item_manager: Option<&dyn Fn(TreeNode, usize) -> TreeNode>,
) -> Result<(), RenderError> {
    let retained = view.tree().ok_or(RenderError::NotRendered)?;
    let mut anchor = tree::find_by_id(&retained, anchor_id)
        .cloned()
        .ok_or_else(|| TreeError::AnchorNotFound(anchor_id.to_string()))?;
    let mut outer = context::hierarchy_of(&retained, anchor_id).unwrap_or_default();
    outer.extend(view.process_contexts());
    let operations = view.operations();

    let mut children = Vec::with_capacity(data_source.len());
    for (index, item) in data_source.iter().enumerate() {
        let hierarchy: Vec<DataContext> = item.iter().chain(outer.iter()).cloned().collect();
        let Some(template) = manager.select(&hierarchy, &operations) else {
            debug!(anchor_id, index, "no template for item");
            continue;
        };
        let mut node = template.clone();
        let mut implicit = vec![DataContext::readonly(index_context_id, json!(index))];
        implicit.extend(item.iter().cloned());
        implicit.extend(node.implicit_contexts.take().unwrap_or_default());
        node.implicit_contexts = Some(implicit);
        children.push(match item_manager {
            Some(manage) => manage(node, index),
            None => node,
        });
    }
    debug!(
        anchor_id,
        items = data_source.len(),
        children = children.len(),
        "template expanded"
    );

    view.count(|s| s.template += 1);
    anchor.child = None;
    anchor.children = Some(children);
    view.update(anchor, Some(anchor_id), TreeUpdateMode::ReplaceComponent)
}

/// Stock item manager. Ids become `"{id}:{index}"`; an id-less item root
/// gets a positional id under the anchor and id-less descendants one under
/// their item root.
pub fn suffix_ids(anchor_id: &str) -> impl Fn(TreeNode, usize) -> TreeNode + use<> {
    let anchor_id = anchor_id.to_string();
    move |mut item, index| {
        tree::for_each_mut(&mut item, |node, _| {
            if let Some(id) = node.id.as_mut() {
                *id = format!("{id}:{index}");
            }
        });
        if item.id.is_none() {
            item.id = Some(positional_id(&anchor_id, index, &item.node_type));
        }
        assign_descendant_ids(&mut item);
        item.props.insert(INDEX_PROPERTY.to_string(), json!(index));
        item
    }
}

/// `item[key]`, or the whole item when there is no key or it is missing, so
/// changed data never compares equal.
fn item_key(item: &Value, key: Option<&str>) -> Value {
    key.and_then(|k| parse_path(k).ok())
        .and_then(|segments| path::get(item, &segments))
        .unwrap_or(item)
        .clone()
}

/// Render `template` once per item under `anchor_id`, each item visible as
/// `iterator_name` and its position as `index_name`.
///
/// Returns `false` without rendering when the anchor's children already
/// carry the same keys in the same order.
pub fn repeat(
    view: &View,
    anchor_id: &str,
    template: &TreeNode,
    items: &[Value],
    key: Option<&str>,
    iterator_name: &str,
    index_name: &str,
) -> Result<bool, RenderError> {
    let keys: Vec<Value> = items.iter().map(|item| item_key(item, key)).collect();
    let retained = view.tree().ok_or(RenderError::NotRendered)?;
    let anchor = tree::find_by_id(&retained, anchor_id)
        .ok_or_else(|| TreeError::AnchorNotFound(anchor_id.to_string()))?;
    let current: Vec<Value> = anchor
        .child_nodes()
        .map(|c| c.props.get(KEY_PROPERTY).cloned().unwrap_or(Value::Null))
        .collect();
    if current == keys {
        view.count(|s| s.template_skipped += 1);
        debug!(anchor_id, items = items.len(), "repeater keys unchanged");
        return Ok(false);
    }

    let source: Vec<Vec<DataContext>> = items
        .iter()
        .map(|item| vec![DataContext::new(iterator_name, item.clone())])
        .collect();
    let suffix = suffix_ids(anchor_id);
    let keyed = |node: TreeNode, index: usize| {
        let mut node = suffix(node, index);
        node.props.insert(KEY_PROPERTY.to_string(), keys[index].clone());
        node
    };
    expand(
        view,
        &TemplateManager::single(template.clone()),
        anchor_id,
        &source,
        index_name,
        Some(&keyed),
    )?;
    Ok(true)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;
    use std::rc::Rc;

    type Painted = Rc<RefCell<Vec<(TreeNode, Option<String>)>>>;

    fn painting_view() -> (View, Painted) {
        let painted = Painted::default();
        let sink = painted.clone();
        let view = View::builder(move |tree, anchor, _| {
            sink.borrow_mut().push((tree.clone(), anchor.map(str::to_string)));
        })
        .build();
        (view, painted)
    }

    fn texts(scope: &TreeNode) -> Vec<Value> {
        scope.child_nodes().map(|c| c.props["text"].clone()).collect()
    }

    fn list_screen() -> TreeNode {
        TreeNode::from_value(json!({
            "type": "screen",
            "id": "screen",
            "context": {"id": "labels", "value": {"fallback": "other"}},
            "children": [{"type": "column", "id": "list"}]
        }))
        .unwrap()
    }

    fn items(values: &[&str]) -> Vec<Vec<DataContext>> {
        values
            .iter()
            .map(|v| vec![DataContext::new("item", json!(v))])
            .collect()
    }

    #[test]
    fn cases_then_default_in_data_order() {
        let (view, painted) = painting_view();
        view.render(list_screen()).unwrap();
        let manager = TemplateManager::from_value(json!({
            "default": {"type": "text", "text": "@{labels.fallback}: @{item} at @{index}"},
            "templates": [
                {"case": "@{eq(item, 'first')}", "view": {"type": "text", "id": "first", "text": "first view"}},
                {"case": "eq(item, 'second')", "view": {"type": "text", "id": "second", "text": "second view"}}
            ]
        }))
        .unwrap();

        let manage = suffix_ids("list");
        expand(
            &view,
            &manager,
            "list",
            &items(&["first", "unknown", "second"]),
            "index",
            Some(&manage),
        )
        .unwrap();

        let (scope, anchor) = painted.borrow().last().unwrap().clone();
        assert_eq!(anchor.as_deref(), Some("list"));
        assert_eq!(
            texts(&scope),
            vec![json!("first view"), json!("other: unknown at 1"), json!("second view")]
        );

        let retained = view.tree().unwrap();
        let list = tree::find_by_id(&retained, "list").unwrap();
        let ids: Vec<&str> = list.child_nodes().map(TreeNode::id_str).collect();
        assert_eq!(ids, vec!["first:0", "list/1:text", "second:2"]);
        let implicit = list.children.as_ref().unwrap()[1].implicit_contexts.as_ref().unwrap();
        assert_eq!(implicit[0], DataContext::readonly("index", json!(1)));
        assert_eq!(implicit[1], DataContext::new("item", json!("unknown")));
        assert_eq!(view.stats().template, 1);
        assert_eq!(view.stats().partial, 1);
    }

    #[test]
    fn unmatched_items_yield_no_children() {
        let (view, painted) = painting_view();
        view.render(list_screen()).unwrap();
        let manager = TemplateManager {
            default: None,
            templates: vec![TemplateCase {
                case: "@{eq(item, 'b')}".into(),
                view: TreeNode::new("text").with_prop("text", json!("@{item}@{index}")),
            }],
        };
        expand(&view, &manager, "list", &items(&["a", "b", "c", "b"]), "index", None).unwrap();
        let scope = painted.borrow().last().unwrap().0.clone();
        assert_eq!(texts(&scope), vec![json!("b1"), json!("b3")]);

        expand(&view, &manager, "list", &items(&["x"]), "index", None).unwrap();
        let scope = painted.borrow().last().unwrap().0.clone();
        assert_eq!(scope.child_nodes().count(), 0);
    }

    #[test]
    fn template_contexts_follow_item_contexts() {
        let (view, painted) = painting_view();
        view.render(list_screen()).unwrap();
        let mut view_node = TreeNode::new("text").with_prop("text", json!("@{item}"));
        view_node.implicit_contexts = Some(vec![DataContext::new("item", json!("shadowed"))]);
        expand(
            &view,
            &TemplateManager::single(view_node),
            "list",
            &items(&["real"]),
            "i",
            None,
        )
        .unwrap();
        let scope = painted.borrow().last().unwrap().0.clone();
        assert_eq!(texts(&scope), vec![json!("real")]);
    }

    #[test]
    fn repeater_skips_unchanged_keys() {
        let (view, painted) = painting_view();
        view.render(list_screen()).unwrap();
        let row = TreeNode::new("row").with_children(vec![
            TreeNode::new("text").with_prop("text", json!("@{row.name} #@{i}")),
        ]);
        let data = vec![
            json!({"id": 7, "name": "A"}),
            json!({"id": 8, "name": "B"}),
            json!({"id": 9, "name": "C"}),
        ];

        assert!(repeat(&view, "list", &row, &data, Some("id"), "row", "i").unwrap());
        assert_eq!(painted.borrow().len(), 2);
        let scope = painted.borrow().last().unwrap().0.clone();
        assert_eq!(scope.child_nodes().count(), 3);
        let second = scope.child_nodes().nth(1).unwrap();
        assert_eq!(second.id_str(), "list/1:row");
        assert_eq!(second.props[KEY_PROPERTY], json!(8));
        assert_eq!(second.props[INDEX_PROPERTY], json!(1));
        assert_eq!(second.child_nodes().next().unwrap().props["text"], json!("B #1"));

        assert!(!repeat(&view, "list", &row, &data, Some("id"), "row", "i").unwrap());
        assert_eq!(painted.borrow().len(), 2);
        assert_eq!(view.stats().template_skipped, 1);

        let reordered = vec![data[2].clone(), data[0].clone(), data[1].clone()];
        assert!(repeat(&view, "list", &row, &reordered, Some("id"), "row", "i").unwrap());
        assert_eq!(painted.borrow().len(), 3);
        assert_eq!(view.stats().template, 2);
    }

    #[test]
    fn repeater_without_key_compares_item_values() {
        let (view, painted) = painting_view();
        view.render(list_screen()).unwrap();
        let cell = TreeNode::new("text").with_prop("text", json!("@{v}"));
        assert!(repeat(&view, "list", &cell, &[json!(1), json!(2)], None, "v", "i").unwrap());
        assert!(repeat(&view, "list", &cell, &[json!(3), json!(4)], None, "v", "i").unwrap());
        let scope = painted.borrow().last().unwrap().0.clone();
        assert_eq!(texts(&scope), vec![json!(3), json!(4)]);

        assert!(!repeat(&view, "list", &cell, &[json!(3), json!(4)], None, "v", "i").unwrap());
        assert_eq!(view.stats().template_skipped, 1);

        // a key missing from an item falls back to the item itself
        let rows = [json!({"name": "a"}), json!({"name": "b"})];
        assert!(repeat(&view, "list", &cell, &rows, Some("id"), "v", "i").unwrap());
        let renamed = [json!({"name": "a"}), json!({"name": "c"})];
        assert!(repeat(&view, "list", &cell, &renamed, Some("id"), "v", "i").unwrap());
        assert_eq!(painted.borrow().len(), 5);
    }

    #[test]
    fn expansion_needs_a_rendered_anchor() {
        let (view, _) = painting_view();
        let manager = TemplateManager::default();
        assert!(matches!(
            expand(&view, &manager, "list", &[], "i", None),
            Err(RenderError::NotRendered)
        ));
        view.render(list_screen()).unwrap();
        assert!(matches!(
            expand(&view, &manager, "nope", &[], "i", None),
            Err(RenderError::Tree(TreeError::AnchorNotFound(_)))
        ));
    }
}
