//! Raw-tree adapters run at `BeforeViewSnapshot`, before anything is
//! published. They normalize shapes only a backend produces.

use crate::action::{ACTION_KEY, is_descriptor};
use canopy_core::TreeNode;
use canopy_core::expression::{self, Expr};
use serde_json::{Value, json};
use std::collections::HashMap;
use std::fmt;
use std::rc::Rc;

pub type Adapter = Rc<dyn Fn(&mut TreeNode)>;

pub const MODEL_PROPERTY: &str = "model";
pub const CHANGE_EVENT: &str = "onChange";

#[derive(Clone, Default)]
pub struct Adapters {
    by_type: HashMap<String, Vec<Adapter>>,
    any: Vec<Adapter>,
}

impl fmt::Debug for Adapters {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Adapters")
            .field("types", &self.by_type.keys().collect::<Vec<_>>())
            .field("any", &self.any.len())
            .finish()
    }
}

impl Adapters {
    /// No adapters at all.
    pub fn new() -> Self {
        Self::default()
    }

    /// The stock set: model binding on every node.
    pub fn standard() -> Self {
        let mut adapters = Self::new();
        adapters.register_any(model_binding);
        adapters
    }

    pub fn register(&mut self, node_type: &str, adapter: impl Fn(&mut TreeNode) + 'static) -> &mut Self {
        self.by_type
            .entry(node_type.to_ascii_lowercase())
            .or_default()
            .push(Rc::new(adapter));
        self
    }

    pub fn register_any(&mut self, adapter: impl Fn(&mut TreeNode) + 'static) -> &mut Self {
        self.any.push(Rc::new(adapter));
        self
    }

    /// Node-agnostic adapters first, then the ones for the node's type.
    pub fn apply(&self, node: &mut TreeNode) {
        for adapter in &self.any {
            adapter(node);
        }
        if let Some(typed) = self.by_type.get(&node.type_key()) {
            for adapter in typed {
                adapter(node);
            }
        }
    }
}

/// Two-way binding shorthand.
///
/// `model: "@{form.user.name}"` becomes `value: "@{form.user.name}"` plus a
/// `setContext` on `onChange` writing the event payload back to `form` at
/// `user.name`. An existing `onChange` action runs after the write.
pub fn model_binding(node: &mut TreeNode) {
    let Some(Value::String(model)) = node.props.get(MODEL_PROPERTY) else {
        return;
    };
    let Some(inner) = model
        .trim()
        .strip_prefix("@{")
        .and_then(|s| s.strip_suffix('}'))
    else {
        return;
    };
    let Ok(Expr::Path { context, .. }) = expression::parse(inner) else {
        return;
    };
    let path = inner
        .trim()
        .strip_prefix(context.as_str())
        .map(|rest| rest.strip_prefix('.').unwrap_or(rest))
        .unwrap_or("");

    let mut write = json!({
        ACTION_KEY: "setContext",
        "contextId": context,
        "value": format!("@{{{CHANGE_EVENT}}}"),
    });
    if !path.is_empty() {
        write["path"] = json!(path);
    }

    let binding = format!("@{{{}}}", inner.trim());
    let on_change = match node.props.remove(CHANGE_EVENT) {
        Some(existing) if is_descriptor(&existing) => json!([write, existing]),
        Some(Value::Array(mut list)) if !list.is_empty() && list.iter().all(is_descriptor) => {
            list.insert(0, write);
            Value::Array(list)
        }
        Some(other) => {
            // not an action; leave it alone and skip the binding
            node.props.insert(CHANGE_EVENT.to_string(), other);
            return;
        }
        None => write,
    };
    node.props.remove(MODEL_PROPERTY);
    node.props.insert("value".to_string(), Value::String(binding));
    node.props.insert(CHANGE_EVENT.to_string(), on_change);
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;

    #[test]
    fn model_becomes_value_and_set_context() {
        let mut node = TreeNode::new("textInput").with_prop("model", json!("@{form.user.name}"));
        model_binding(&mut node);
        assert!(node.props.get("model").is_none());
        assert_eq!(node.props["value"], json!("@{form.user.name}"));
        assert_eq!(
            node.props["onChange"],
            json!({"_action_": "setContext", "contextId": "form", "path": "user.name", "value": "@{onChange}"})
        );
    }

    #[test]
    fn whole_context_binding_has_no_path() {
        let mut node = TreeNode::new("textInput").with_prop("model", json!("@{query}"));
        model_binding(&mut node);
        assert!(node.props["onChange"].get("path").is_none());
        assert_eq!(node.props["onChange"]["contextId"], json!("query"));
    }

    #[test]
    fn existing_change_action_runs_after_the_write() {
        let mut node = TreeNode::new("textInput")
            .with_prop("model", json!("@{form.items[0]}"))
            .with_prop("onChange", json!({"_action_": "alert", "message": "changed"}));
        model_binding(&mut node);
        let list = node.props["onChange"].as_array().unwrap();
        assert_eq!(list.len(), 2);
        assert_eq!(list[0]["path"], json!("items[0]"));
        assert_eq!(list[1]["_action_"], json!("alert"));
    }

    #[test]
    fn non_binding_models_are_untouched() {
        for model in [json!("plain"), json!("@{sum(1, 2)}"), json!(3)] {
            let mut node = TreeNode::new("textInput").with_prop("model", model.clone());
            model_binding(&mut node);
            assert_eq!(node.props["model"], model);
            assert!(node.props.get("onChange").is_none());
        }
    }

    #[test]
    fn typed_adapters_run_after_generic_ones() {
        let order = Rc::new(Cell::new(0));
        let mut adapters = Adapters::new();
        let seen = order.clone();
        adapters.register("Image", move |node| {
            assert_eq!(seen.get(), 1);
            node.props.insert("typed".into(), json!(true));
        });
        let seen = order.clone();
        adapters.register_any(move |_| seen.set(seen.get() + 1));

        let mut image = TreeNode::new("IMAGE");
        adapters.apply(&mut image);
        assert_eq!(image.props["typed"], json!(true));

        let mut text = TreeNode::new("text");
        adapters.apply(&mut text);
        assert!(text.props.get("typed").is_none());
        assert_eq!(order.get(), 2);
    }
}
