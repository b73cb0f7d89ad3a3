//! Declarative actions on event properties.
//!
//! During `AfterViewSnapshot` every property holding an action descriptor
//! (`{"_action_": kind, ...}`) or a list of them is taken off the node and
//! replaced by a [`DeferredAction`] listener. Nothing in the descriptor is
//! resolved then, except analytics attributes; the rest is resolved when the
//! listener fires, against the event context followed by the hierarchy
//! captured here.

use crate::set_context;
use crate::view::{View, WeakView};
use canopy_core::context::DataContext;
use canopy_core::expression::resolve_value;
use canopy_core::{Listener, Operations, TreeNode};
use serde::Serialize;
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::fmt;
use std::rc::Rc;
use tracing::{debug, warn};

pub const ACTION_KEY: &str = "_action_";
pub const ANALYTICS_KEY: &str = "analytics";

pub fn is_descriptor(value: &Value) -> bool {
    value
        .as_object()
        .is_some_and(|obj| obj.get(ACTION_KEY).is_some_and(Value::is_string))
}

pub fn is_descriptor_list(value: &Value) -> bool {
    matches!(value, Value::Array(items) if !items.is_empty() && items.iter().all(is_descriptor))
}

/// A descriptor or a descriptor list.
pub fn is_action(value: &Value) -> bool {
    is_descriptor(value) || is_descriptor_list(value)
}

/// Whether an action sits anywhere inside `value`.
pub(crate) fn holds_action(value: &Value) -> bool {
    match value {
        Value::Object(obj) => is_descriptor(value) || obj.values().any(holds_action),
        Value::Array(items) => items.iter().any(holds_action),
        _ => false,
    }
}

/// Everything a handler gets for one action.
pub struct ActionCall<'a> {
    pub kind: &'a str,
    /// The descriptor with its own fields resolved. Nested continuation
    /// descriptors are left raw for [`ActionExecutor::execute`].
    pub action: &'a Value,
    pub node: &'a TreeNode,
    pub view: &'a View,
    pub executor: &'a ActionExecutor,
}

pub type ActionHandler = Rc<dyn Fn(&ActionCall<'_>)>;

/// Action kind to handler; kinds are matched case-insensitively.
#[derive(Clone)]
pub struct ActionHandlers {
    handlers: HashMap<String, ActionHandler>,
}

impl fmt::Debug for ActionHandlers {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut kinds: Vec<&String> = self.handlers.keys().collect();
        kinds.sort();
        f.debug_struct("ActionHandlers").field("kinds", &kinds).finish()
    }
}

impl ActionHandlers {
    /// Handler table with the built-in `setContext`.
    pub fn new() -> Self {
        let mut handlers = Self::empty();
        handlers.register("setContext", set_context::handle);
        handlers
    }

    pub fn empty() -> Self {
        Self {
            handlers: HashMap::new(),
        }
    }

    pub fn register(&mut self, kind: &str, handler: impl Fn(&ActionCall<'_>) + 'static) -> &mut Self {
        self.handlers
            .insert(kind.to_ascii_lowercase(), Rc::new(handler));
        self
    }

    pub fn get(&self, kind: &str) -> Option<ActionHandler> {
        self.handlers.get(&kind.to_ascii_lowercase()).cloned()
    }
}

impl Default for ActionHandlers {
    fn default() -> Self {
        Self::new()
    }
}

/// Delivered to the analytics sink before a tracked action's handler runs.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AnalyticsRecord {
    pub kind: String,
    pub event: String,
    pub node_id: Option<String>,
    pub category: Option<String>,
    pub attributes: Map<String, Value>,
}

pub type AnalyticsSink = Rc<dyn Fn(&AnalyticsRecord)>;

/// Listener produced from an event property.
pub struct DeferredAction {
    pub descriptors: Value,
    pub event_name: String,
    pub captured_hierarchy: Rc<Vec<DataContext>>,
    pub origin: Rc<TreeNode>,
    handlers: Rc<ActionHandlers>,
    operations: Rc<Operations>,
    analytics: Option<AnalyticsSink>,
    view: WeakView,
}

impl fmt::Debug for DeferredAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DeferredAction")
            .field("event_name", &self.event_name)
            .field("origin", &self.origin.id)
            .field("descriptors", &self.descriptors)
            .finish()
    }
}

impl DeferredAction {
    /// Executor over the captured hierarchy, before any event context.
    pub fn executor(&self) -> ActionExecutor {
        ActionExecutor {
            chain: self.captured_hierarchy.clone(),
            origin: self.origin.clone(),
            handlers: self.handlers.clone(),
            operations: self.operations.clone(),
            analytics: self.analytics.clone(),
            view: self.view.clone(),
        }
    }
}

impl Listener for DeferredAction {
    fn invoke(&self, payload: &Value) {
        self.executor()
            .execute(&self.descriptors, &self.event_name, payload.clone());
    }
}

/// Runs descriptors for one originating node. Cloning is cheap, so a handler
/// may keep one and run its continuations later.
#[derive(Clone)]
pub struct ActionExecutor {
    chain: Rc<Vec<DataContext>>,
    origin: Rc<TreeNode>,
    handlers: Rc<ActionHandlers>,
    operations: Rc<Operations>,
    analytics: Option<AnalyticsSink>,
    view: WeakView,
}

impl fmt::Debug for ActionExecutor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ActionExecutor")
            .field("origin", &self.origin.id)
            .field("chain", &self.chain.iter().map(|c| &c.id).collect::<Vec<_>>())
            .finish()
    }
}

impl ActionExecutor {
    /// Run `descriptors` (one or a list, in order) with `payload` visible as
    /// the context `event_name`. Earlier event contexts stay addressable.
    pub fn execute(&self, descriptors: &Value, event_name: &str, payload: Value) {
        let mut chain = Vec::with_capacity(self.chain.len() + 1);
        chain.push(DataContext::new(event_name, payload));
        chain.extend(self.chain.iter().cloned());
        let next = ActionExecutor {
            chain: Rc::new(chain),
            ..self.clone()
        };
        next.run(descriptors, event_name);
    }

    /// Contexts visible to the next descriptor, nearest first.
    pub fn chain(&self) -> &[DataContext] {
        &self.chain
    }

    pub fn node(&self) -> &TreeNode {
        &self.origin
    }

    fn run(&self, descriptors: &Value, event_name: &str) {
        let Some(view) = self.view.upgrade() else {
            warn!(
                node_type = %self.origin.node_type,
                node_id = self.origin.id_str(),
                event = event_name,
                "view dropped, action ignored"
            );
            return;
        };
        match descriptors {
            Value::Array(list) => {
                for descriptor in list {
                    self.run_one(&view, descriptor, event_name);
                }
            }
            single => self.run_one(&view, single, event_name),
        }
    }

    fn run_one(&self, view: &View, descriptor: &Value, event_name: &str) {
        let Some(kind) = descriptor.get(ACTION_KEY).and_then(Value::as_str) else {
            warn!(
                node_type = %self.origin.node_type,
                node_id = self.origin.id_str(),
                event = event_name,
                "not an action descriptor"
            );
            return;
        };
        let resolved = resolve_descriptor(descriptor, &self.chain, &self.operations);

        if let Some(sink) = &self.analytics
            && let Some(record) = analytics_record(kind, &resolved, event_name, &self.origin)
        {
            sink(&record);
        }

        let Some(handler) = self.handlers.get(kind) else {
            warn!(
                kind,
                node_type = %self.origin.node_type,
                node_id = self.origin.id_str(),
                "no handler registered for action"
            );
            return;
        };
        debug!(kind, node_id = self.origin.id_str(), event = event_name, "running action");
        handler(&ActionCall {
            kind,
            action: &resolved,
            node: &self.origin,
            view,
            executor: self,
        });
    }
}

/// Resolve a descriptor's own fields, leaving the kind, analytics settings
/// and continuation descriptors as they are.
fn resolve_descriptor(descriptor: &Value, chain: &[DataContext], operations: &Operations) -> Value {
    let Value::Object(fields) = descriptor else {
        return descriptor.clone();
    };
    let mut out = Map::with_capacity(fields.len());
    for (key, value) in fields {
        let keep = key == ACTION_KEY || key == ANALYTICS_KEY || holds_action(value);
        let value = if keep {
            value.clone()
        } else {
            resolve_value(value, chain, operations)
        };
        out.insert(key.clone(), value);
    }
    Value::Object(out)
}

fn analytics_record(kind: &str, descriptor: &Value, event: &str, origin: &TreeNode) -> Option<AnalyticsRecord> {
    let analytics = descriptor.get(ANALYTICS_KEY)?.as_object()?;
    let mut attributes = Map::new();
    for name in analytics
        .get("attributes")
        .and_then(Value::as_array)
        .into_iter()
        .flatten()
        .filter_map(Value::as_str)
    {
        attributes.insert(
            name.to_string(),
            descriptor.get(name).cloned().unwrap_or(Value::Null),
        );
    }
    Some(AnalyticsRecord {
        kind: kind.to_string(),
        event: event.to_string(),
        node_id: origin.id.clone(),
        category: analytics
            .get("category")
            .and_then(Value::as_str)
            .map(str::to_string),
        attributes,
    })
}

/// Resolve the fields named in `analytics.attributes` now, recursing into
/// continuations.
fn prepare_analytics(value: &mut Value, hierarchy: &[DataContext], operations: &Operations) {
    match value {
        Value::Array(items) => {
            for item in items {
                prepare_analytics(item, hierarchy, operations);
            }
        }
        Value::Object(fields) if fields.contains_key(ACTION_KEY) => {
            let names: Vec<String> = fields
                .get(ANALYTICS_KEY)
                .and_then(|a| a.get("attributes"))
                .and_then(Value::as_array)
                .map(|list| list.iter().filter_map(Value::as_str).map(str::to_string).collect())
                .unwrap_or_default();
            for name in names {
                if let Some(field) = fields.get_mut(&name)
                    && !holds_action(field)
                {
                    *field = resolve_value(field, hierarchy, operations);
                }
            }
            for field in fields.values_mut() {
                if holds_action(field) {
                    prepare_analytics(field, hierarchy, operations);
                }
            }
        }
        Value::Object(fields) => {
            for field in fields.values_mut() {
                prepare_analytics(field, hierarchy, operations);
            }
        }
        _ => {}
    }
}

fn shallow(node: &TreeNode) -> TreeNode {
    TreeNode {
        node_type: node.node_type.clone(),
        id: node.id.clone(),
        context: node.context.clone(),
        implicit_contexts: node.implicit_contexts.clone(),
        props: node.props.clone(),
        ..TreeNode::default()
    }
}

/// Move every action on `node`'s properties into a listener of the same name.
pub fn deserialize(node: &mut TreeNode, hierarchy: &[DataContext], view: &View) {
    let events: Vec<String> = node
        .props
        .iter()
        .filter(|(_, value)| is_action(value))
        .map(|(key, _)| key.clone())
        .collect();
    if events.is_empty() {
        return;
    }

    let operations = view.operations();
    let mut taken = Vec::with_capacity(events.len());
    for event in events {
        if let Some(mut descriptors) = node.props.remove(&event) {
            prepare_analytics(&mut descriptors, hierarchy, &operations);
            taken.push((event, descriptors));
        }
    }

    let origin = Rc::new(shallow(node));
    let captured = Rc::new(hierarchy.to_vec());
    for (event, descriptors) in taken {
        let action = DeferredAction {
            descriptors,
            event_name: event.clone(),
            captured_hierarchy: captured.clone(),
            origin: origin.clone(),
            handlers: view.handlers(),
            operations: operations.clone(),
            analytics: view.analytics(),
            view: view.downgrade(),
        };
        node.listeners.insert(event, Rc::new(action));
    }
}
