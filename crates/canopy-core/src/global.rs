//! Process-scoped global context, visible to every node as `global`.

use crate::context::{DataContext, GLOBAL_CONTEXT_ID};
use crate::error::PathError;
use crate::path::{self, parse_path};
use serde_json::{Map, Value};
use std::cell::{Cell, RefCell};
use std::fmt;
use std::rc::Rc;

type Subscriber = Rc<dyn Fn()>;

/// Shared handle; clones point at the same store.
#[derive(Clone, Default)]
pub struct GlobalContext {
    inner: Rc<Inner>,
}

#[derive(Default)]
struct Inner {
    value: RefCell<Value>,
    subscribers: RefCell<Vec<(usize, Subscriber)>>,
    next_subscriber: Cell<usize>,
}

impl fmt::Debug for GlobalContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GlobalContext")
            .field("value", &self.inner.value.borrow())
            .field("subscribers", &self.inner.subscribers.borrow().len())
            .finish()
    }
}

impl GlobalContext {
    pub fn new(initial: Value) -> Self {
        let ctx = Self::default();
        *ctx.inner.value.borrow_mut() = initial;
        ctx
    }

    /// Whole value, or the value at `path` (`null` when missing).
    pub fn get(&self, path: Option<&str>) -> Result<Value, PathError> {
        let value = self.inner.value.borrow();
        match path {
            None => Ok(value.clone()),
            Some(p) => {
                let segments = parse_path(p)?;
                Ok(path::get(&value, &segments).cloned().unwrap_or(Value::Null))
            }
        }
    }

    /// Replace the whole value or the value at `path`, then notify.
    pub fn set(&self, new_value: Value, path: Option<&str>) -> Result<(), PathError> {
        let segments = match path {
            Some(p) => parse_path(p)?,
            None => Vec::new(),
        };
        path::set(&mut self.inner.value.borrow_mut(), &segments, new_value)?;
        self.notify();
        Ok(())
    }

    /// Reset to an empty object, or drop the entry at `path`, then notify.
    pub fn clear(&self, path: Option<&str>) -> Result<(), PathError> {
        match path {
            None => *self.inner.value.borrow_mut() = Value::Object(Map::new()),
            Some(p) => {
                let segments = parse_path(p)?;
                path::remove(&mut self.inner.value.borrow_mut(), &segments);
            }
        }
        self.notify();
        Ok(())
    }

    /// Snapshot as the `global` data context.
    pub fn as_context(&self) -> DataContext {
        DataContext::new(GLOBAL_CONTEXT_ID, self.inner.value.borrow().clone())
    }

    /// Register a callback run after every mutation. Returns a token for
    /// [`GlobalContext::unsubscribe`].
    pub fn subscribe(&self, f: impl Fn() + 'static) -> usize {
        let id = self.inner.next_subscriber.get();
        self.inner.next_subscriber.set(id + 1);
        self.inner.subscribers.borrow_mut().push((id, Rc::new(f)));
        id
    }

    pub fn unsubscribe(&self, token: usize) -> bool {
        let mut subs = self.inner.subscribers.borrow_mut();
        let before = subs.len();
        subs.retain(|(id, _)| *id != token);
        subs.len() != before
    }

    fn notify(&self) {
        // Subscribers may read or even mutate the store again.
        let subs: Vec<Subscriber> = self
            .inner
            .subscribers
            .borrow()
            .iter()
            .map(|(_, f)| f.clone())
            .collect();
        for f in subs {
            f();
        }
    }
}
