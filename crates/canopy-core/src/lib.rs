//! Canopy core crate.
//!
//! Everything a server-driven UI tree needs before it can be rendered,
//! independent of any view or host:
//!
//! - `tree`: the node model as it arrives over the wire, pre-order traversal
//!   and anchored subtree insertion.
//! - `context` + `global`: data contexts, per-node context hierarchies and the
//!   process-wide `global` store.
//! - `path`: dotted/bracketed paths into JSON values.
//! - `expression` + `operations`: `@{...}` binding markers resolved against a
//!   hierarchy, with a pluggable table of named operations.
//!
//! Precedence rule shared by all lookups: nearest declaration first. A node's
//! own explicit context outranks its implicit contexts, which outrank anything
//! an ancestor declared; process contexts come last.

pub mod context;
pub mod error;
pub mod expression;
pub mod global;
pub mod operations;
pub mod path;
pub mod tree;

pub use context::{
    ContextHierarchy, ContextMap, DataContext, GLOBAL_CONTEXT_ID, NAVIGATION_CONTEXT_ID,
};
pub use error::{ExpressionError, PathError, TreeError};
pub use expression::{resolve_str, resolve_value};
pub use global::GlobalContext;
pub use operations::{EvalError, EvalResult, Operation, Operations, truthy};
pub use tree::{Listener, ListenerRef, TreeNode, TreeUpdateMode};
