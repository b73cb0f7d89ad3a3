use crate::lifecycle::RenderStage;
use canopy_core::{PathError, TreeError};
use std::path::PathBuf;
use thiserror::Error;

/// Why a render did not reach the paint callback.
#[derive(Debug, Error)]
pub enum RenderError {
    #[error("{stage} hook failed on {node_type} '{node_id}': {message}")]
    Hook {
        stage: RenderStage,
        node_type: String,
        node_id: String,
        message: String,
    },
    #[error("unknown component type '{node_type}' (node '{node_id}')")]
    UnknownComponent { node_type: String, node_id: String },
    #[error("view has no retained tree yet")]
    NotRendered,
    #[error(transparent)]
    Tree(#[from] TreeError),
}

/// Rejected context mutation.
#[derive(Debug, Error)]
pub enum ContextError {
    #[error("{node_type} node has no id")]
    MissingNodeId { node_type: String },
    #[error("{node_type} '{node_id}' is detached from the rendered tree")]
    Detached { node_type: String, node_id: String },
    #[error("context '{context_id}' is not visible from '{node_id}'")]
    NotFound { node_id: String, context_id: String },
    #[error("context '{context_id}' is readonly")]
    Readonly { node_id: String, context_id: String },
    #[error(transparent)]
    Path(#[from] PathError),
    #[error(transparent)]
    Render(#[from] RenderError),
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid view config: {0}")]
    Parse(#[from] serde_json::Error),
}
