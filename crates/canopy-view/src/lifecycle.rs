//! Render stages and the hook tables keyed by them.

use canopy_core::TreeNode;
use std::collections::HashMap;
use std::fmt;
use std::rc::Rc;

/// Pipeline position of a view. A full render walks every state from
/// `BeforeStart`; a partial render enters at `AfterViewSnapshot`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum RenderStage {
    #[default]
    Idle,
    BeforeStart,
    IdAssigned,
    BeforeViewSnapshot,
    Snapshotted,
    AfterViewSnapshot,
    BeforeRender,
    Painted,
}

impl RenderStage {
    pub fn as_str(&self) -> &'static str {
        match self {
            RenderStage::Idle => "idle",
            RenderStage::BeforeStart => "beforeStart",
            RenderStage::IdAssigned => "idAssigned",
            RenderStage::BeforeViewSnapshot => "beforeViewSnapshot",
            RenderStage::Snapshotted => "snapshotted",
            RenderStage::AfterViewSnapshot => "afterViewSnapshot",
            RenderStage::BeforeRender => "beforeRender",
            RenderStage::Painted => "painted",
        }
    }
}

impl fmt::Display for RenderStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A lifecycle hook. It may edit the node in place and return `Ok(None)`, or
/// return a replacement node. `Err` aborts the render.
pub type Hook = Rc<dyn Fn(&mut TreeNode) -> Result<Option<TreeNode>, String>>;

/// Stage hooks: at most one stage-global hook per stage (run once on the
/// scope root) plus per-type hooks (run on every matching node in scope).
#[derive(Clone, Default)]
pub struct LifecycleHooks {
    global: HashMap<RenderStage, Hook>,
    by_type: HashMap<(RenderStage, String), Hook>,
}

impl fmt::Debug for LifecycleHooks {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut typed: Vec<String> = self
            .by_type
            .keys()
            .map(|(stage, ty)| format!("{stage}:{ty}"))
            .collect();
        typed.sort();
        f.debug_struct("LifecycleHooks")
            .field("global", &self.global.keys().collect::<Vec<_>>())
            .field("by_type", &typed)
            .finish()
    }
}

impl LifecycleHooks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the stage-global hook, replacing any previous one.
    pub fn on_stage(
        &mut self,
        stage: RenderStage,
        hook: impl Fn(&mut TreeNode) -> Result<Option<TreeNode>, String> + 'static,
    ) -> &mut Self {
        self.global.insert(stage, Rc::new(hook));
        self
    }

    /// Set the hook for `node_type` (case-insensitive) at `stage`.
    pub fn on_type(
        &mut self,
        stage: RenderStage,
        node_type: &str,
        hook: impl Fn(&mut TreeNode) -> Result<Option<TreeNode>, String> + 'static,
    ) -> &mut Self {
        self.by_type
            .insert((stage, node_type.to_ascii_lowercase()), Rc::new(hook));
        self
    }

    pub fn global(&self, stage: RenderStage) -> Option<Hook> {
        self.global.get(&stage).cloned()
    }

    pub fn for_type(&self, stage: RenderStage, node_type: &str) -> Option<Hook> {
        self.by_type
            .get(&(stage, node_type.to_ascii_lowercase()))
            .cloned()
    }

    pub fn has_type_hooks(&self, stage: RenderStage) -> bool {
        self.by_type.keys().any(|(s, _)| *s == stage)
    }
}
