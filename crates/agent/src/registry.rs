//! Name-to-tool lookup with fuzzy resolution.

use std::collections::BTreeMap;
use std::sync::Arc;

use tangle_core::Tool;

/// The executor's active tool set for one call.
///
/// Resolution is exact-match first. Failing that, a registered name
/// that appears inside the planned tool string matches, which tolerates
/// decorated model output like `"search (the web)"`. Candidates are
/// tried in name order, so the fallback is deterministic.
#[derive(Clone, Default)]
pub struct ToolRegistry {
    tools: BTreeMap<String, Arc<dyn Tool>>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_tools(tools: impl IntoIterator<Item = Arc<dyn Tool>>) -> Self {
        let mut registry = Self::new();
        for tool in tools {
            registry.insert(tool);
        }
        registry
    }

    /// Register a tool. A tool with the same name is replaced.
    pub fn insert(&mut self, tool: Arc<dyn Tool>) {
        self.tools.insert(tool.name().to_string(), tool);
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    /// Registered names, sorted.
    pub fn names(&self) -> Vec<String> {
        self.tools.keys().cloned().collect()
    }

    /// Resolve a planned tool string to a registered tool.
    pub fn resolve(&self, planned: &str) -> Option<Arc<dyn Tool>> {
        if let Some(tool) = self.tools.get(planned) {
            return Some(tool.clone());
        }
        self.tools
            .iter()
            .find(|(name, _)| planned.contains(name.as_str()))
            .map(|(_, tool)| tool.clone())
    }
}

impl std::fmt::Debug for ToolRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ToolRegistry")
            .field("names", &self.names())
            .finish()
    }
}
