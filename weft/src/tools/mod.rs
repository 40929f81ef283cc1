//! Tool system: the [`Tool`] trait, tool specs advertised to the model,
//! and the registry the tools node executes against.

mod calc;
mod time;

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;
use thiserror::Error;

pub use calc::SimpleCalculator;
pub use time::GetCurrentTime;

#[derive(Error, Debug)]
pub enum ToolError {
    #[error("invalid arguments: {0}")]
    InvalidArguments(String),
    #[error("execution: {0}")]
    Execution(String),
    #[error("unknown tool: {0}")]
    Unknown(String),
}

/// Tool description advertised to the model: name, description, and a JSON
/// schema for the arguments.
#[derive(Clone, Debug, PartialEq)]
pub struct ToolSpec {
    pub name: String,
    pub description: Option<String>,
    pub parameters: Value,
}

/// A single callable tool.
#[async_trait]
pub trait Tool: Send + Sync {
    /// Unique name; the model addresses the tool by it.
    fn name(&self) -> &str;

    fn spec(&self) -> ToolSpec;

    /// Executes with the (already parsed) JSON arguments and returns the
    /// result text fed back to the model.
    async fn call(&self, arguments: &Value) -> Result<String, ToolError>;
}

/// Tools by name. Built once at startup and shared.
#[derive(Default, Clone)]
pub struct ToolRegistry {
    tools: HashMap<String, Arc<dyn Tool>>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// The default set the orchestrator registers.
    pub fn builtin() -> Self {
        let mut registry = Self::new();
        registry.register(Arc::new(GetCurrentTime));
        registry.register(Arc::new(SimpleCalculator));
        registry
    }

    pub fn register(&mut self, tool: Arc<dyn Tool>) -> &mut Self {
        self.tools.insert(tool.name().to_string(), tool);
        self
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn Tool>> {
        self.tools.get(name).cloned()
    }

    /// Specs of all registered tools, name-sorted for determinism.
    pub fn specs(&self) -> Vec<ToolSpec> {
        let mut specs: Vec<ToolSpec> = self.tools.values().map(|t| t.spec()).collect();
        specs.sort_by(|a, b| a.name.cmp(&b.name));
        specs
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// **Scenario**: the builtin registry exposes both tools with sorted
    /// specs.
    #[test]
    fn builtin_registry_contents() {
        let registry = ToolRegistry::builtin();
        assert!(registry.get("get_current_time").is_some());
        assert!(registry.get("simple_calculator").is_some());
        assert!(registry.get("launch_missiles").is_none());
        let names: Vec<_> = registry.specs().iter().map(|s| s.name.clone()).collect();
        assert_eq!(names, vec!["get_current_time", "simple_calculator"]);
    }
}
