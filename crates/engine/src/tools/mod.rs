//! Tool registry and execution
//!
//! External capabilities (weather, currency, ticketing, ...) plug in behind
//! a uniform `Tool` contract. The registry is built once at startup and
//! injected into the orchestrator and executor; there is no ambient global
//! registry.

mod executor;

pub use executor::ToolExecutor;

use deskwise_common::errors::Result;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

/// Uniform contract every external capability implements
#[async_trait::async_trait]
pub trait Tool: Send + Sync {
    /// Registered name, unique within a registry
    fn name(&self) -> &str;

    /// JSON-schema-like descriptor of the accepted arguments
    fn input_schema(&self) -> serde_json::Value;

    /// Per-call timeout; the executor enforces it
    fn default_timeout(&self) -> Duration {
        Duration::from_secs(10)
    }

    /// Execute with the given arguments
    async fn execute(&self, arguments: &serde_json::Value) -> Result<serde_json::Value>;
}

/// Immutable name -> tool map, constructed at startup
#[derive(Default)]
pub struct ToolRegistry {
    tools: HashMap<String, Arc<dyn Tool>>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a tool; replaces any previous registration of the name
    pub fn register(mut self, tool: Arc<dyn Tool>) -> Self {
        self.tools.insert(tool.name().to_string(), tool);
        self
    }

    /// Look up a tool by name
    pub fn get(&self, name: &str) -> Option<Arc<dyn Tool>> {
        self.tools.get(name).cloned()
    }

    /// Registered tool names, sorted for stable output
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.tools.keys().cloned().collect();
        names.sort();
        names
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }
}
